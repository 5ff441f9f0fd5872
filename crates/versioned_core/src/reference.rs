//! Polymorphic references to documents of any type.
//!
//! One version store holds history for many document types, so owners and
//! updaters are addressed by an explicit `(type tag, id)` pair. A
//! [`ReferenceResolver`] maps type tags to loader functions so a reference
//! can be turned back into the object it names.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::document::Document;
use crate::error::{Result, VersionedError};

/// Reference to an object of some registered type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ObjectRef {
    /// Type tag (e.g. "user")
    pub type_tag: String,

    /// Identity within that type
    pub id: String,
}

impl ObjectRef {
    /// Create a reference from a type tag and an id.
    pub fn new(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_tag, self.id)
    }
}

/// Loader function for one reference type.
///
/// Returns `Ok(None)` when no object with the given id exists.
pub type ReferenceLoader = Arc<dyn Fn(&str) -> Result<Option<Document>> + Send + Sync>;

/// Thread-safe registry mapping type tags to loaders.
pub struct ReferenceResolver {
    loaders: RwLock<HashMap<String, ReferenceLoader>>,
}

impl ReferenceResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self {
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the loader for a type tag.
    pub fn register(&self, type_tag: impl Into<String>, loader: ReferenceLoader) -> Result<()> {
        let mut loaders = self.loaders.write()?;
        loaders.insert(type_tag.into(), loader);
        Ok(())
    }

    /// Remove the loader for a type tag.
    ///
    /// Returns `true` if a loader was registered.
    pub fn unregister(&self, type_tag: &str) -> Result<bool> {
        let mut loaders = self.loaders.write()?;
        Ok(loaders.remove(type_tag).is_some())
    }

    /// Whether a loader exists for the type tag.
    pub fn is_registered(&self, type_tag: &str) -> Result<bool> {
        let loaders = self.loaders.read()?;
        Ok(loaders.contains_key(type_tag))
    }

    /// Resolve a reference through its registered loader.
    ///
    /// Returns `Ok(None)` when no loader is registered for the type, so the
    /// caller can fall back to another source.
    pub fn resolve(&self, reference: &ObjectRef) -> Result<Option<Option<Document>>> {
        // Clone the loader out so it runs without holding the lock.
        let loader = {
            let loaders = self.loaders.read()?;
            loaders.get(&reference.type_tag).cloned()
        };

        match loader {
            Some(loader) => Ok(Some(loader(&reference.id)?)),
            None => Ok(None),
        }
    }

    /// Resolve a reference whose type must be registered.
    ///
    /// # Errors
    ///
    /// [`VersionedError::UnknownReferenceType`] if no loader exists for the type.
    pub fn load(&self, reference: &ObjectRef) -> Result<Option<Document>> {
        self.resolve(reference)?
            .ok_or_else(|| VersionedError::UnknownReferenceType(reference.type_tag.clone()))
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<String> = self
            .loaders
            .read()
            .map(|loaders| loaders.keys().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        f.debug_struct("ReferenceResolver")
            .field("types", &tags)
            .finish()
    }
}
