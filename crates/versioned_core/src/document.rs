//! Versioned documents.
//!
//! A [`Document`] is any business entity that opts into versioning: a stable
//! id, a type tag, the current [`VersionToken`], and a free-form attribute map.
//! The document remembers the attribute state it was loaded with, so pending
//! edits can be turned into a [`ChangeSet`] when it is saved.

use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::diff::ChangeSet;
use crate::error::{Result, VersionedError};
use crate::reference::ObjectRef;
use crate::retention::RetentionPolicy;
use crate::token::VersionToken;

/// Attribute map of a document or a version snapshot.
pub type Attributes = IndexMap<String, Value>;

/// Storage identity field. Never part of attributes or snapshots.
pub const ID_FIELD: &str = "_id";

/// Version token field. Captured separately from snapshots.
pub const TOKEN_FIELD: &str = "version_token";

/// Whether `field` is managed by the versioning engine rather than the caller.
pub fn is_reserved_field(field: &str) -> bool {
    field == ID_FIELD || field == TOKEN_FIELD
}

/// Remove reserved fields from an attribute map in place.
pub fn strip_reserved(attributes: &mut Attributes) {
    attributes.retain(|field, _| !is_reserved_field(field));
}

/// A document tracked by the versioning engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    doc_type: String,
    version_token: VersionToken,
    attributes: Attributes,
    /// Attributes as last read from or written to the store
    persisted: Attributes,
    /// Per-instance override of the type's retention policy
    retention: Option<RetentionPolicy>,
}

impl Document {
    /// Create a new, not yet persisted document with a fresh id and token.
    pub fn new(doc_type: impl Into<String>, mut attributes: Attributes) -> Self {
        strip_reserved(&mut attributes);
        Self {
            id: Uuid::new_v4().to_string(),
            doc_type: doc_type.into(),
            version_token: VersionToken::generate(),
            persisted: attributes.clone(),
            attributes,
            retention: None,
        }
    }

    /// Rebuild a document from its stored representation.
    pub fn from_parts(
        id: String,
        doc_type: String,
        version_token: VersionToken,
        mut attributes: Attributes,
    ) -> Self {
        strip_reserved(&mut attributes);
        Self {
            id,
            doc_type,
            version_token,
            persisted: attributes.clone(),
            attributes,
            retention: None,
        }
    }

    /// Builder-style per-instance retention override.
    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    /// Storage identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type tag.
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Polymorphic reference to this document.
    pub fn reference(&self) -> ObjectRef {
        ObjectRef::new(self.doc_type.clone(), self.id.clone())
    }

    /// Token this document was last observed at.
    pub fn version_token(&self) -> &VersionToken {
        &self.version_token
    }

    /// Working attributes, including pending edits.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Attributes as they were last persisted.
    pub fn persisted_attributes(&self) -> &Attributes {
        &self.persisted
    }

    /// Read one attribute.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Read one string attribute.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }

    /// Set one attribute. Reserved fields are rejected.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let field = field.into();
        if is_reserved_field(&field) {
            return Err(VersionedError::ReservedField(field));
        }
        self.attributes.insert(field, value.into());
        Ok(())
    }

    /// Remove one attribute, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.attributes.shift_remove(field)
    }

    /// Pending changes relative to the persisted state.
    pub fn changes(&self) -> ChangeSet {
        ChangeSet::between(&self.persisted, &self.attributes)
    }

    /// Whether there are pending changes.
    pub fn is_changed(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Drop pending edits, returning to the persisted state.
    pub fn discard_changes(&mut self) {
        self.attributes = self.persisted.clone();
    }

    /// Per-instance retention override, if any.
    pub fn retention(&self) -> Option<RetentionPolicy> {
        self.retention
    }

    /// Set or clear the per-instance retention override.
    pub fn set_retention(&mut self, policy: Option<RetentionPolicy>) {
        self.retention = policy;
    }

    /// Replace the working attributes wholesale (used by rollback).
    pub(crate) fn replace_attributes(&mut self, mut attributes: Attributes) -> Attributes {
        strip_reserved(&mut attributes);
        std::mem::replace(&mut self.attributes, attributes)
    }

    /// Record a successful write at `token`.
    pub(crate) fn mark_persisted(&mut self, token: VersionToken) {
        self.version_token = token;
        self.persisted = self.attributes.clone();
    }

    /// Overwrite this document with freshly loaded state, keeping the
    /// retention override.
    pub(crate) fn refresh_from(&mut self, loaded: Document) {
        let retention = self.retention;
        *self = loaded;
        self.retention = retention;
    }
}
