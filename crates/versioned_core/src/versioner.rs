//! The versioning engine.
//!
//! [`Versioner`] is what application code talks to. Every update goes
//! through the same path:
//!
//! 1. collect the document's pending [`ChangeSet`](crate::ChangeSet); stop if empty
//! 2. build the pre-update snapshot
//! 3. commit the compare-and-swap and the version record together
//! 4. on success, rotate the in-memory token and prune old versions
//!
//! A lost race surfaces as [`VersionedError::ConflictingVersion`] carrying
//! the current token. The engine never retries on its own.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use versioned_core::{MemoryStore, OperationContext, Versioner, VersioningConfig};
//!
//! let versioner = Versioner::new(Arc::new(MemoryStore::new()), VersioningConfig::new());
//! let mut user = versioner.create("user", attributes)?;
//!
//! user.set("name", "alex")?;
//! let outcome = versioner.update(&mut user, &OperationContext::new())?;
//! assert!(outcome.version.is_some());
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::VersioningConfig;
use crate::context::OperationContext;
use crate::document::{Attributes, Document, is_reserved_field};
use crate::error::{Result, VersionedError};
use crate::reference::{ObjectRef, ReferenceResolver};
use crate::retention::{self, RetentionPolicy};
use crate::store::{DocumentStore, UpdateCommit};
use crate::token::VersionToken;
use crate::version::{NewVersion, VersionLookup, VersionRecord};

/// Result of a successful update or rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Version written for this update; `None` for a no-op update
    pub version: Option<VersionRecord>,

    /// Token the document carries after the update
    pub version_token: VersionToken,

    /// Number of old versions pruned afterwards
    pub pruned: usize,

    /// Pruning failure, if any. The update itself still succeeded.
    pub prune_error: Option<String>,
}

impl UpdateOutcome {
    fn unchanged(version_token: VersionToken) -> Self {
        Self {
            version: None,
            version_token,
            pruned: 0,
            prune_error: None,
        }
    }

    /// Whether the update changed nothing and wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.version.is_none()
    }
}

/// Versioning engine bound to one store and one configuration.
pub struct Versioner {
    store: Arc<dyn DocumentStore>,
    config: VersioningConfig,
    resolver: ReferenceResolver,
}

impl Versioner {
    /// Create an engine over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: VersioningConfig) -> Self {
        Self {
            store,
            config,
            resolver: ReferenceResolver::new(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    /// Registry used by [`Versioner::resolve`].
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Create and persist a new document.
    pub fn create(&self, doc_type: impl Into<String>, attributes: Attributes) -> Result<Document> {
        let doc = Document::new(doc_type, attributes);
        self.store.insert_document(&doc)?;
        log::debug!("Created {} at token {}", doc.reference(), doc.version_token());
        Ok(doc)
    }

    /// Load a document by reference.
    pub fn load(&self, reference: &ObjectRef) -> Result<Document> {
        self.store
            .load_document(reference)?
            .ok_or_else(|| VersionedError::DocumentNotFound(reference.clone()))
    }

    /// Replace `doc` with its stored state, dropping pending edits.
    pub fn reload(&self, doc: &mut Document) -> Result<()> {
        let loaded = self.load(&doc.reference())?;
        doc.refresh_from(loaded);
        Ok(())
    }

    /// Persist the document's pending changes as a tracked update.
    ///
    /// With no pending changes this is a no-op: nothing is written, the token
    /// stays put and no version is recorded.
    ///
    /// # Errors
    ///
    /// [`VersionedError::ConflictingVersion`] if another writer updated the
    /// document since `doc` was read. `doc` keeps its pending changes so the
    /// caller can reload and reapply them.
    pub fn update(&self, doc: &mut Document, ctx: &OperationContext) -> Result<UpdateOutcome> {
        let owner = doc.reference();
        let changes = doc.changes();
        let next_token = ctx.next_token();
        // A rollback that only restores the token still has to be written.
        let restores_token = ctx.is_rolling_back() && &next_token != doc.version_token();

        if changes.is_empty() && !restores_token {
            log::debug!("Skipping version for {}: no changes", owner);
            return Ok(UpdateOutcome::unchanged(doc.version_token().clone()));
        }

        let commit = UpdateCommit {
            owner: owner.clone(),
            expected_token: doc.version_token().clone(),
            attributes: doc.attributes().clone(),
            new_token: next_token.clone(),
            version: NewVersion {
                owner: owner.clone(),
                updater: ctx.updater().cloned(),
                doc: changes.snapshot(doc.attributes()),
                version_token: doc.version_token().clone(),
                created_at: ctx.version_created_at(),
            },
        };

        let version = match self.store.commit_update(commit)? {
            Some(version) => version,
            None => {
                let current_token = self.current_token(&owner);
                log::debug!(
                    "Conflicting version for {}: expected {}, found {:?}",
                    owner,
                    doc.version_token(),
                    current_token
                );
                return Err(VersionedError::ConflictingVersion {
                    owner,
                    current_token,
                });
            }
        };

        log::debug!(
            "Updated {} ({} fields), version {} at sequence {}",
            owner,
            changes.len(),
            version.id,
            version.sequence
        );
        doc.mark_persisted(next_token.clone());

        let (pruned, prune_error) = match self.prune_versions(doc) {
            Ok(pruned) => (pruned, None),
            Err(e) => {
                log::warn!("Failed to prune versions of {}: {}", owner, e);
                (0, Some(e.to_string()))
            }
        };

        Ok(UpdateOutcome {
            version: Some(version),
            version_token: next_token,
            pruned,
            prune_error,
        })
    }

    /// Apply `changes` to `doc`, then [`update`](Self::update) it.
    ///
    /// Reserved fields in `changes` are rejected before anything is applied.
    pub fn update_with(
        &self,
        doc: &mut Document,
        changes: Attributes,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome> {
        if let Some(field) = changes.keys().find(|field| is_reserved_field(field)) {
            return Err(VersionedError::ReservedField(field.clone()));
        }
        for (field, value) in changes {
            doc.set(field, value)?;
        }
        self.update(doc, ctx)
    }

    /// Versions of `doc`, newest first.
    pub fn versions(&self, doc: &Document) -> Result<Vec<VersionRecord>> {
        self.store.list_versions(&doc.reference(), None)
    }

    /// The newest `limit` versions of `doc`.
    pub fn versions_limited(&self, doc: &Document, limit: usize) -> Result<Vec<VersionRecord>> {
        self.store.list_versions(&doc.reference(), Some(limit))
    }

    /// Number of versions of `doc`.
    pub fn version_count(&self, doc: &Document) -> Result<usize> {
        self.store.count_versions(&doc.reference())
    }

    /// Look up one version of `doc` by id or token.
    ///
    /// Ids belonging to another document resolve to `None`.
    pub fn find_version(
        &self,
        doc: &Document,
        lookup: &VersionLookup,
    ) -> Result<Option<VersionRecord>> {
        let owner = doc.reference();
        match lookup {
            VersionLookup::Id(id) => Ok(self
                .store
                .find_version_by_id(id)?
                .filter(|v| v.is_owned_by(&owner))),
            VersionLookup::Token(token) => self.store.find_version_by_token(&owner, token),
        }
    }

    /// Retention policy in effect for `doc`.
    ///
    /// A per-instance override wins over the type's configuration.
    pub fn retention_for(&self, doc: &Document) -> RetentionPolicy {
        doc.retention()
            .unwrap_or_else(|| self.config.policy_for(doc.doc_type()).retention())
    }

    /// Prune versions of `doc` according to its retention policy.
    pub fn prune_versions(&self, doc: &Document) -> Result<usize> {
        self.prune_versions_at(doc, Utc::now())
    }

    /// Prune as if the current time were `now`.
    pub fn prune_versions_at(&self, doc: &Document, now: DateTime<Utc>) -> Result<usize> {
        retention::prune(
            self.store.as_ref(),
            &doc.reference(),
            self.retention_for(doc),
            now,
        )
    }

    /// Delete `doc` and all of its versions.
    ///
    /// Returns the number of versions deleted.
    pub fn destroy(&self, doc: &Document) -> Result<usize> {
        let owner = doc.reference();
        let deleted = self.store.destroy_document(&owner)?;
        log::info!("Destroyed {} and {} versions", owner, deleted);
        Ok(deleted)
    }

    /// Resolve a polymorphic reference.
    ///
    /// Registered loaders take precedence; other types are looked up in the
    /// document store.
    pub fn resolve(&self, reference: &ObjectRef) -> Result<Option<Document>> {
        match self.resolver.resolve(reference)? {
            Some(found) => Ok(found),
            None => self.store.load_document(reference),
        }
    }

    /// Resolve the actor recorded on a version.
    pub fn updater_of(&self, version: &VersionRecord) -> Result<Option<Document>> {
        match &version.updater {
            Some(updater) => self.resolve(updater),
            None => Ok(None),
        }
    }

    /// Best-effort read of the stored token after a failed swap.
    fn current_token(&self, owner: &ObjectRef) -> Option<VersionToken> {
        match self.store.load_document(owner) {
            Ok(found) => found.map(|doc| doc.version_token().clone()),
            Err(e) => {
                log::warn!("Could not read current token of {}: {}", owner, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for Versioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Versioner")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
