//! Restoring a document to an earlier version.
//!
//! A rollback is an ordinary tracked update whose new attributes come from a
//! version snapshot and whose new token is the snapshot's token. History is
//! append-only: the state being replaced is recorded as a new version and
//! nothing is deleted apart from the usual retention pruning afterwards.

use crate::context::OperationContext;
use crate::document::Document;
use crate::error::{Result, VersionedError};
use crate::reference::ObjectRef;
use crate::version::{VersionLookup, VersionRecord};
use crate::versioner::{UpdateOutcome, Versioner};

impl Versioner {
    /// Roll `doc` back to `target`.
    ///
    /// The target is re-read from the store first, so a version pruned since
    /// it was listed is reported as missing.
    ///
    /// # Errors
    ///
    /// - [`VersionedError::VersionNotFound`] if the target no longer exists or
    ///   belongs to another document
    /// - [`VersionedError::UnsupportedAttributes`] if the snapshot carries
    ///   fields the type no longer accepts; nothing is changed
    /// - [`VersionedError::ConflictingVersion`] if `doc` is stale
    pub fn rollback(
        &self,
        doc: &mut Document,
        target: &VersionRecord,
        updater: Option<ObjectRef>,
    ) -> Result<UpdateOutcome> {
        let owner = doc.reference();
        let current = self
            .store()
            .find_version_by_id(&target.id)?
            .filter(|v| v.is_owned_by(&owner))
            .ok_or_else(|| VersionedError::VersionNotFound(format!("id {}", target.id)))?;
        self.restore(doc, current, updater)
    }

    /// Roll `doc` back to the version matching `lookup`.
    ///
    /// A token lookup picks the newest version carrying that token.
    pub fn rollback_to(
        &self,
        doc: &mut Document,
        lookup: &VersionLookup,
        updater: Option<ObjectRef>,
    ) -> Result<UpdateOutcome> {
        let target = self
            .find_version(doc, lookup)?
            .ok_or_else(|| VersionedError::VersionNotFound(lookup.to_string()))?;
        self.restore(doc, target, updater)
    }

    fn restore(
        &self,
        doc: &mut Document,
        target: VersionRecord,
        updater: Option<ObjectRef>,
    ) -> Result<UpdateOutcome> {
        let unsupported = self
            .config()
            .policy_for(doc.doc_type())
            .unsupported_fields(&target.doc);
        if !unsupported.is_empty() {
            return Err(VersionedError::UnsupportedAttributes {
                doc_type: doc.doc_type().to_string(),
                fields: unsupported,
            });
        }

        log::info!(
            "Rolling back {} to version {} (token {})",
            doc.reference(),
            target.id,
            target.version_token
        );

        let ctx = OperationContext::rolling_back(target.version_token.clone())
            .with_optional_updater(updater);
        let previous = doc.replace_attributes(target.doc);

        match self.update(doc, &ctx) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                doc.replace_attributes(previous);
                Err(e)
            }
        }
    }
}
