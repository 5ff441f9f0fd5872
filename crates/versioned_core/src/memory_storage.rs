//! In-memory storage implementation for testing.
//!
//! This provides a simple in-memory implementation of [`DocumentStore`]
//! for use in unit tests and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use uuid::Uuid;

use super::document::{Attributes, Document};
use super::error::VersionedError;
use super::reference::ObjectRef;
use super::store::{DocumentStore, StorageResult, UpdateCommit};
use super::token::VersionToken;
use super::version::{NewVersion, VersionFilter, VersionRecord};

/// In-memory document store for testing.
///
/// All collections live behind one `RwLock`, so a compare-and-swap and the
/// version it produces are applied under a single write guard. Cloning the
/// store shares the underlying data. Data is lost when the last clone drops.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Documents (owner -> stored document)
    docs: HashMap<ObjectRef, StoredDocument>,

    /// Version records in sequence order
    versions: Vec<VersionRecord>,

    /// Last sequence handed out
    last_sequence: i64,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    version_token: VersionToken,
    attributes: Attributes,
}

impl MemoryState {
    fn create_version(&mut self, version: NewVersion) -> VersionRecord {
        self.last_sequence += 1;
        let record = VersionRecord {
            id: Uuid::new_v4().to_string(),
            sequence: self.last_sequence,
            owner: version.owner,
            updater: version.updater,
            doc: version.doc,
            version_token: version.version_token,
            created_at: version.created_at.unwrap_or_else(Utc::now),
        };
        self.versions.push(record.clone());
        record
    }

    fn conditional_update(
        &mut self,
        owner: &ObjectRef,
        expected_token: &VersionToken,
        attributes: &Attributes,
        new_token: &VersionToken,
    ) -> bool {
        match self.docs.get_mut(owner) {
            Some(stored) if &stored.version_token == expected_token => {
                stored.attributes = attributes.clone();
                stored.version_token = new_token.clone();
                true
            }
            _ => false,
        }
    }

    fn delete_versions(&mut self, owner: &ObjectRef, filter: VersionFilter) -> usize {
        let before = self.versions.len();
        match filter {
            VersionFilter::All => self.versions.retain(|v| &v.owner != owner),
            VersionFilter::OlderThan(cutoff) => self
                .versions
                .retain(|v| &v.owner != owner || v.created_at >= cutoff),
            VersionFilter::KeepNewest(n) => {
                // `versions` is kept in ascending sequence order
                let kept: Vec<i64> = self
                    .versions
                    .iter()
                    .rev()
                    .filter(|v| &v.owner == owner)
                    .take(n)
                    .map(|v| v.sequence)
                    .collect();
                self.versions
                    .retain(|v| &v.owner != owner || kept.contains(&v.sequence));
            }
        }
        before - self.versions.len()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of version records across all owners.
    pub fn total_versions(&self) -> StorageResult<usize> {
        let state = self.state.read()?;
        Ok(state.versions.len())
    }

    /// Total number of documents across all types.
    pub fn total_documents(&self) -> StorageResult<usize> {
        let state = self.state.read()?;
        Ok(state.docs.len())
    }
}

impl DocumentStore for MemoryStore {
    fn insert_document(&self, doc: &Document) -> StorageResult<()> {
        let mut state = self.state.write()?;
        let owner = doc.reference();
        if state.docs.contains_key(&owner) {
            return Err(VersionedError::DocumentExists(owner));
        }
        state.docs.insert(
            owner,
            StoredDocument {
                version_token: doc.version_token().clone(),
                attributes: doc.attributes().clone(),
            },
        );
        Ok(())
    }

    fn load_document(&self, owner: &ObjectRef) -> StorageResult<Option<Document>> {
        let state = self.state.read()?;
        Ok(state.docs.get(owner).map(|stored| {
            Document::from_parts(
                owner.id.clone(),
                owner.type_tag.clone(),
                stored.version_token.clone(),
                stored.attributes.clone(),
            )
        }))
    }

    fn delete_document(&self, owner: &ObjectRef) -> StorageResult<bool> {
        let mut state = self.state.write()?;
        Ok(state.docs.remove(owner).is_some())
    }

    fn conditional_update(
        &self,
        owner: &ObjectRef,
        expected_token: &VersionToken,
        attributes: &Attributes,
        new_token: &VersionToken,
    ) -> StorageResult<bool> {
        let mut state = self.state.write()?;
        Ok(state.conditional_update(owner, expected_token, attributes, new_token))
    }

    fn create_version(&self, version: NewVersion) -> StorageResult<VersionRecord> {
        let mut state = self.state.write()?;
        Ok(state.create_version(version))
    }

    fn list_versions(
        &self,
        owner: &ObjectRef,
        limit: Option<usize>,
    ) -> StorageResult<Vec<VersionRecord>> {
        let state = self.state.read()?;
        Ok(state
            .versions
            .iter()
            .rev()
            .filter(|v| &v.owner == owner)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn count_versions(&self, owner: &ObjectRef) -> StorageResult<usize> {
        let state = self.state.read()?;
        Ok(state.versions.iter().filter(|v| &v.owner == owner).count())
    }

    fn delete_versions(&self, owner: &ObjectRef, filter: VersionFilter) -> StorageResult<usize> {
        let mut state = self.state.write()?;
        Ok(state.delete_versions(owner, filter))
    }

    fn delete_version(&self, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write()?;
        let before = state.versions.len();
        state.versions.retain(|v| v.id != id);
        Ok(state.versions.len() < before)
    }

    fn find_version_by_id(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        let state = self.state.read()?;
        Ok(state.versions.iter().find(|v| v.id == id).cloned())
    }

    fn find_version_by_token(
        &self,
        owner: &ObjectRef,
        token: &VersionToken,
    ) -> StorageResult<Option<VersionRecord>> {
        let state = self.state.read()?;
        Ok(state
            .versions
            .iter()
            .rev()
            .find(|v| &v.owner == owner && &v.version_token == token)
            .cloned())
    }

    fn commit_update(&self, commit: UpdateCommit) -> StorageResult<Option<VersionRecord>> {
        let mut state = self.state.write()?;
        if !state.conditional_update(
            &commit.owner,
            &commit.expected_token,
            &commit.attributes,
            &commit.new_token,
        ) {
            return Ok(None);
        }
        Ok(Some(state.create_version(commit.version)))
    }

    fn destroy_document(&self, owner: &ObjectRef) -> StorageResult<usize> {
        let mut state = self.state.write()?;
        state.docs.remove(owner);
        Ok(state.delete_versions(owner, VersionFilter::All))
    }
}
