//! Storage abstraction for versioned documents.
//!
//! This module defines the [`DocumentStore`] trait, the contract the
//! versioning engine needs from the underlying document database. Backends
//! exist for SQLite and for memory (tests).
//!
//! # Storage Model
//!
//! The store keeps two collections shared by every document type:
//! 1. **Documents**: current attributes plus the current version token
//! 2. **Versions**: immutable snapshots, ordered by a store-wide sequence
//!
//! # Concurrency
//!
//! The engine holds no locks of its own. Every guarantee it makes rests on
//! [`DocumentStore::conditional_update`] being a true compare-and-swap: the
//! token check and the write must be indivisible for every client of the
//! backing store, including other processes.

use crate::document::{Attributes, Document};
use crate::error::VersionedError;
use crate::reference::ObjectRef;
use crate::token::VersionToken;
use crate::version::{NewVersion, VersionFilter, VersionRecord};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, VersionedError>;

/// A tracked update ready to be written.
///
/// Bundles the compare-and-swap with the version record it produces, so
/// backends can commit both as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommit {
    /// Document being updated
    pub owner: ObjectRef,

    /// Token the caller last observed
    pub expected_token: VersionToken,

    /// Attributes to store
    pub attributes: Attributes,

    /// Token to store
    pub new_token: VersionToken,

    /// Version record describing the pre-update state
    pub version: NewVersion,
}

/// Trait for document storage backends.
pub trait DocumentStore: Send + Sync {
    /// Insert a new document.
    ///
    /// Fails with [`VersionedError::DocumentExists`] if the reference is taken;
    /// an existing document is never overwritten.
    fn insert_document(&self, doc: &Document) -> StorageResult<()>;

    /// Load a document with its current token.
    ///
    /// Returns `None` if the document doesn't exist.
    fn load_document(&self, owner: &ObjectRef) -> StorageResult<Option<Document>>;

    /// Delete a document (versions are left alone).
    ///
    /// Returns `true` if the document existed.
    fn delete_document(&self, owner: &ObjectRef) -> StorageResult<bool>;

    /// Atomically replace attributes and token if the stored token equals
    /// `expected_token`.
    ///
    /// Returns whether the token matched (and the write happened).
    fn conditional_update(
        &self,
        owner: &ObjectRef,
        expected_token: &VersionToken,
        attributes: &Attributes,
        new_token: &VersionToken,
    ) -> StorageResult<bool>;

    /// Create a version record, assigning its id and sequence.
    fn create_version(&self, version: NewVersion) -> StorageResult<VersionRecord>;

    /// List versions of `owner`, newest (highest sequence) first.
    fn list_versions(
        &self,
        owner: &ObjectRef,
        limit: Option<usize>,
    ) -> StorageResult<Vec<VersionRecord>>;

    /// Count versions of `owner`.
    fn count_versions(&self, owner: &ObjectRef) -> StorageResult<usize>;

    /// Delete versions of `owner` selected by `filter`.
    ///
    /// Returns the number of versions deleted. Never touches other owners.
    fn delete_versions(&self, owner: &ObjectRef, filter: VersionFilter) -> StorageResult<usize>;

    /// Delete a single version by id.
    ///
    /// Returns `true` if it existed.
    fn delete_version(&self, id: &str) -> StorageResult<bool>;

    /// Find a version by its storage id.
    fn find_version_by_id(&self, id: &str) -> StorageResult<Option<VersionRecord>>;

    /// Find the newest version of `owner` that carries `token`.
    fn find_version_by_token(
        &self,
        owner: &ObjectRef,
        token: &VersionToken,
    ) -> StorageResult<Option<VersionRecord>>;

    /// Write a tracked update: the compare-and-swap and the version record
    /// are committed as one unit.
    ///
    /// Returns `None` when the token did not match. In that case nothing is
    /// written, and no other caller ever observes the version. Backends must
    /// implement this with their own transaction or lock; composing
    /// [`create_version`](Self::create_version) and
    /// [`conditional_update`](Self::conditional_update) is not enough.
    fn commit_update(&self, commit: UpdateCommit) -> StorageResult<Option<VersionRecord>>;

    /// Delete a document and every version it owns, as one unit.
    ///
    /// Returns the number of versions deleted.
    fn destroy_document(&self, owner: &ObjectRef) -> StorageResult<usize>;
}
