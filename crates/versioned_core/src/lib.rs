#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options (retention limits and attribute schemas per type)
pub mod config;

/// Per-call update options (updater, rollback mode)
pub mod context;

/// Attribute diffs and pre-update snapshots
pub mod diff;

/// Tracked documents with dirty tracking
pub mod document;

/// Error (common error types)
pub mod error;

/// In-memory document store
pub mod memory_storage;

/// Polymorphic references and their loaders
pub mod reference;

/// Retention policies and pruning
pub mod retention;

/// Rollback to earlier versions
pub mod rollback;

/// SQLite document store
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub mod sqlite_storage;

/// Storage abstraction
pub mod store;

/// Version tokens
pub mod token;

/// Version records
pub mod version;

/// Versioning engine
pub mod versioner;

pub use config::{TypePolicy, VersioningConfig};
pub use context::{OperationContext, OperationMode};
pub use diff::{AttributeChange, ChangeSet};
pub use document::{Attributes, Document};
pub use error::{Result, SerializableError, VersionedError};
pub use memory_storage::MemoryStore;
pub use reference::{ObjectRef, ReferenceLoader, ReferenceResolver};
pub use retention::RetentionPolicy;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_storage::SqliteStore;
pub use store::{DocumentStore, StorageResult, UpdateCommit};
pub use token::VersionToken;
pub use version::{NewVersion, VersionFilter, VersionLookup, VersionRecord};
pub use versioner::{UpdateOutcome, Versioner};
