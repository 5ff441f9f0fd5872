//! Version records: immutable snapshots of a document's pre-update state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::document::Attributes;
use crate::reference::ObjectRef;
use crate::token::VersionToken;

/// An immutable snapshot of a document taken just before an update.
///
/// Records are ordered by `sequence`, which the store assigns from a single
/// strictly increasing counter. `created_at` is informational only; two
/// records may share a timestamp but never a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VersionRecord {
    /// Unique id assigned by the store
    pub id: String,

    /// Store-wide ordering key
    pub sequence: i64,

    /// Document that produced this version
    pub owner: ObjectRef,

    /// Actor that performed the update, if the caller supplied one
    pub updater: Option<ObjectRef>,

    /// Owner attributes before the update, without id or token
    #[ts(type = "Record<string, unknown>")]
    pub doc: Attributes,

    /// Token the owner carried when the snapshot was taken
    pub version_token: VersionToken,

    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

impl VersionRecord {
    /// Read one snapshot attribute.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.doc.get(field)
    }

    /// Read one string snapshot attribute.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.doc.get(field).and_then(serde_json::Value::as_str)
    }

    /// Whether this record belongs to `owner`.
    pub fn is_owned_by(&self, owner: &ObjectRef) -> bool {
        &self.owner == owner
    }
}

/// Input for creating a version record. The store fills in id and sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    /// Document that produced this version
    pub owner: ObjectRef,

    /// Actor that performed the update
    pub updater: Option<ObjectRef>,

    /// Pre-update snapshot
    pub doc: Attributes,

    /// Token active when the snapshot was taken
    pub version_token: VersionToken,

    /// Explicit creation time; the store uses the current time when unset
    pub created_at: Option<DateTime<Utc>>,
}

/// Selects which versions of one owner a bulk delete removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionFilter {
    /// Every version of the owner
    All,

    /// Versions created strictly before the instant
    OlderThan(DateTime<Utc>),

    /// Every version except the `n` with the highest sequence
    KeepNewest(usize),
}

/// Ways to look up a single version of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionLookup {
    /// By the record's storage id
    Id(String),

    /// By the token the owner carried when the snapshot was taken
    Token(VersionToken),
}

impl std::fmt::Display for VersionLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionLookup::Id(id) => write!(f, "id {}", id),
            VersionLookup::Token(token) => write!(f, "token {}", token),
        }
    }
}

/// An index the version collection needs for efficient listing and pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name
    pub name: &'static str,

    /// Indexed columns, in order, with their sort direction
    pub columns: &'static [(&'static str, SortOrder)],
}

/// Sort direction of an index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    /// SQL keyword for the direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Indexes required on the version collection.
///
/// Listing is newest-first by sequence, count pruning walks oldest-first by
/// sequence, and age pruning filters on creation time, all scoped to one
/// owner. A token can appear on more than one record of an owner once a
/// rollback has restored it, so the token index is not unique.
pub const REQUIRED_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "idx_versions_owner_created_at",
        columns: &[
            ("owner_id", SortOrder::Asc),
            ("owner_type", SortOrder::Asc),
            ("created_at", SortOrder::Desc),
        ],
    },
    IndexSpec {
        name: "idx_versions_owner_sequence_desc",
        columns: &[
            ("owner_id", SortOrder::Asc),
            ("owner_type", SortOrder::Asc),
            ("sequence", SortOrder::Desc),
        ],
    },
    IndexSpec {
        name: "idx_versions_owner_sequence_asc",
        columns: &[
            ("owner_id", SortOrder::Asc),
            ("owner_type", SortOrder::Asc),
            ("sequence", SortOrder::Asc),
        ],
    },
    IndexSpec {
        name: "idx_versions_owner_token",
        columns: &[
            ("owner_id", SortOrder::Asc),
            ("owner_type", SortOrder::Asc),
            ("version_token", SortOrder::Asc),
        ],
    },
];
