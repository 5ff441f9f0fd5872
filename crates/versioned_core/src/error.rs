use serde::Serialize;
use thiserror::Error;

use crate::reference::ObjectRef;
use crate::token::VersionToken;

/// Unified error type for versioning operations
#[derive(Debug, Error)]
pub enum VersionedError {
    // Concurrency errors
    /// The presented token no longer matches the stored one.
    #[error("Conflicting version for {owner}: current token is {}", display_token(.current_token))]
    ConflictingVersion {
        /// Document the update was aimed at
        owner: ObjectRef,
        /// Token stored at the time of the failed write, if the document still exists
        current_token: Option<VersionToken>,
    },

    // Rollback errors
    /// A snapshot carries fields the document type no longer accepts.
    #[error("Trying to load a {doc_type} version that has unsupported attributes: {}", .fields.join(", "))]
    UnsupportedAttributes {
        /// Type tag of the document being rolled back
        doc_type: String,
        /// Offending snapshot fields
        fields: Vec<String>,
    },

    /// No version matches the lookup.
    #[error("Version not found: {0}")]
    VersionNotFound(String),

    /// A document with this reference already exists.
    #[error("Document already exists: {0}")]
    DocumentExists(ObjectRef),

    /// The referenced document does not exist.
    #[error("Document not found: {0}")]
    DocumentNotFound(ObjectRef),

    /// A reference names a type with no registered loader.
    #[error("No loader registered for reference type '{0}'")]
    UnknownReferenceType(String),

    /// A token failed to parse.
    #[error("Invalid version token: '{0}'")]
    InvalidToken(String),

    /// Attempt to set a field managed by the engine.
    #[error("Field '{0}' is reserved and cannot be set directly")]
    ReservedField(String),

    // Storage errors
    /// The backing store cannot be reached or its lock is poisoned.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// SQLite failure.
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Attribute (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config errors
    /// Invalid config file.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config could not be written as TOML.
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

fn display_token(token: &Option<VersionToken>) -> String {
    match token {
        Some(token) => token.to_string(),
        None => "<deleted>".to_string(),
    }
}

/// Result type alias for versioning operations
pub type Result<T> = std::result::Result<T, VersionedError>;

impl VersionedError {
    /// Whether this error is a lost compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, VersionedError::ConflictingVersion { .. })
    }

    /// Current token carried by a conflict error.
    pub fn current_token(&self) -> Option<&VersionToken> {
        match self {
            VersionedError::ConflictingVersion { current_token, .. } => current_token.as_ref(),
            _ => None,
        }
    }

    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

impl<T> From<std::sync::PoisonError<T>> for VersionedError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VersionedError::StoreUnavailable(format!("lock poisoned: {}", err))
    }
}

/// A serializable representation of VersionedError for IPC
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Current token for conflict errors
    pub current_token: Option<String>,
    /// Offending fields for unsupported attribute errors
    pub fields: Option<Vec<String>>,
}

impl From<&VersionedError> for SerializableError {
    fn from(err: &VersionedError) -> Self {
        let kind = match err {
            VersionedError::ConflictingVersion { .. } => "ConflictingVersion",
            VersionedError::UnsupportedAttributes { .. } => "UnsupportedAttributes",
            VersionedError::VersionNotFound(_) => "VersionNotFound",
            VersionedError::DocumentExists(_) => "DocumentExists",
            VersionedError::DocumentNotFound(_) => "DocumentNotFound",
            VersionedError::UnknownReferenceType(_) => "UnknownReferenceType",
            VersionedError::InvalidToken(_) => "InvalidToken",
            VersionedError::ReservedField(_) => "ReservedField",
            VersionedError::StoreUnavailable(_) => "StoreUnavailable",
            #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
            VersionedError::Database(_) => "Database",
            VersionedError::Json(_) => "Json",
            VersionedError::Io(_) => "Io",
            VersionedError::ConfigParse(_) => "ConfigParse",
            VersionedError::ConfigSerialize(_) => "ConfigSerialize",
        }
        .to_string();

        let fields = match err {
            VersionedError::UnsupportedAttributes { fields, .. } => Some(fields.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            current_token: err.current_token().map(|t| t.to_string()),
            fields,
        }
    }
}

impl From<VersionedError> for SerializableError {
    fn from(err: VersionedError) -> Self {
        SerializableError::from(&err)
    }
}
