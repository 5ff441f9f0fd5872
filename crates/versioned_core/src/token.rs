//! Version tokens for optimistic concurrency control.
//!
//! A [`VersionToken`] identifies the revision a document is at. Callers read
//! it before changing a document and present it back when writing; the store
//! only accepts the write if the token still matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::VersionedError;

/// Opaque revision token stored on every versioned document.
///
/// Generated tokens are random UUIDv4 values (122 random bits) rendered as
/// 32 lowercase hex characters, so independent documents never share one.
/// Deserializing goes through the same validation as [`FromStr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export, export_to = "bindings/")]
pub struct VersionToken(String);

impl VersionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the token, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionToken {
    type Err = VersionedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionedError::InvalidToken(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for VersionToken {
    type Error = VersionedError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VersionToken> for String {
    fn from(token: VersionToken) -> Self {
        token.0
    }
}

impl AsRef<str> for VersionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
