//! Per-operation context for tracked updates.
//!
//! The updater and the rolling-back state belong to one call, not to the
//! document, so two operations on the same in-memory document never see
//! each other's flags. A context is dropped when its operation ends, which
//! is what returns the document to the normal state.

use chrono::{DateTime, Utc};

use crate::reference::ObjectRef;
use crate::token::VersionToken;

/// Whether an update is ordinary or replays an old snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OperationMode {
    /// A caller-driven edit; a fresh token is generated.
    #[default]
    Normal,

    /// Replaying a version; its token is restored instead of generating one.
    RollingBack {
        /// Token of the version being restored
        token: VersionToken,
    },
}

/// Options for a single update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    updater: Option<ObjectRef>,
    mode: OperationMode,
    version_created_at: Option<DateTime<Utc>>,
}

impl OperationContext {
    /// A normal update with no updater.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for replaying the version carrying `token`.
    pub(crate) fn rolling_back(token: VersionToken) -> Self {
        Self {
            mode: OperationMode::RollingBack { token },
            ..Self::default()
        }
    }

    /// Attribute the resulting version to `updater`.
    pub fn with_updater(mut self, updater: ObjectRef) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Set or clear the updater.
    pub fn with_optional_updater(mut self, updater: Option<ObjectRef>) -> Self {
        self.updater = updater;
        self
    }

    /// Stamp the resulting version with an explicit creation time.
    pub fn with_version_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.version_created_at = Some(created_at);
        self
    }

    /// Actor performing this update.
    pub fn updater(&self) -> Option<&ObjectRef> {
        self.updater.as_ref()
    }

    /// Mode of this update.
    pub fn mode(&self) -> &OperationMode {
        &self.mode
    }

    /// Whether this update replays an old version.
    pub fn is_rolling_back(&self) -> bool {
        matches!(self.mode, OperationMode::RollingBack { .. })
    }

    /// Explicit creation time for the version, if any.
    pub fn version_created_at(&self) -> Option<DateTime<Utc>> {
        self.version_created_at
    }

    /// Token to store after a successful write.
    pub(crate) fn next_token(&self) -> VersionToken {
        match &self.mode {
            OperationMode::Normal => VersionToken::generate(),
            OperationMode::RollingBack { token } => token.clone(),
        }
    }
}
