//! Retention policies bounding version history.
//!
//! Pruning runs after every successful update or rollback and can also be
//! triggered directly. An age limit, when present, always wins over a count
//! limit. Re-running a prune when history is already within policy deletes
//! nothing.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::reference::ObjectRef;
use crate::store::DocumentStore;
use crate::version::VersionFilter;

/// How much version history to keep for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Never prune.
    #[default]
    KeepAll,

    /// Keep only the newest `n` versions.
    MaxCount(usize),

    /// Keep only versions created within the duration.
    MaxAge(Duration),
}

impl RetentionPolicy {
    /// Resolve a policy from optional count and age limits.
    ///
    /// The age limit takes priority. A count limit of zero means unlimited.
    pub fn resolve(max_versions: Option<usize>, keep_versions_for: Option<Duration>) -> Self {
        match (keep_versions_for, max_versions) {
            (Some(age), _) => RetentionPolicy::MaxAge(age),
            (None, Some(max)) if max > 0 => RetentionPolicy::MaxCount(max),
            _ => RetentionPolicy::KeepAll,
        }
    }

    /// Versions created before this instant are expired under an age policy.
    pub fn keep_versions_created_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RetentionPolicy::MaxAge(age) => now.checked_sub_signed(*age),
            _ => None,
        }
    }

    /// The bulk delete that enforces this policy at `now`.
    ///
    /// Each filter is a single store operation, so pruners racing on the same
    /// document cannot delete more than the policy allows between them.
    pub fn prune_filter(&self, now: DateTime<Utc>) -> Option<VersionFilter> {
        match self {
            RetentionPolicy::KeepAll => None,
            RetentionPolicy::MaxCount(max) => Some(VersionFilter::KeepNewest(*max)),
            // An age reaching past the earliest representable instant expires nothing
            RetentionPolicy::MaxAge(_) => self
                .keep_versions_created_before(now)
                .map(VersionFilter::OlderThan),
        }
    }
}

/// Enforce `policy` on the versions of `owner`.
///
/// Returns the number of versions deleted.
pub fn prune(
    store: &dyn DocumentStore,
    owner: &ObjectRef,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    match policy.prune_filter(now) {
        Some(filter) => {
            let deleted = store.delete_versions(owner, filter)?;
            if deleted > 0 {
                log::debug!("Pruned {} versions of {} ({:?})", deleted, owner, policy);
            }
            Ok(deleted)
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::config::{TypePolicy, VersioningConfig};
    use crate::context::OperationContext;
    use crate::document::{Attributes, Document};
    use crate::memory_storage::MemoryStore;
    use crate::store::{StorageResult, UpdateCommit};
    use crate::token::VersionToken;
    use crate::version::{NewVersion, VersionRecord};
    use crate::versioner::Versioner;

    /// Holds every bulk delete until two callers have reached it.
    struct GatedStore {
        inner: MemoryStore,
        gate: Barrier,
    }

    impl DocumentStore for GatedStore {
        fn insert_document(&self, doc: &Document) -> StorageResult<()> {
            self.inner.insert_document(doc)
        }

        fn load_document(&self, owner: &ObjectRef) -> StorageResult<Option<Document>> {
            self.inner.load_document(owner)
        }

        fn delete_document(&self, owner: &ObjectRef) -> StorageResult<bool> {
            self.inner.delete_document(owner)
        }

        fn conditional_update(
            &self,
            owner: &ObjectRef,
            expected_token: &VersionToken,
            attributes: &Attributes,
            new_token: &VersionToken,
        ) -> StorageResult<bool> {
            self.inner
                .conditional_update(owner, expected_token, attributes, new_token)
        }

        fn create_version(&self, version: NewVersion) -> StorageResult<VersionRecord> {
            self.inner.create_version(version)
        }

        fn list_versions(
            &self,
            owner: &ObjectRef,
            limit: Option<usize>,
        ) -> StorageResult<Vec<VersionRecord>> {
            self.inner.list_versions(owner, limit)
        }

        fn count_versions(&self, owner: &ObjectRef) -> StorageResult<usize> {
            self.inner.count_versions(owner)
        }

        fn delete_versions(
            &self,
            owner: &ObjectRef,
            filter: VersionFilter,
        ) -> StorageResult<usize> {
            self.gate.wait();
            self.inner.delete_versions(owner, filter)
        }

        fn delete_version(&self, id: &str) -> StorageResult<bool> {
            self.inner.delete_version(id)
        }

        fn find_version_by_id(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
            self.inner.find_version_by_id(id)
        }

        fn find_version_by_token(
            &self,
            owner: &ObjectRef,
            token: &VersionToken,
        ) -> StorageResult<Option<VersionRecord>> {
            self.inner.find_version_by_token(owner, token)
        }

        fn commit_update(&self, commit: UpdateCommit) -> StorageResult<Option<VersionRecord>> {
            self.inner.commit_update(commit)
        }

        fn destroy_document(&self, owner: &ObjectRef) -> StorageResult<usize> {
            self.inner.destroy_document(owner)
        }
    }

    #[test]
    fn test_concurrent_count_prunes_keep_max() {
        let inner = MemoryStore::new();
        let writer = Versioner::new(Arc::new(inner.clone()), VersioningConfig::new());
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), json!("Alex Wolfe"));
        let mut user = writer.create("user", attributes).unwrap();
        for i in 1..=7 {
            user.set("name", format!("Alex {}", i)).unwrap();
            writer.update(&mut user, &OperationContext::new()).unwrap();
        }

        // Both pruners reach the store before either deletes anything
        let gated = Arc::new(GatedStore {
            inner: inner.clone(),
            gate: Barrier::new(2),
        });
        let config = VersioningConfig::new().with_policy("user", TypePolicy::max_versions(5));
        let versioner = Arc::new(Versioner::new(gated, config));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let versioner = Arc::clone(&versioner);
                let user = user.clone();
                thread::spawn(move || versioner.prune_versions(&user).unwrap())
            })
            .collect();
        let pruned: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(pruned, 2);
        let names: Vec<_> = inner
            .list_versions(&user.reference(), None)
            .unwrap()
            .iter()
            .map(|v| v.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Alex 6", "Alex 5", "Alex 4", "Alex 3", "Alex 2"]);
    }

    #[test]
    fn test_resolve_age_takes_priority() {
        let age = Duration::minutes(5);
        assert_eq!(
            RetentionPolicy::resolve(Some(10), Some(age)),
            RetentionPolicy::MaxAge(age)
        );
        assert_eq!(
            RetentionPolicy::resolve(Some(10), None),
            RetentionPolicy::MaxCount(10)
        );
        assert_eq!(RetentionPolicy::resolve(None, None), RetentionPolicy::KeepAll);
        assert_eq!(RetentionPolicy::resolve(Some(0), None), RetentionPolicy::KeepAll);
    }

    #[test]
    fn test_count_filter() {
        let policy = RetentionPolicy::MaxCount(5);
        assert_eq!(policy.prune_filter(Utc::now()), Some(VersionFilter::KeepNewest(5)));
    }

    #[test]
    fn test_age_filter() {
        let now = Utc::now();
        let policy = RetentionPolicy::MaxAge(Duration::minutes(5));
        assert_eq!(
            policy.prune_filter(now),
            Some(VersionFilter::OlderThan(now - Duration::minutes(5)))
        );
        assert_eq!(
            policy.keep_versions_created_before(now),
            Some(now - Duration::minutes(5))
        );
        assert_eq!(RetentionPolicy::KeepAll.keep_versions_created_before(now), None);
    }

    #[test]
    fn test_unbounded_age_expires_nothing() {
        let policy = RetentionPolicy::MaxAge(Duration::MAX);
        assert_eq!(policy.prune_filter(Utc::now()), None);
    }

    #[test]
    fn test_keep_all_never_prunes() {
        assert_eq!(RetentionPolicy::KeepAll.prune_filter(Utc::now()), None);
    }
}
