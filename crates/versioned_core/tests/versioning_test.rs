//! Integration tests for versioning and optimistic concurrency.
//!
//! Every scenario runs against each document store backend.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};
use serde_json::json;
use versioned_core::{
    Attributes, Document, DocumentStore, MemoryStore, OperationContext, TypePolicy,
    VersionLookup, VersionedError, Versioner, VersioningConfig,
};

fn alex_attributes() -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("name".to_string(), json!("Alex Wolfe"));
    attributes.insert("email".to_string(), json!("alexkwolfe@gmail.com"));
    attributes
}

fn rename(versioner: &Versioner, doc: &mut Document, name: &str) {
    doc.set("name", name).unwrap();
    versioner.update(doc, &OperationContext::new()).unwrap();
}

fn names(versioner: &Versioner, doc: &Document) -> Vec<String> {
    versioner
        .versions(doc)
        .unwrap()
        .iter()
        .map(|v| v.get_str("name").unwrap_or_default().to_string())
        .collect()
}

fn no_op_update_writes_nothing(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    let token = user.version_token().clone();

    let outcome = versioner.update(&mut user, &OperationContext::new()).unwrap();

    assert!(outcome.is_noop());
    assert_eq!(user.version_token(), &token);
    assert_eq!(versioner.version_count(&user).unwrap(), 0);
}

fn each_update_adds_one_version(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    let mut seen = vec![user.version_token().clone()];

    for i in 1..=5 {
        rename(&versioner, &mut user, &format!("Alex {}", i));
        assert_eq!(versioner.version_count(&user).unwrap(), i);
        assert!(!seen.contains(user.version_token()));
        seen.push(user.version_token().clone());
    }

    let versions = versioner.versions(&user).unwrap();
    assert!(versions.windows(2).all(|w| w[0].sequence > w[1].sequence));
    assert!(versions.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert_eq!(
        names(&versioner, &user),
        vec!["Alex 4", "Alex 3", "Alex 2", "Alex 1", "Alex Wolfe"]
    );
    // Each version carries the token the document had before that update
    let tokens: Vec<_> = versions.iter().rev().map(|v| v.version_token.clone()).collect();
    assert_eq!(tokens, seen[..5]);
}

fn rollback_keeps_history(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    let original_token = user.version_token().clone();

    rename(&versioner, &mut user, "alex");
    let target = versioner.versions(&user).unwrap().remove(0);
    versioner.rollback(&mut user, &target, None).unwrap();

    assert_eq!(user.get_str("name"), Some("Alex Wolfe"));
    assert_eq!(user.version_token(), &original_token);
    assert_eq!(names(&versioner, &user), vec!["alex", "Alex Wolfe"]);

    let stored = versioner.load(&user.reference()).unwrap();
    assert_eq!(stored.get_str("name"), Some("Alex Wolfe"));
    assert_eq!(stored.version_token(), &original_token);
}

fn rollback_to_middle_version(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    for i in 1..=5 {
        rename(&versioner, &mut user, &format!("Alex {}", i));
    }

    let target = versioner.versions(&user).unwrap().remove(2);
    versioner.rollback(&mut user, &target, None).unwrap();

    assert_eq!(user.get_str("name"), Some("Alex 2"));
    assert_eq!(user.version_token(), &target.version_token);
    assert_eq!(versioner.version_count(&user).unwrap(), 6);
    assert_eq!(versioner.versions(&user).unwrap()[0].get_str("name"), Some("Alex 5"));

    // The restored token now occurs twice; token lookup prefers the newest
    rename(&versioner, &mut user, "Alex 6");
    let found = versioner
        .find_version(&user, &VersionLookup::Token(target.version_token.clone()))
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("name"), Some("Alex 2"));
    assert!(found.sequence > target.sequence);
}

fn stale_writer_conflicts(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut first = versioner.create("user", alex_attributes()).unwrap();
    let mut second = versioner.load(&first.reference()).unwrap();

    rename(&versioner, &mut first, "first");
    second.set("name", "second").unwrap();
    let err = versioner
        .update(&mut second, &OperationContext::new())
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(err.current_token(), Some(first.version_token()));
    assert_eq!(versioner.version_count(&first).unwrap(), 1);

    // Reload, reapply, retry
    versioner.reload(&mut second).unwrap();
    assert_eq!(second.get_str("name"), Some("first"));
    rename(&versioner, &mut second, "second");
    assert_eq!(names(&versioner, &second), vec!["first", "Alex Wolfe"]);
}

fn racing_writers_one_wins(store: Arc<dyn DocumentStore>) {
    let versioner = Arc::new(Versioner::new(store, VersioningConfig::new()));
    let user = versioner.create("user", alex_attributes()).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let versioner = Arc::clone(&versioner);
            let barrier = Arc::clone(&barrier);
            let mut doc = user.clone();
            thread::spawn(move || {
                doc.set("name", name).unwrap();
                barrier.wait();
                versioner.update(&mut doc, &OperationContext::new())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(versioner.version_count(&user).unwrap(), 1);
}

fn count_retention(store: Arc<dyn DocumentStore>) {
    let config = VersioningConfig::new().with_policy("user", TypePolicy::max_versions(5));
    let versioner = Versioner::new(store, config);
    let mut user = versioner.create("user", alex_attributes()).unwrap();

    for i in 1..=21 {
        rename(&versioner, &mut user, &format!("Alex {}", i));
    }

    assert_eq!(
        names(&versioner, &user),
        vec!["Alex 20", "Alex 19", "Alex 18", "Alex 17", "Alex 16"]
    );
    assert_eq!(versioner.prune_versions(&user).unwrap(), 0);
}

fn age_retention(store: Arc<dyn DocumentStore>) {
    let config = VersioningConfig::new().with_policy("user", TypePolicy::keep_versions_for(5 * 60));
    let versioner = Versioner::new(store, config);
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    let now = Utc::now();

    for i in (1..=20).rev() {
        user.set("name", format!("Alex {}", i)).unwrap();
        let ctx = OperationContext::new().with_version_created_at(now - Duration::minutes(i));
        versioner.update(&mut user, &ctx).unwrap();
    }

    versioner
        .prune_versions_at(&user, now + Duration::seconds(1))
        .unwrap();
    assert_eq!(versioner.version_count(&user).unwrap(), 4);
}

fn age_wins_over_count(store: Arc<dyn DocumentStore>) {
    let policy = TypePolicy {
        max_versions: Some(2),
        keep_versions_for: Some(3600),
        fields: None,
    };
    let versioner = Versioner::new(store, VersioningConfig::new().with_policy("user", policy));
    let mut user = versioner.create("user", alex_attributes()).unwrap();

    for i in 1..=5 {
        rename(&versioner, &mut user, &format!("Alex {}", i));
    }
    assert_eq!(versioner.version_count(&user).unwrap(), 5);
}

fn destroy_cascades(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut alex = versioner.create("user", alex_attributes()).unwrap();
    let mut bobby_attributes = Attributes::new();
    bobby_attributes.insert("name".to_string(), json!("Bobby Brown"));
    let mut bobby = versioner.create("user", bobby_attributes).unwrap();

    for i in 1..=5 {
        rename(&versioner, &mut alex, &format!("Alex {}", i));
    }
    for i in 1..=2 {
        rename(&versioner, &mut bobby, &format!("Bobby {}", i));
    }

    assert_eq!(versioner.destroy(&alex).unwrap(), 5);
    assert!(matches!(
        versioner.load(&alex.reference()),
        Err(VersionedError::DocumentNotFound(_))
    ));
    assert_eq!(versioner.version_count(&alex).unwrap(), 0);
    assert_eq!(versioner.version_count(&bobby).unwrap(), 2);
}

fn updater_is_recorded(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut bobby_attributes = Attributes::new();
    bobby_attributes.insert("name".to_string(), json!("Bobby Brown"));
    let bobby = versioner.create("user", bobby_attributes).unwrap();
    let mut alex = versioner.create("user", alex_attributes()).unwrap();

    alex.set("name", "alex").unwrap();
    let ctx = OperationContext::new().with_updater(bobby.reference());
    versioner.update(&mut alex, &ctx).unwrap();

    let version = versioner.versions(&alex).unwrap().remove(0);
    assert_eq!(version.updater, Some(bobby.reference()));
    let updater = versioner.updater_of(&version).unwrap().unwrap();
    assert_eq!(updater.get_str("name"), Some("Bobby Brown"));
}

fn unsupported_attributes_block_rollback(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(Arc::clone(&store), VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();
    rename(&versioner, &mut user, "alex");
    let target = versioner.versions(&user).unwrap().remove(0);

    let narrowed = Versioner::new(
        store,
        VersioningConfig::new().with_policy("user", TypePolicy::default().with_fields(["name"])),
    );
    let err = narrowed.rollback(&mut user, &target, None).unwrap_err();

    assert!(matches!(err, VersionedError::UnsupportedAttributes { .. }));
    assert_eq!(user.get_str("name"), Some("alex"));
    assert_eq!(narrowed.version_count(&user).unwrap(), 1);
}

fn missing_version(store: Arc<dyn DocumentStore>) {
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.create("user", alex_attributes()).unwrap();

    let err = versioner
        .rollback_to(&mut user, &VersionLookup::Id("nonexistent".to_string()), None)
        .unwrap_err();
    assert!(matches!(err, VersionedError::VersionNotFound(_)));
}

macro_rules! backend_tests {
    ($backend:ident, $store:expr) => {
        mod $backend {
            use super::*;

            fn store() -> Arc<dyn DocumentStore> {
                $store
            }

            #[test]
            fn test_no_op_update_writes_nothing() {
                no_op_update_writes_nothing(store());
            }

            #[test]
            fn test_each_update_adds_one_version() {
                each_update_adds_one_version(store());
            }

            #[test]
            fn test_rollback_keeps_history() {
                rollback_keeps_history(store());
            }

            #[test]
            fn test_rollback_to_middle_version() {
                rollback_to_middle_version(store());
            }

            #[test]
            fn test_stale_writer_conflicts() {
                stale_writer_conflicts(store());
            }

            #[test]
            fn test_racing_writers_one_wins() {
                racing_writers_one_wins(store());
            }

            #[test]
            fn test_count_retention() {
                count_retention(store());
            }

            #[test]
            fn test_age_retention() {
                age_retention(store());
            }

            #[test]
            fn test_age_wins_over_count() {
                age_wins_over_count(store());
            }

            #[test]
            fn test_destroy_cascades() {
                destroy_cascades(store());
            }

            #[test]
            fn test_updater_is_recorded() {
                updater_is_recorded(store());
            }

            #[test]
            fn test_unsupported_attributes_block_rollback() {
                unsupported_attributes_block_rollback(store());
            }

            #[test]
            fn test_missing_version() {
                missing_version(store());
            }
        }
    };
}

backend_tests!(memory, Arc::new(MemoryStore::new()));

#[cfg(feature = "sqlite")]
backend_tests!(
    sqlite,
    Arc::new(versioned_core::SqliteStore::in_memory().unwrap())
);

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.db");

    let (reference, token) = {
        let store = Arc::new(versioned_core::SqliteStore::open(&path).unwrap());
        let versioner = Versioner::new(store, VersioningConfig::new());
        let mut user = versioner.create("user", alex_attributes()).unwrap();
        rename(&versioner, &mut user, "alex");
        (user.reference(), user.version_token().clone())
    };

    let store = Arc::new(versioned_core::SqliteStore::open(&path).unwrap());
    let versioner = Versioner::new(store, VersioningConfig::new());
    let mut user = versioner.load(&reference).unwrap();
    assert_eq!(user.version_token(), &token);
    assert_eq!(names(&versioner, &user), vec!["Alex Wolfe"]);

    let target = versioner.versions(&user).unwrap().remove(0);
    versioner.rollback(&mut user, &target, None).unwrap();
    assert_eq!(user.get_str("name"), Some("Alex Wolfe"));
}
