//! Integration tests for Statekeeper

use serde_json::json;
use statekeeper::{
    defaults, FileStorage, MemoryStorage, Patch, PersistError, Snapshot, StateValue,
    StorageBackend, StorageError, Store, StoreConfig, Update,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

fn table_defaults() -> Snapshot {
    [
        ("applications", json!([])),
        ("searchTerm", json!("")),
        ("currentPageNumber", json!(1)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), StateValue::from(v)))
    .collect()
}

fn persistent_store(storage: MemoryStorage) -> Store {
    Store::open(
        defaults::dashboard_config(),
        defaults::dashboard_defaults(),
        storage,
    )
    .unwrap()
}

#[test]
fn unsubscribe_before_commit_means_no_calls() {
    let store = Store::in_memory(table_defaults());
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let sub = store
        .subscribe("searchTerm", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());

    store.set_state(Patch::new().set("searchTerm", json!("foo"))).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn exactly_once_delivery_per_key() {
    let store = Store::in_memory(table_defaults());
    let key_calls = Arc::new(Mutex::new(Vec::new()));
    let wildcard_calls = Arc::new(Mutex::new(Vec::new()));

    let key_calls_clone = key_calls.clone();
    store
        .subscribe(["searchTerm", "currentPageNumber"], move |change| {
            key_calls_clone.lock().unwrap().push(change.clone());
            Ok(())
        })
        .unwrap();
    let wildcard_calls_clone = wildcard_calls.clone();
    store.subscribe_all(move |change| {
        wildcard_calls_clone
            .lock()
            .unwrap()
            .push(change.changed_keys.clone());
        Ok(())
    });

    store
        .set_state(
            Patch::new()
                .set("searchTerm", json!("foo"))
                .set("currentPageNumber", json!(3)),
        )
        .unwrap();

    let key_calls = key_calls.lock().unwrap();
    assert_eq!(key_calls.len(), 2);
    assert_eq!(key_calls[0].key, "searchTerm");
    assert_eq!(key_calls[0].new, Some(json!("foo").into()));
    assert_eq!(key_calls[0].old, Some(json!("").into()));
    assert_eq!(key_calls[1].key, "currentPageNumber");
    assert_eq!(key_calls[1].new, Some(json!(3).into()));
    assert_eq!(key_calls[1].old, Some(json!(1).into()));

    let wildcard_calls = wildcard_calls.lock().unwrap();
    assert_eq!(
        *wildcard_calls,
        vec![vec!["searchTerm".to_string(), "currentPageNumber".to_string()]]
    );
}

#[test]
fn batching_is_atomic() {
    let store = Store::in_memory(Snapshot::new());
    let per_key = Arc::new(AtomicUsize::new(0));
    let per_key_clone = per_key.clone();
    store
        .subscribe(["a", "b"], move |_| {
            per_key_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    store.batch(|s| {
        s.set_state(Patch::new().set("a", json!(1)))?;
        s.set_state(Patch::new().set("b", json!(2)))?;
        Ok(())
    })
    .unwrap();

    let history = store.get_history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].changed_keys, vec!["a", "b"]);
    assert_eq!(per_key.load(Ordering::SeqCst), 2);
}

#[test]
fn history_is_bounded_fifo() {
    let store = Store::open(
        StoreConfig::default().with_max_history(5),
        Snapshot::new(),
        MemoryStorage::new(),
    )
    .unwrap();
    for i in 0..12 {
        store.set_state(Patch::new().set("counter", json!(i))).unwrap();
    }

    let history = store.get_history(Some(50));
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].current["counter"], Some(json!(7).into()));
    assert_eq!(history[4].current["counter"], Some(json!(11).into()));
    for pair in history.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert_eq!(store.get_history(Some(2)).len(), 2);
}

#[test]
fn computed_invalidation() {
    let store = Store::in_memory(table_defaults());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let filtered = store
        .create_computed(
            move |s| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                s["searchTerm"]
                    .as_json()
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_uppercase()
            },
            ["searchTerm"],
        )
        .unwrap();

    assert_eq!(filtered.get(), "");
    assert_eq!(filtered.get(), "");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.set_state(Patch::new().set("searchTerm", json!("grafana"))).unwrap();
    assert_eq!(filtered.get(), "GRAFANA");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn reset_single_key() {
    let store = Store::in_memory(defaults::dashboard_defaults());
    store
        .set_state(
            Patch::new()
                .set("searchTerm", json!("foo"))
                .set("itemsPerPage", json!(25)),
        )
        .unwrap();
    store.reset_keys(["searchTerm"]).unwrap();
    assert_eq!(store.get("searchTerm").unwrap(), Some(json!("").into()));
    assert_eq!(store.get("itemsPerPage").unwrap(), Some(json!(25).into()));
}

#[test]
fn search_scenario() {
    let store = Store::in_memory(table_defaults());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    store
        .subscribe("searchTerm", move |change| {
            calls_clone.lock().unwrap().push((
                change.new.clone(),
                change.old.clone(),
                change.key.clone(),
            ));
            Ok(())
        })
        .unwrap();

    store
        .set_state(
            Patch::new()
                .set("searchTerm", json!("foo"))
                .set("currentPageNumber", json!(1)),
        )
        .unwrap();

    assert_eq!(store.get("searchTerm").unwrap(), Some(json!("foo").into()));
    let history = store.get_history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].changed_keys, vec!["searchTerm"]);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![(
            Some(StateValue::from(json!("foo"))),
            Some(StateValue::from(json!(""))),
            "searchTerm".to_string()
        )]
    );
}

#[test]
fn persistence_roundtrip() {
    let storage = MemoryStorage::new();
    let apps = json!([{"id": 1, "app_name": "billing", "owner": "ops"}]);
    {
        let store = persistent_store(storage.clone());
        let report = store
            .set_state(
                Patch::new()
                    .set("applications", apps.clone())
                    .set("searchTerm", json!("bill")),
            )
            .unwrap();
        assert!(report.is_durable());
    }
    assert!(storage.get("dashboard_state_applications").is_some());
    assert!(storage.get("dashboard_state_searchTerm").is_none());

    let reopened = persistent_store(storage);
    assert_eq!(reopened.get("applications").unwrap(), Some(apps.into()));
    assert_eq!(reopened.get("searchTerm").unwrap(), Some(json!("").into()));
    assert_eq!(
        reopened.get("userPreferences.theme").unwrap(),
        Some(json!("dark").into())
    );
}

#[test]
fn file_persistence_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let prefs = json!({"theme": "light", "language": "de", "autoRefresh": false, "refreshInterval": 60000});
    {
        let store = Store::open(
            defaults::dashboard_config(),
            defaults::dashboard_defaults(),
            FileStorage::open(tmp.path()).unwrap(),
        )
        .unwrap();
        store.set_state(Patch::new().set("userPreferences", prefs.clone())).unwrap();
    }
    assert!(tmp
        .path()
        .join("dashboard_state_userPreferences.json")
        .is_file());

    let store = Store::open(
        defaults::dashboard_config(),
        defaults::dashboard_defaults(),
        FileStorage::open(tmp.path()).unwrap(),
    )
    .unwrap();
    assert_eq!(store.get("userPreferences").unwrap(), Some(prefs.into()));

    assert!(store.clear_persisted(None).is_empty());
    assert!(!tmp
        .path()
        .join("dashboard_state_userPreferences.json")
        .exists());
}

#[test]
fn corrupt_record_falls_back_to_default() {
    let storage = MemoryStorage::new();
    storage
        .write("dashboard_state_applications", "{not json")
        .unwrap();
    storage
        .write("dashboard_state_userPreferences", "{\"theme\":\"light\"}")
        .unwrap();

    let store = persistent_store(storage);
    assert_eq!(store.get("applications").unwrap(), Some(json!([]).into()));
    assert_eq!(
        store.get("userPreferences").unwrap(),
        Some(json!({"theme": "light"}).into())
    );
}

#[test]
fn unavailable_storage_degrades_to_memory() {
    let storage = MemoryStorage::new();
    storage.set_unavailable(true);
    let store = persistent_store(storage.clone());
    assert_eq!(store.get("applications").unwrap(), Some(json!([]).into()));

    let report = store.set_state(Patch::new().set("applications", json!([{"id": 2}]))).unwrap();
    assert_eq!(report.persistence_failures.len(), 1);
    assert!(matches!(
        report.persistence_failures[0].error,
        PersistError::Storage(StorageError::Unavailable(_))
    ));
    assert_eq!(
        store.get("applications").unwrap(),
        Some(json!([{"id": 2}]).into())
    );
}

#[test]
fn quota_failure_keeps_in_memory_commit() {
    let storage = MemoryStorage::with_quota(16);
    let store = persistent_store(storage.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    store
        .subscribe("applications", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let big = json!([{"id": 1, "app_name": "a very long application name"}]);
    let report = store.set_state(Patch::new().set("applications", big.clone())).unwrap();

    assert!(!report.is_durable());
    assert_eq!(report.persistence_failures[0].key, "applications");
    assert!(matches!(
        report.persistence_failures[0].error,
        PersistError::Storage(StorageError::QuotaExceeded { .. })
    ));
    assert_eq!(store.get("applications").unwrap(), Some(big.into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(storage.get("dashboard_state_applications").is_none());
}

#[test]
fn handle_under_persistent_key_is_reported() {
    struct LiveChart;
    let storage = MemoryStorage::new();
    let store = persistent_store(storage.clone());

    let report = store
        .set_state(Patch::new().set("userPreferences", StateValue::handle(LiveChart)))
        .unwrap();
    assert!(matches!(
        report.persistence_failures[0].error,
        PersistError::NotSerializable
    ));
    assert!(store
        .get("userPreferences")
        .unwrap()
        .is_some_and(|v| v.downcast_handle::<LiveChart>().is_some()));
    assert!(storage.is_empty());
}

#[test]
fn handles_live_under_plain_keys() {
    struct LiveChart {
        series: usize,
    }
    let store = Store::in_memory(defaults::dashboard_defaults());
    let chart = StateValue::handle(LiveChart { series: 3 });
    let report = store.set_state(Patch::new().set("charts", chart.clone())).unwrap();
    assert!(report.is_durable());

    let stored = store.get("charts").unwrap().unwrap();
    assert_eq!(stored, chart);
    assert_eq!(stored.downcast_handle::<LiveChart>().map(|c| c.series), Some(3));
}

#[test]
fn failing_subscriber_is_isolated() {
    let store = Store::in_memory(table_defaults());
    let calls = Arc::new(AtomicUsize::new(0));

    store
        .subscribe("searchTerm", |_| Err("table render failed".into()))
        .unwrap();
    store.subscribe_all(|_| panic!("chart refresh panicked"));
    let calls_clone = calls.clone();
    store
        .subscribe("searchTerm", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let report = store.set_state(Patch::new().set("searchTerm", json!("x"))).unwrap();
    assert_eq!(report.listener_failures, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("searchTerm").unwrap(), Some(json!("x").into()));
    assert_eq!(store.get_history(None).len(), 1);
}

#[test]
fn namespaces_do_not_collide() {
    let storage = MemoryStorage::new();
    let a = Store::open(
        StoreConfig::default()
            .with_namespace("left")
            .with_persistent_keys(["applications"]),
        table_defaults(),
        storage.clone(),
    )
    .unwrap();
    let b = Store::open(
        StoreConfig::default()
            .with_namespace("right")
            .with_persistent_keys(["applications"]),
        table_defaults(),
        storage.clone(),
    )
    .unwrap();

    a.set_state(Patch::new().set("applications", json!([1]))).unwrap();
    b.set_state(Patch::new().set("applications", json!([2]))).unwrap();
    assert_eq!(storage.get("left_applications").as_deref(), Some("[1]"));
    assert_eq!(storage.get("right_applications").as_deref(), Some("[2]"));
}

#[test]
fn full_reset_rewrites_persisted_defaults() {
    let storage = MemoryStorage::new();
    let store = persistent_store(storage.clone());
    store
        .set_state(
            Patch::new()
                .set("applications", json!([{"id": 1}]))
                .set("userPreferences", json!({"theme": "light"})),
        )
        .unwrap();
    assert_eq!(
        storage.get("dashboard_state_applications").as_deref(),
        Some("[{\"id\":1}]")
    );

    let report = store.reset_state();
    assert!(report.is_durable());
    assert_eq!(storage.get("dashboard_state_applications").as_deref(), Some("[]"));

    let reopened = persistent_store(storage);
    assert_eq!(
        reopened.get("userPreferences.theme").unwrap(),
        Some(json!("dark").into())
    );
    assert_eq!(reopened.get("applications").unwrap(), Some(json!([]).into()));
}

#[test]
fn pagination_reset_from_listener_keeps_commit_order() {
    let store = Store::in_memory(table_defaults());
    let pager = store.clone();
    store
        .subscribe("searchTerm", move |_| {
            pager.set_state(Patch::new().set("currentPageNumber", json!(1)))?;
            Ok(())
        })
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    store.subscribe_all(move |change| {
        log_clone.lock().unwrap().push(change.changed_keys.clone());
        Ok(())
    });

    store
        .set_state(Patch::new().set("currentPageNumber", json!(4)))
        .unwrap();
    store
        .set_state(Patch::new().set("searchTerm", json!("ops")))
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            vec!["currentPageNumber".to_string()],
            vec!["searchTerm".to_string()],
            vec!["currentPageNumber".to_string()],
        ]
    );
    assert_eq!(store.get("currentPageNumber").unwrap(), Some(json!(1).into()));
}

#[test]
fn concurrent_updaters_are_serialized() {
    const THREADS: usize = 8;
    const WRITES: i64 = 500;

    let store = Store::in_memory([("n".to_string(), StateValue::from(json!(0)))].into());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    store
        .subscribe("n", move |change| {
            let n = change.new.as_ref().and_then(StateValue::as_json);
            seen_clone.lock().unwrap().push(n.and_then(|v| v.as_i64()));
            Ok(())
        })
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..WRITES {
                    store
                        .set_state(Update::with(|s| {
                            let n = s["n"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
                            Patch::new().set("n", json!(n + 1))
                        }))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = THREADS as i64 * WRITES;
    assert_eq!(store.get("n").unwrap(), Some(json!(total).into()));
    let seen = seen.lock().unwrap();
    let expected: Vec<Option<i64>> = (1..=total).map(Some).collect();
    assert_eq!(*seen, expected);
}

#[test]
fn batch_holds_off_writers_on_other_threads() {
    let store = Store::in_memory(table_defaults());
    let writer = store.clone();
    let mut other = None;
    let report = store
        .batch(|s| {
            s.set_state(Patch::new().set("searchTerm", json!("a")))?;
            other = Some(std::thread::spawn(move || {
                writer
                    .set_state(Patch::new().set("currentPageNumber", json!(7)))
                    .unwrap()
            }));
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert_eq!(s.get("currentPageNumber")?, Some(json!(1).into()));
            s.set_state(Patch::new().set("searchTerm", json!("ab")))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(report.changed_keys, vec!["searchTerm"]);

    let other = other.unwrap().join().unwrap();
    assert_eq!(other.changed_keys, vec!["currentPageNumber"]);
    assert_eq!(other.sequence, Some(2));
    assert_eq!(store.get("currentPageNumber").unwrap(), Some(json!(7).into()));
}
