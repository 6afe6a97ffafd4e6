use futures::future::join_all;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::store::{CasResult, StateStore};

const NAMESPACE: &str = "test-ns";

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new(NAMESPACE, kind, id)
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_check_and_set_new(store).await?;
    test_check_and_set_existing(store).await?;
    test_concurrent_check_and_set(store).await?;
    test_increment(store).await?;
    test_concurrent_increment(store).await?;
    test_get_versioned(store).await?;
    test_compare_and_swap(store).await?;
    test_compare_and_swap_missing(store).await?;
    test_scan_keys(store).await?;
    test_append_and_read_log(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "missing");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get on missing key should return None");
    assert!(store.get_versioned(&key).await?.is_none());
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "set-get");
    store.set(&key, "hello").await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("hello"));
    Ok(())
}

async fn test_check_and_set_new(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "cas-new");
    let created = store.check_and_set(&key, "v1").await?;
    assert!(created, "check_and_set on new key should return true");
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"));
    Ok(())
}

async fn test_check_and_set_existing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "cas-existing");
    store.set(&key, "v1").await?;
    let created = store.check_and_set(&key, "v2").await?;
    assert!(
        !created,
        "check_and_set on existing key should return false"
    );
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");
    Ok(())
}

async fn test_concurrent_check_and_set(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "cas-race");
    let values: Vec<String> = (0..8).map(|i| format!("writer-{i}")).collect();
    let results = join_all(
        values
            .iter()
            .map(|v| store.check_and_set(&key, v)),
    )
    .await;
    let mut winners = 0;
    for result in results {
        if result? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent insert should win");
    Ok(())
}

async fn test_increment(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Counter, "counter-1");
    let val = store.increment(&key, 1).await?;
    assert_eq!(val, 1, "first increment from zero should yield 1");

    let val = store.increment(&key, 5).await?;
    assert_eq!(val, 6, "second increment should accumulate");

    let val = store.increment(&key, -2).await?;
    assert_eq!(val, 4, "negative delta should decrement");
    Ok(())
}

async fn test_concurrent_increment(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::RateLimit, "user-1:5min:0");
    let results = join_all((0..25).map(|_| store.increment(&key, 1))).await;
    for result in results {
        result?;
    }
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("25"), "no concurrent increment may be lost");
    Ok(())
}

async fn test_get_versioned(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "versioned");
    store.set(&key, "a").await?;
    let (value, first) = store
        .get_versioned(&key)
        .await?
        .expect("value was just written");
    assert_eq!(value, "a");
    store.set(&key, "b").await?;
    let (value, second) = store
        .get_versioned(&key)
        .await?
        .expect("value was just written");
    assert_eq!(value, "b");
    assert!(second > first, "every write should bump the version");
    Ok(())
}

async fn test_compare_and_swap(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "cas-version");

    store.set(&key, "initial").await?;

    // CAS with wrong version should fail
    let result = store.compare_and_swap(&key, 999, "updated").await?;
    assert!(
        matches!(
            result,
            CasResult::Conflict {
                current_version: 1,
                ..
            }
        ),
        "CAS with wrong version should conflict and report the current version"
    );

    // CAS with correct version should succeed
    let result = store.compare_and_swap(&key, 1, "updated").await?;
    assert_eq!(
        result,
        CasResult::Ok,
        "CAS with correct version should succeed"
    );

    // The old version is now stale.
    let result = store.compare_and_swap(&key, 1, "stale").await?;
    assert!(matches!(result, CasResult::Conflict { .. }));

    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("updated"));
    Ok(())
}

async fn test_compare_and_swap_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::File, "cas-missing");
    let result = store.compare_and_swap(&key, 1, "value").await?;
    assert_eq!(
        result,
        CasResult::Conflict {
            current_value: None,
            current_version: 0,
        }
    );
    assert!(store.get(&key).await?.is_none(), "CAS must not create keys");
    Ok(())
}

async fn test_scan_keys(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(&test_key(KeyKind::Link, "scan:a"), "1")
        .await?;
    store
        .set(&test_key(KeyKind::Link, "scan:b"), "2")
        .await?;
    store
        .set(&test_key(KeyKind::Link, "other:c"), "3")
        .await?;

    let mut found = store
        .scan_keys(NAMESPACE, KeyKind::Link, Some("scan:"))
        .await?;
    found.sort();
    assert_eq!(
        found,
        vec![
            ("test-ns:link:scan:a".to_owned(), "1".to_owned()),
            ("test-ns:link:scan:b".to_owned(), "2".to_owned()),
        ]
    );

    let all = store.scan_keys(NAMESPACE, KeyKind::Link, None).await?;
    assert_eq!(all.len(), 3);
    Ok(())
}

async fn test_append_and_read_log(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::AccessLog, "resource-1");
    assert!(store.read_log(&key, 10).await?.is_empty());

    for entry in ["first", "second", "third"] {
        store.append(&key, entry).await?;
    }

    let newest = store.read_log(&key, 2).await?;
    assert_eq!(newest, vec!["third".to_owned(), "second".to_owned()]);

    let all = store.read_log(&key, 10).await?;
    assert_eq!(all.len(), 3);

    let other = test_key(KeyKind::AccessLog, "resource-2");
    assert!(
        store.read_log(&other, 10).await?.is_empty(),
        "logs are isolated per key"
    );
    Ok(())
}
