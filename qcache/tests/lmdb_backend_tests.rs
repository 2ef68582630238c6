//! Protocol parity tests over the persistent LMDB backend
//!
//! The full scenario and a small stampede run against [`LmdbStore`] to pin
//! the two backends to the same transaction contract.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qcache::{PopulateOutcome, QueryCache, QueryHash, StatusOutcome};
use qcache_core::Timestamp;
use qcache_store::LmdbStore;
use tempfile::TempDir;

const QUERY: &str = "SELECT 1";
const TIMEOUT: Duration = Duration::from_secs(60);
const T: Timestamp = 1_000_000;
const SECOND: Timestamp = 1_000_000;

fn create_test_cache() -> (QueryCache<LmdbStore>, TempDir) {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let store = LmdbStore::open(temp_dir.path(), 16).expect("store open should succeed");
    (QueryCache::with_defaults(Arc::new(store)), temp_dir)
}

fn rows(values: &[&str]) -> Vec<Vec<u8>> {
    values.iter().map(|v| v.as_bytes().to_vec()).collect()
}

#[tokio::test]
async fn test_scenario_over_lmdb() {
    let (cache, _temp_dir) = create_test_cache();
    let hash = QueryHash::of_query_text(QUERY);

    let outcome = cache.get_status(&hash, T, TIMEOUT, QUERY).await;
    assert_eq!(outcome, StatusOutcome::Fetch { claim_ts: T });

    let data = rows(&["a", "b"]);
    let populated = cache.populate(&hash, T, &data).await;
    assert_eq!(populated, PopulateOutcome::Stored { rows: 2 });

    let retrieved = cache.retrieve(&hash, T).await.expect("retrieve succeeds");
    assert_eq!(retrieved, data);

    let outcome = cache.get_status(&hash, T + 10 * SECOND, TIMEOUT, QUERY).await;
    assert_eq!(outcome, StatusOutcome::Ready { rows: 2, ts: T });

    let now = T + 120 * SECOND;
    let outcome = cache.get_status(&hash, now, TIMEOUT, QUERY).await;
    assert_eq!(outcome, StatusOutcome::Fetch { claim_ts: now });
}

#[tokio::test]
async fn test_invalidate_over_lmdb() {
    let (cache, _temp_dir) = create_test_cache();
    let hash = QueryHash::of_query_text(QUERY);

    let outcome = cache.get_status(&hash, T, TIMEOUT, QUERY).await;
    assert_eq!(outcome, StatusOutcome::Fetch { claim_ts: T });
    assert!(cache.populate(&hash, T, &rows(&["a"])).await.is_stored());

    cache.invalidate(&hash).await.expect("invalidate succeeds");

    let outcome = cache.get_status(&hash, T + SECOND, TIMEOUT, QUERY).await;
    assert_eq!(
        outcome,
        StatusOutcome::Fetch {
            claim_ts: T + SECOND
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stampede_prevention_over_lmdb() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let store = LmdbStore::open(temp_dir.path(), 16).expect("store open should succeed");
    let cache = Arc::new(QueryCache::with_defaults(Arc::new(store)));
    let hash = QueryHash::of_query_text(QUERY);
    let claims = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let claims = Arc::clone(&claims);
        tasks.push(tokio::spawn(async move {
            match cache.get_status(&hash, T, TIMEOUT, QUERY).await {
                StatusOutcome::Fetch { claim_ts } => {
                    claims.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let populated = cache.populate(&hash, claim_ts, &rows(&["a"])).await;
                    assert_eq!(populated, PopulateOutcome::Stored { rows: 1 });
                }
                StatusOutcome::Ready { rows, ts } => {
                    assert_eq!(rows, 1);
                    assert_eq!(ts, T);
                }
                StatusOutcome::Exhausted => panic!("no caller should exhaust"),
            }
        }));
    }
    for task in tasks {
        task.await.expect("task completes");
    }
    assert_eq!(claims.load(Ordering::SeqCst), 1);
}
