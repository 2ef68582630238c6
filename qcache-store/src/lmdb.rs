//! LMDB-backed transactional store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! persistent backend implementing the same optimistic transaction contract
//! as the in-memory store.
//!
//! # Concurrency
//!
//! LMDB serializes writers; optimistic semantics are layered on top. Each
//! transaction records what it read together with the observed bytes, and
//! commit re-reads the footprint under the write transaction: any
//! difference fails the commit with a conflict. Validation is by value
//! comparison; the protocol's records carry their timestamp, which is what
//! makes the comparison decisive.
//!
//! Watches are delivered through the in-process [`WatchHub`]; they do not
//! cross processes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use qcache_core::StoreError;

use crate::mutation::{Mutation, WriteBuffer};
use crate::traits::{KeyValue, RangeOptions, StoreTransaction, TransactionalStore};
use crate::watch::{KeyWatch, WatchHub};

fn backend_err(e: impl ToString) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

struct LmdbInner {
    env: Env,
    db: Database<Bytes, Bytes>,
    hub: WatchHub,
    /// Serializes commit validation with watch registration.
    commit_lock: Mutex<()>,
}

impl LmdbInner {
    fn lock_commit(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.commit_lock.lock().map_err(|_| StoreError::Backend {
            reason: "commit lock poisoned".to_string(),
        })
    }

    fn read_committed(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(backend_err)?;
        let value = self.db.get(&rtxn, key).map_err(backend_err)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn read_committed_range(
        &self,
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<KeyValue>, StoreError> {
        let rtxn = self.env.read_txn().map_err(backend_err)?;
        let bounds = (Bound::Included(begin), Bound::Excluded(end));
        let mut entries = Vec::new();
        for item in self.db.range(&rtxn, &bounds).map_err(backend_err)? {
            let (k, v) = item.map_err(backend_err)?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }
}

/// Persistent store over one LMDB environment.
#[derive(Clone)]
pub struct LmdbStore {
    inner: Arc<LmdbInner>,
}

impl LmdbStore {
    /// Open (or create) the database under `path`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&path).map_err(backend_err)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(backend_err)?;

        let mut wtxn = env.write_txn().map_err(backend_err)?;
        let db: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, None).map_err(backend_err)?;
        wtxn.commit().map_err(backend_err)?;

        Ok(Self {
            inner: Arc::new(LmdbInner {
                env,
                db,
                hub: WatchHub::new(),
                commit_lock: Mutex::new(()),
            }),
        })
    }

    /// Flush the environment to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.inner.env.force_sync().map_err(backend_err)
    }

    /// Drop watch channels nobody is waiting on.
    pub fn maintain(&self) {
        self.inner.hub.prune();
    }
}

impl TransactionalStore for LmdbStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(LmdbTransaction {
            inner: Arc::clone(&self.inner),
            reads: Vec::new(),
            writes: WriteBuffer::new(),
        }))
    }
}

enum ReadFootprint {
    Key {
        key: Vec<u8>,
        observed: Option<Vec<u8>>,
    },
    Range {
        begin: Vec<u8>,
        end: Vec<u8>,
        observed: Vec<KeyValue>,
    },
}

struct LmdbTransaction {
    inner: Arc<LmdbInner>,
    reads: Vec<ReadFootprint>,
    writes: WriteBuffer,
}

#[async_trait]
impl StoreTransaction for LmdbTransaction {
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(overlay) = self.writes.overlay_get(key) {
            return Ok(overlay.map(|v| v.to_vec()));
        }
        let observed = self.inner.read_committed(key)?;
        self.reads.push(ReadFootprint::Key {
            key: key.to_vec(),
            observed: observed.clone(),
        });
        Ok(observed)
    }

    async fn range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        opts: RangeOptions,
    ) -> Result<(Vec<KeyValue>, bool), StoreError> {
        let committed = self.inner.read_committed_range(begin, end)?;
        self.reads.push(ReadFootprint::Range {
            begin: begin.to_vec(),
            end: end.to_vec(),
            observed: committed.clone(),
        });

        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = committed.into_iter().collect();
        self.writes.overlay_range(begin, end, &mut entries);

        let total = entries.len();
        let limit = opts.limit.unwrap_or(usize::MAX);
        let out: Vec<KeyValue> = entries.into_iter().take(limit).collect();
        let more = total > out.len();
        Ok((out, more))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.set(key, value);
    }

    fn clear(&mut self, key: &[u8]) {
        self.writes.clear(key);
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        self.writes.clear_range(begin, end);
    }

    fn watch(&mut self, key: &[u8]) -> KeyWatch {
        // Holding the commit lock across the subscription closes the window
        // between the staleness check and registration.
        let Ok(_guard) = self.inner.commit_lock.lock() else {
            return KeyWatch::lost();
        };
        let Ok(current) = self.inner.read_committed(key) else {
            return KeyWatch::lost();
        };
        let observed = self.reads.iter().rev().find_map(|read| match read {
            ReadFootprint::Key { key: k, observed } if k.as_slice() == key => {
                Some(observed.clone())
            }
            _ => None,
        });
        if let Some(observed) = observed {
            if observed != current {
                return KeyWatch::ready();
            }
        }
        self.inner.hub.subscribe(key)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let _guard = inner.lock_commit()?;
        let mut wtxn = inner.env.write_txn().map_err(backend_err)?;

        for read in &self.reads {
            match read {
                ReadFootprint::Key { key, observed } => {
                    let current = inner.db.get(&wtxn, key).map_err(backend_err)?;
                    if current != observed.as_deref() {
                        return Err(StoreError::Conflict);
                    }
                }
                ReadFootprint::Range {
                    begin,
                    end,
                    observed,
                } => {
                    let bounds = (
                        Bound::Included(begin.as_slice()),
                        Bound::Excluded(end.as_slice()),
                    );
                    let mut current = Vec::with_capacity(observed.len());
                    for item in inner.db.range(&wtxn, &bounds).map_err(backend_err)? {
                        let (k, v) = item.map_err(backend_err)?;
                        current.push((k.to_vec(), v.to_vec()));
                    }
                    if &current != observed {
                        return Err(StoreError::Conflict);
                    }
                }
            }
        }

        if self.writes.is_empty() {
            return Ok(());
        }

        let mut touched: Vec<Vec<u8>> = Vec::new();
        let mut cleared_ranges: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for mutation in self.writes.iter() {
            match mutation {
                Mutation::Set { key, value } => {
                    inner.db.put(&mut wtxn, key, value).map_err(backend_err)?;
                    touched.push(key.clone());
                }
                Mutation::Clear { key } => {
                    inner.db.delete(&mut wtxn, key).map_err(backend_err)?;
                    touched.push(key.clone());
                }
                Mutation::ClearRange { begin, end } => {
                    let bounds = (
                        Bound::Included(begin.as_slice()),
                        Bound::Excluded(end.as_slice()),
                    );
                    let doomed: Vec<Vec<u8>> = inner
                        .db
                        .range(&wtxn, &bounds)
                        .map_err(backend_err)?
                        .map(|item| item.map(|(k, _)| k.to_vec()).map_err(backend_err))
                        .collect::<Result<_, _>>()?;
                    for key in doomed {
                        inner.db.delete(&mut wtxn, &key).map_err(backend_err)?;
                        touched.push(key);
                    }
                    cleared_ranges.push((begin.clone(), end.clone()));
                }
            }
        }

        wtxn.commit().map_err(backend_err)?;

        for key in &touched {
            inner.hub.notify(key);
        }
        for (begin, end) in &cleared_ranges {
            inner.hub.notify_range(begin, end);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 16).expect("store open should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (store, _temp_dir) = create_test_store();

        let mut tx = store.begin().expect("begin");
        tx.set(b"k", b"v");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.get(b"k").await.expect("get"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbStore::open(temp_dir.path(), 16).expect("open");
            let mut tx = store.begin().expect("begin");
            tx.set(b"k", b"v");
            tx.commit().await.expect("commit");
            store.flush().expect("flush");
        }

        let store = LmdbStore::open(temp_dir.path(), 16).expect("reopen");
        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.get(b"k").await.expect("get"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_conflicting_commits_admit_exactly_one() {
        let (store, _temp_dir) = create_test_store();

        let mut tx1 = store.begin().expect("begin");
        let mut tx2 = store.begin().expect("begin");
        assert_eq!(tx1.get(b"k").await.expect("get"), None);
        assert_eq!(tx2.get(b"k").await.expect("get"), None);
        tx1.set(b"k", b"one");
        tx2.set(b"k", b"two");

        tx1.commit().await.expect("first commit wins");
        assert_eq!(tx2.commit().await, Err(StoreError::Conflict));

        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.get(b"k").await.expect("get"), Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn test_range_read_conflicts_with_insert() {
        let (store, _temp_dir) = create_test_store();

        let mut tx1 = store.begin().expect("begin");
        let (entries, _) = tx1
            .range(b"a", b"z", RangeOptions::default())
            .await
            .expect("range");
        assert!(entries.is_empty());
        tx1.set(b"result", b"empty");

        let mut tx2 = store.begin().expect("begin");
        tx2.set(b"m", b"phantom");
        tx2.commit().await.expect("commit");

        assert_eq!(tx1.commit().await, Err(StoreError::Conflict));
    }

    #[tokio::test]
    async fn test_range_ordering() {
        let (store, _temp_dir) = create_test_store();

        let mut tx = store.begin().expect("begin");
        tx.set(b"c", b"3");
        tx.set(b"a", b"1");
        tx.set(b"b", b"2");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().expect("begin");
        let (entries, more) = tx
            .range(b"a", b"z", RangeOptions::default())
            .await
            .expect("range");
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
        assert!(!more);
    }

    #[tokio::test]
    async fn test_watch_wakes_on_commit() {
        let (store, _temp_dir) = create_test_store();

        let mut watcher = store.begin().expect("begin");
        assert_eq!(watcher.get(b"k").await.expect("get"), None);
        let watch = watcher.watch(b"k");

        let mut tx = store.begin().expect("begin");
        tx.set(b"k", b"v");
        tx.commit().await.expect("commit");

        tokio::time::timeout(Duration::from_secs(1), watch.changed())
            .await
            .expect("watch should resolve")
            .expect("watch should not be lost");
    }

    #[tokio::test]
    async fn test_watch_after_change_resolves_immediately() {
        let (store, _temp_dir) = create_test_store();

        let mut watcher = store.begin().expect("begin");
        assert_eq!(watcher.get(b"k").await.expect("get"), None);

        let mut tx = store.begin().expect("begin");
        tx.set(b"k", b"v");
        tx.commit().await.expect("commit");

        let watch = watcher.watch(b"k");
        assert!(watch.is_ready());
        watch.changed().await.expect("already resolved");
    }

    #[tokio::test]
    async fn test_clear_range_removes_entries() {
        let (store, _temp_dir) = create_test_store();

        let mut tx = store.begin().expect("begin");
        tx.set(b"ka", b"1");
        tx.set(b"kb", b"2");
        tx.set(b"z", b"3");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().expect("begin");
        tx.clear_range(b"k", b"l");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().expect("begin");
        let (entries, _) = tx
            .range(b"a", b"zz", RangeOptions::default())
            .await
            .expect("range");
        assert_eq!(entries, vec![(b"z".to_vec(), b"3".to_vec())]);
    }
}
