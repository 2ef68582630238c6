//! In-memory optimistic transactional store.
//!
//! The default test backend and the reference implementation of the
//! transaction contract. Every committed write bumps a per-key version;
//! commit validation compares the versions of everything a transaction read
//! against the transaction's begin snapshot, and admits exactly one of any
//! set of racing writers. That conflict detection is what the cache's
//! stampede prevention is built on.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use qcache_core::StoreError;

use crate::mutation::{Mutation, WriteBuffer};
use crate::traits::{KeyValue, RangeOptions, StoreTransaction, TransactionalStore};
use crate::watch::{KeyWatch, WatchHub};

#[derive(Default)]
struct MemoryState {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Commit sequence that last wrote each key. Deletions keep their entry
    /// so later readers of the key still conflict.
    versions: BTreeMap<Vec<u8>, u64>,
    commit_seq: u64,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    hub: WatchHub,
    forced_conflicts: AtomicU32,
}

impl MemoryInner {
    fn lock_state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Backend {
            reason: "store state lock poisoned".to_string(),
        })
    }
}

/// Shared in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                hub: WatchHub::new(),
                forced_conflicts: AtomicU32::new(0),
            }),
        }
    }

    /// Force the next `n` commits to fail with a conflict. Test hook for
    /// exercising retry exhaustion.
    pub fn inject_commit_conflicts(&self, n: u32) {
        self.inner.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|state| state.data.len())
            .unwrap_or(0)
    }

    /// Drop watch channels nobody is waiting on.
    pub fn maintain(&self) {
        self.inner.hub.prune();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let snapshot = self.inner.lock_state()?.commit_seq;
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            snapshot,
            reads: Vec::new(),
            writes: WriteBuffer::new(),
        }))
    }
}

enum ReadFootprint {
    Key(Vec<u8>),
    Range(Vec<u8>, Vec<u8>),
}

struct MemoryTransaction {
    inner: Arc<MemoryInner>,
    snapshot: u64,
    reads: Vec<ReadFootprint>,
    writes: WriteBuffer,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(overlay) = self.writes.overlay_get(key) {
            return Ok(overlay.map(|v| v.to_vec()));
        }
        self.reads.push(ReadFootprint::Key(key.to_vec()));
        let state = self.inner.lock_state()?;
        Ok(state.data.get(key).cloned())
    }

    async fn range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        opts: RangeOptions,
    ) -> Result<(Vec<KeyValue>, bool), StoreError> {
        self.reads
            .push(ReadFootprint::Range(begin.to_vec(), end.to_vec()));
        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = {
            let state = self.inner.lock_state()?;
            state
                .data
                .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
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
        // Holding the state lock across the subscription closes the window
        // between version check and registration: no commit can land between
        // the two.
        let Ok(state) = self.inner.state.lock() else {
            return KeyWatch::lost();
        };
        let version = state.versions.get(key).copied().unwrap_or(0);
        if version > self.snapshot {
            return KeyWatch::ready();
        }
        self.inner.hub.subscribe(key)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            inner,
            snapshot,
            reads,
            writes,
        } = *self;

        let forced = inner
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if forced.is_ok() {
            return Err(StoreError::Conflict);
        }

        let mut touched: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut cleared_ranges: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        {
            let mut state = inner.lock_state()?;

            for footprint in &reads {
                let conflicted = match footprint {
                    ReadFootprint::Key(key) => {
                        state.versions.get(key).copied().unwrap_or(0) > snapshot
                    }
                    ReadFootprint::Range(begin, end) => state
                        .versions
                        .range::<[u8], _>((
                            Bound::Included(begin.as_slice()),
                            Bound::Excluded(end.as_slice()),
                        ))
                        .any(|(_, v)| *v > snapshot),
                };
                if conflicted {
                    return Err(StoreError::Conflict);
                }
            }

            if writes.is_empty() {
                return Ok(());
            }

            state.commit_seq += 1;
            let seq = state.commit_seq;
            for mutation in writes.into_mutations() {
                match mutation {
                    Mutation::Set { key, value } => {
                        state.data.insert(key.clone(), value);
                        touched.insert(key);
                    }
                    Mutation::Clear { key } => {
                        state.data.remove(&key);
                        touched.insert(key);
                    }
                    Mutation::ClearRange { begin, end } => {
                        let doomed: Vec<Vec<u8>> = state
                            .data
                            .range::<[u8], _>((
                                Bound::Included(begin.as_slice()),
                                Bound::Excluded(end.as_slice()),
                            ))
                            .map(|(k, _)| k.clone())
                            .collect();
                        for key in doomed {
                            state.data.remove(&key);
                            touched.insert(key);
                        }
                        cleared_ranges.push((begin, end));
                    }
                }
            }
            for key in &touched {
                state.versions.insert(key.clone(), seq);
            }
        }

        for key in &touched {
            inner.hub.notify(key);
        }
        for (begin, end) in &cleared_ranges {
            inner.hub.notify_range(begin, end);
        }
        Ok(())
    }
}
