//! Process-wide store runtime lifecycle.
//!
//! One initialization before first use and one teardown at process exit:
//! [`StoreRuntime::init`] opens the database environment, starts the
//! background flush thread, and installs the process-wide handle;
//! [`StoreRuntime::shutdown`] stops and joins the thread and flushes the
//! environment. Re-initializing an installed runtime is an error, as is a
//! second shutdown.
//!
//! The runtime hands out the store handle; the coordinator receives it by
//! injection and never reaches for the global. Embedders that manage their
//! own lifecycle (tests included) can use [`StoreRuntime::start`] without
//! installing the global handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use thiserror::Error;

use qcache_core::StoreError;

use crate::lmdb::LmdbStore;

/// Configuration for the store runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory holding the database environment.
    pub path: PathBuf,
    /// Maximum size of the database in megabytes.
    pub map_size_mb: usize,
    /// Interval between background durability flushes.
    pub flush_interval: Duration,
}

impl RuntimeConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: 1024,
            flush_interval: Duration::from_secs(1),
        }
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Lifecycle errors of the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Store runtime already initialized")]
    AlreadyInitialized,

    #[error("Store runtime not initialized")]
    NotInitialized,

    #[error("Store runtime already shut down")]
    AlreadyStopped,

    #[error("Background flush thread panicked")]
    FlushThreadPanicked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

static RUNTIME: OnceCell<StoreRuntime> = OnceCell::new();

/// Handle owning the store environment and its background IO thread.
pub struct StoreRuntime {
    store: LmdbStore,
    stop: Arc<AtomicBool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl StoreRuntime {
    /// Open the store and start the background flush thread, without
    /// installing the process-wide handle.
    pub fn start(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let store = LmdbStore::open(&config.path, config.map_size_mb)?;
        let stop = Arc::new(AtomicBool::new(false));

        let thread_store = store.clone();
        let thread_stop = Arc::clone(&stop);
        let interval = config.flush_interval;
        let handle = std::thread::Builder::new()
            .name("qcache-flush".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    sleep_until_stopped(&thread_stop, interval);
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    // A failed flush is retried on the next tick; the final
                    // flush in shutdown reports errors to the caller.
                    let _ = thread_store.flush();
                    thread_store.maintain();
                }
            })
            .map_err(|e| {
                RuntimeError::Store(StoreError::Backend {
                    reason: e.to_string(),
                })
            })?;

        Ok(Self {
            store,
            stop,
            flusher: Mutex::new(Some(handle)),
        })
    }

    /// Open the store and install the process-wide handle.
    ///
    /// Errors if a runtime is already installed.
    pub fn init(config: RuntimeConfig) -> Result<&'static StoreRuntime, RuntimeError> {
        if RUNTIME.get().is_some() {
            return Err(RuntimeError::AlreadyInitialized);
        }
        let runtime = Self::start(config)?;
        RUNTIME.try_insert(runtime).map_err(|(_, runtime)| {
            // Lost the installation race; stop the redundant instance.
            let _ = runtime.shutdown();
            RuntimeError::AlreadyInitialized
        })
    }

    /// The process-wide handle, if installed.
    pub fn get() -> Result<&'static StoreRuntime, RuntimeError> {
        RUNTIME.get().ok_or(RuntimeError::NotInitialized)
    }

    /// The store handle, for injection into the coordinator.
    pub fn store(&self) -> LmdbStore {
        self.store.clone()
    }

    /// Stop and join the background thread and flush the environment.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stop.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStopped);
        }
        let handle = self
            .flusher
            .lock()
            .map_err(|_| {
                RuntimeError::Store(StoreError::Backend {
                    reason: "flush thread handle lock poisoned".to_string(),
                })
            })?
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| RuntimeError::FlushThreadPanicked)?;
        }
        self.store.flush()?;
        Ok(())
    }
}

/// Sleep in small steps so shutdown does not wait out a full interval.
fn sleep_until_stopped(stop: &AtomicBool, interval: Duration) {
    const STEP: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(STEP.min(deadline.saturating_duration_since(Instant::now())));
    }
}
