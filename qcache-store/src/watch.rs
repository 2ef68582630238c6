//! In-process watch delivery.
//!
//! Each watched key gets a `tokio::sync::watch` channel carrying a change
//! counter. Backends bump the counter after every committed write to the
//! key, including deletions. The hub is per-process: watches do not travel
//! across machines. A networked store with native watches can implement
//! [`StoreTransaction::watch`](crate::StoreTransaction::watch) without this
//! hub.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

use qcache_core::StoreError;

/// Registry of per-key change channels.
pub struct WatchHub {
    channels: Mutex<HashMap<Vec<u8>, watch::Sender<u64>>>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to changes of `key`.
    pub(crate) fn subscribe(&self, key: &[u8]) -> KeyWatch {
        let Ok(mut channels) = self.channels.lock() else {
            return KeyWatch::lost();
        };
        let sender = channels
            .entry(key.to_vec())
            .or_insert_with(|| watch::channel(0u64).0);
        KeyWatch::pending(sender.subscribe())
    }

    /// Signal a committed change to `key`.
    pub(crate) fn notify(&self, key: &[u8]) {
        if let Ok(channels) = self.channels.lock() {
            if let Some(sender) = channels.get(key) {
                sender.send_modify(|v| *v = v.wrapping_add(1));
            }
        }
    }

    /// Signal a committed change to every subscribed key in `[begin, end)`.
    ///
    /// Covers keys a range clear removed without the backend enumerating
    /// them, including watched keys that were already absent.
    pub(crate) fn notify_range(&self, begin: &[u8], end: &[u8]) {
        if let Ok(channels) = self.channels.lock() {
            for (key, sender) in channels.iter() {
                if key.as_slice() >= begin && key.as_slice() < end {
                    sender.send_modify(|v| *v = v.wrapping_add(1));
                }
            }
        }
    }

    /// Drop channels nobody is waiting on.
    pub fn prune(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|_, sender| sender.receiver_count() > 0);
        }
    }

    /// Number of keys with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

enum WatchState {
    /// The key already changed when the watch was registered.
    Ready,
    /// Waiting for the next change signal.
    Pending(watch::Receiver<u64>),
    /// The watch could not be registered or delivered.
    Lost,
}

/// A pending wait on one key's next change.
pub struct KeyWatch {
    state: WatchState,
}

impl KeyWatch {
    pub(crate) fn ready() -> Self {
        Self {
            state: WatchState::Ready,
        }
    }

    pub(crate) fn pending(rx: watch::Receiver<u64>) -> Self {
        Self {
            state: WatchState::Pending(rx),
        }
    }

    pub(crate) fn lost() -> Self {
        Self {
            state: WatchState::Lost,
        }
    }

    /// Whether the watch was already resolved at registration time.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, WatchState::Ready)
    }

    /// Wait until the watched key changes.
    pub async fn changed(self) -> Result<(), StoreError> {
        match self.state {
            WatchState::Ready => Ok(()),
            WatchState::Pending(mut rx) => {
                rx.changed().await.map_err(|_| StoreError::WatchLost {
                    reason: "watch channel closed".to_string(),
                })
            }
            WatchState::Lost => Err(StoreError::WatchLost {
                reason: "watch registration failed".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_wakes_subscriber() {
        let hub = WatchHub::new();
        let watch = hub.subscribe(b"key");
        hub.notify(b"key");
        tokio::time::timeout(Duration::from_secs(1), watch.changed())
            .await
            .expect("watch should resolve")
            .expect("watch should not be lost");
    }

    #[tokio::test]
    async fn test_notify_other_key_does_not_wake() {
        let hub = WatchHub::new();
        let watch = hub.subscribe(b"key");
        hub.notify(b"other");
        let waited = tokio::time::timeout(Duration::from_millis(50), watch.changed()).await;
        assert!(waited.is_err(), "watch should still be pending");
    }

    #[tokio::test]
    async fn test_notify_range_wakes_keys_in_bounds() {
        let hub = WatchHub::new();
        let inside = hub.subscribe(b"TUPLb");
        let outside = hub.subscribe(b"TUPZ");
        hub.notify_range(b"TUPLa", b"TUPLz");

        tokio::time::timeout(Duration::from_secs(1), inside.changed())
            .await
            .expect("in-range watch should resolve")
            .expect("watch should not be lost");
        let waited = tokio::time::timeout(Duration::from_millis(50), outside.changed()).await;
        assert!(waited.is_err(), "out-of-range watch should still be pending");
    }

    #[tokio::test]
    async fn test_ready_watch_resolves_immediately() {
        let watch = KeyWatch::ready();
        watch.changed().await.expect("ready watch resolves");
    }

    #[tokio::test]
    async fn test_prune_drops_abandoned_channels() {
        let hub = WatchHub::new();
        drop(hub.subscribe(b"key"));
        assert_eq!(hub.channel_count(), 1);
        hub.prune();
        assert_eq!(hub.channel_count(), 0);
    }
}
