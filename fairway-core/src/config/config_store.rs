//! Reloadable settings.
//!
//! The SIGHUP handler swaps in a freshly parsed value while hops keep
//! reading. Each reader takes an `Arc` snapshot and never holds a lock, so
//! a reload cannot stall a hop that is mid-authorization, and a hop sees one
//! consistent roster for its whole duration.

use std::sync::Arc;
use tokio::sync::watch;

/// A value at one point of the reload history.
#[derive(Debug)]
pub struct Snapshot<T> {
    /// 0 for the value loaded at startup, +1 per reload.
    pub revision: u64,
    pub value: Arc<T>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            revision: self.revision,
            value: Arc::clone(&self.value),
        }
    }
}

/// Current snapshot of `T`, shared by every clone.
pub struct ConfigStore<T> {
    tx: Arc<watch::Sender<Snapshot<T>>>,
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Snapshot {
            revision: 0,
            value: Arc::new(initial),
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow().value)
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    /// Install `value` as the next revision and return its number.
    /// Readers holding the previous snapshot keep it until they drop it.
    pub fn replace(&self, value: T) -> u64 {
        let mut revision = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.value = Arc::new(value);
            revision = snapshot.revision;
        });
        revision
    }

    pub fn watch(&self) -> ConfigWatcher<T> {
        ConfigWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct ConfigWatcher<T> {
    rx: watch::Receiver<Snapshot<T>>,
}

impl<T> ConfigWatcher<T> {
    /// The next snapshot installed after the last one seen here, or `None`
    /// once every [`ConfigStore`] clone is gone. Several reloads between
    /// two calls collapse into the latest.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_sees_latest_revision() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.watch();
        let held = store.current();

        assert_eq!(store.replace(2), 1);
        assert_eq!(store.replace(3), 2);

        let seen = watcher.changed().await.unwrap();
        assert_eq!((seen.revision, *seen.value), (2, 3));
        assert_eq!(*held, 1);
        assert_eq!(*store.current(), 3);
        assert_eq!(store.revision(), 2);
    }

    #[tokio::test]
    async fn test_watcher_ends_with_store() {
        let store = ConfigStore::new("roles".to_string());
        let mut watcher = store.watch();
        drop(store);
        assert!(watcher.changed().await.is_none());
    }
}
