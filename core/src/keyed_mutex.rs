use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutual exclusion scoped by an arbitrary string key.
///
/// Bodies sharing a key run one at a time in arrival order (tokio's mutex is
/// fair); bodies on different keys run concurrently. Every caller gets the
/// result of its own body. Dropping a caller that is still waiting removes
/// it from the queue without affecting the others.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_lock<F, T>(&self, key: &str, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = Slot {
            owner: self,
            key,
            lock: self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };
        let _guard = slot.lock.lock().await;
        body.await
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Evicts the key's entry once the last interested caller is gone.
struct Slot<'a> {
    owner: &'a KeyedMutex,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        // The table and this slot hold the only two references when no
        // other caller is queued on the key. Clones happen under the shard
        // lock, so the count cannot change while `remove_if` inspects it.
        self.owner
            .locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}
