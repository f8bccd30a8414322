use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::keyed_mutex::KeyedMutex;

#[derive(Debug, Default)]
struct Directory {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
    built_at: Option<Instant>,
}

impl Directory {
    fn build(pairs: Vec<(String, String)>) -> Self {
        let mut forward = HashMap::with_capacity(pairs.len());
        let mut reverse = HashMap::with_capacity(pairs.len());
        for (pair, id) in pairs {
            reverse.insert(id.clone(), pair.clone());
            forward.insert(pair, id);
        }
        Self {
            forward,
            reverse,
            built_at: Some(Instant::now()),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        match self.built_at {
            Some(at) => self.forward.is_empty() || at.elapsed() >= ttl,
            None => true,
        }
    }
}

/// Two-way map between canonical pair names and exchange-specific ids,
/// refreshed lazily from an adapter-supplied loader.
///
/// Readers always see a complete map (the previous or the new one). A
/// refresh runs under the keyed mutex with a staleness re-check, so a burst
/// of resolvers triggers a single load.
#[derive(Debug)]
pub struct ReferenceCache {
    name: String,
    ttl: Duration,
    current: RwLock<Arc<Directory>>,
    refresh_lock: Arc<KeyedMutex>,
}

impl ReferenceCache {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self::with_mutex(name, ttl, Arc::new(KeyedMutex::new()))
    }

    pub fn with_mutex(name: impl Into<String>, ttl: Duration, refresh_lock: Arc<KeyedMutex>) -> Self {
        Self {
            name: name.into(),
            ttl,
            current: RwLock::new(Arc::new(Directory::default())),
            refresh_lock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Arc<Directory> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exchange id of `pair`, loading the directory first if it is stale.
    pub async fn resolve<L, Fut>(&self, pair: &str, loader: L) -> Option<String>
    where
        L: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<(String, String)>>>,
    {
        self.ensure_fresh(loader).await;
        self.snapshot().forward.get(pair).cloned()
    }

    /// Canonical pair of exchange id `id`.
    pub async fn resolve_reverse<L, Fut>(&self, id: &str, loader: L) -> Option<String>
    where
        L: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<(String, String)>>>,
    {
        self.ensure_fresh(loader).await;
        self.snapshot().reverse.get(id).cloned()
    }

    async fn ensure_fresh<L, Fut>(&self, loader: L)
    where
        L: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<(String, String)>>>,
    {
        if !self.snapshot().is_stale(self.ttl) {
            return;
        }
        self.refresh_lock
            .with_lock(&self.name, async {
                if !self.snapshot().is_stale(self.ttl) {
                    return;
                }
                match loader().await {
                    Ok(pairs) => {
                        let directory = Arc::new(Directory::build(pairs));
                        info!(cache = %self.name, entries = directory.forward.len(), "reference data refreshed");
                        *self.current.write().unwrap_or_else(PoisonError::into_inner) = directory;
                        if crate::config::metrics_enabled() {
                            metrics::counter!("gateway_reference_refresh_total", "cache" => self.name.clone())
                                .increment(1);
                        }
                    }
                    Err(e) => {
                        warn!(cache = %self.name, error = %e, "reference data refresh failed, keeping previous map");
                    }
                }
            })
            .await;
    }
}

static CACHES: Lazy<Mutex<HashMap<String, Arc<ReferenceCache>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide cache for `name` using the configured refresh interval.
pub fn shared_cache(name: &str) -> Arc<ReferenceCache> {
    let ttl = Duration::from_secs(crate::config::current().reference_ttl_secs);
    let mut map = CACHES.lock().unwrap_or_else(PoisonError::into_inner);
    map.entry(name.to_string())
        .or_insert_with(|| Arc::new(ReferenceCache::new(name, ttl)))
        .clone()
}
