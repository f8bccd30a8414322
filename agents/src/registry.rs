use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use gateway_core::config::Credentials;
use once_cell::sync::Lazy;

use crate::adapter::{self, ExchangeAdapter};

/// Builds an adapter bound to caller credentials. Market kind and host are
/// fixed by the registered id.
pub type AdapterFactory =
    Arc<dyn Fn(Credentials) -> Result<Arc<dyn ExchangeAdapter>> + Send + Sync>;

static REGISTRY: Lazy<DashMap<&'static str, AdapterFactory>> = Lazy::new(DashMap::new);

pub fn register_adapter(id: &'static str, factory: AdapterFactory) {
    REGISTRY.insert(id, factory);
}

pub fn get_adapter(id: &str) -> Option<AdapterFactory> {
    REGISTRY.get(id).map(|f| f.value().clone())
}

/// Register every built-in exchange. Safe to call repeatedly.
pub fn register_builtin() {
    adapter::binance::register();
    adapter::kucoin::register();
    adapter::bybit::register();
    adapter::okx::register();
    adapter::bitget::register();
    adapter::coinbase::register();
    adapter::hyperliquid::register();
}

/// Factory for `exchange_id`, or `None` when the id is unknown. Callers
/// treat `None` as a configuration error.
pub fn choose(exchange_id: &str) -> Option<AdapterFactory> {
    register_builtin();
    get_adapter(&exchange_id.trim().to_ascii_lowercase())
}

/// Registered ids, sorted.
pub fn exchange_ids() -> Vec<&'static str> {
    register_builtin();
    let mut ids: Vec<&'static str> = REGISTRY.iter().map(|e| *e.key()).collect();
    ids.sort_unstable();
    ids
}
