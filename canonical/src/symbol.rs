use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::RwLock;

/// Quote assets tried, longest first, when a raw symbol has no separator.
const KNOWN_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USD", "EUR", "TRY", "BTC", "ETH", "BNB",
];

/// A human readable trading pair such as `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        }
    }

    /// Accepts `BTC/USDT`, `BTC-USDT`, `BTC_USDT` and unseparated `BTCUSDT`.
    /// Contract suffixes (`BTCUSD_PERP`, `BTCUSD_240628`, `BTC-USDT-SWAP`)
    /// are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = strip_contract(raw.trim());
        if let Some((base, quote)) = raw.split_once(['/', '-', '_', ':']) {
            let quote = quote.split(['-', ':']).next().unwrap_or(quote);
            if base.is_empty() || quote.is_empty() {
                return Err(anyhow!("invalid pair {}", raw));
            }
            return Ok(Self::new(base, quote));
        }
        let upper = raw.to_uppercase();
        for quote in KNOWN_QUOTES {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return Ok(Self::new(base, quote));
                }
            }
        }
        Err(anyhow!("cannot split pair {}", raw))
    }

    pub fn joined(&self, sep: &str) -> String {
        format!("{}{}{}", self.base, sep, self.quote)
    }
}

fn strip_contract(raw: &str) -> &str {
    match raw.rsplit_once('_') {
        Some((head, tail))
            if tail.eq_ignore_ascii_case("PERP")
                || (!tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit())) =>
        {
            head
        }
        _ => raw,
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Deserialize)]
pub struct SymbolConfig {
    /// Canonical pair, e.g. `BTC/USDT`.
    pub id: String,
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>, // exchange -> raw symbols
}

#[derive(Default)]
struct SymbolTable {
    to_canonical: HashMap<(String, String), String>,
    to_exchange: HashMap<(String, String), String>,
}

static TABLE: Lazy<RwLock<SymbolTable>> = Lazy::new(|| RwLock::new(SymbolTable::default()));

/// Load alias overrides from a JSON or TOML file.
///
/// The first alias listed for an exchange is the one used when sending the
/// pair to that exchange.
pub fn load_from_path(path: &str) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        return Ok(());
    }

    // Try JSON first, then TOML
    let entries: Vec<SymbolConfig> = if let Ok(v) = serde_json::from_str(&buf) {
        v
    } else {
        #[derive(Deserialize)]
        struct TomlFile {
            symbols: Vec<SymbolConfig>,
        }
        toml::from_str::<TomlFile>(&buf)?.symbols
    };

    let mut tbl = SymbolTable::default();
    for entry in entries {
        let id = Pair::parse(&entry.id)?.to_string();
        for (ex, raws) in entry.aliases {
            let ex = ex.to_lowercase();
            if let Some(first) = raws.first() {
                tbl.to_exchange.insert((ex.clone(), id.clone()), first.clone());
            }
            for raw in raws {
                tbl.to_canonical.insert((ex.clone(), raw), id.clone());
            }
        }
    }
    *TABLE.write().unwrap_or_else(|e| e.into_inner()) = tbl;
    Ok(())
}

/// Map a raw exchange symbol to `BASE/QUOTE`.
pub fn normalize_symbol(exchange: &str, raw: &str) -> String {
    {
        let tbl = TABLE.read().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = tbl
            .to_canonical
            .get(&(exchange.to_lowercase(), raw.to_string()))
        {
            return id.clone();
        }
    }
    // fallback: standard formatting
    match Pair::parse(raw) {
        Ok(pair) => pair.to_string(),
        Err(_) => raw.to_uppercase().replace('_', "-"),
    }
}

/// Alias registered for `pair` on `exchange`, if any.
pub fn exchange_alias(exchange: &str, pair: &Pair) -> Option<String> {
    TABLE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .to_exchange
        .get(&(exchange.to_lowercase(), pair.to_string()))
        .cloned()
}
