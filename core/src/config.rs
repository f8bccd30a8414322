use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::HashMap;
use std::{env, fs};

#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***redacted***")
            .field("api_secret", &"***redacted***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***redacted***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy_url: Option<String>,
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    pub reference_ttl_secs: u64,
    pub rate_skew_ms: u64,
    pub enable_metrics: bool,
    /// Base url overrides keyed by exchange id, e.g. `binance_futures`.
    pub base_urls: HashMap<String, String>,
    /// JSON or TOML file of per-exchange pair aliases.
    pub symbol_aliases_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_url: None,
            max_retries: 10,
            request_timeout_ms: 10_000,
            reference_ttl_secs: 30 * 60,
            rate_skew_ms: 10,
            enable_metrics: false,
            base_urls: HashMap::new(),
            symbol_aliases_file: None,
        }
    }
}

/// Exchange ids that accept a `<ID>_BASE_URL` override.
pub const EXCHANGE_IDS: &[&str] = &[
    "binance",
    "binance_us",
    "binance_futures",
    "binance_delivery",
    "kucoin",
    "kucoin_futures",
    "bybit",
    "bybit_linear",
    "bybit_inverse",
    "okx",
    "okx_swap",
    "bitget",
    "bitget_futures",
    "coinbase",
    "hyperliquid",
];

static CONFIG: OnceCell<Config> = OnceCell::new();

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{key} has an invalid value: {v}")),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub fn load_credentials() -> Result<Credentials> {
    if let (Ok(api_key), Ok(api_secret)) = (env::var("API_KEY"), env::var("API_SECRET")) {
        if !api_key.is_empty() && !api_secret.is_empty() {
            let passphrase = env::var("API_PASSPHRASE").ok().filter(|p| !p.is_empty());
            return Ok(Credentials {
                api_key,
                api_secret,
                passphrase,
            });
        }
    }

    if let Ok(path) = env::var("API_CREDENTIALS_FILE") {
        let content = fs::read(&path).context("reading credentials file")?;
        let creds: Credentials =
            serde_json::from_slice(&content).context("parsing credentials file")?;
        if !creds.api_key.is_empty() && !creds.api_secret.is_empty() {
            return Ok(creds);
        }
    }

    Err(anyhow!(
        "API_KEY and API_SECRET must be set via env or credentials file"
    ))
}

impl Config {
    /// Defaults, overlaid by the TOML file named in `GATEWAY_CONFIG_FILE`,
    /// overlaid by individual environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match env::var("GATEWAY_CONFIG_FILE") {
            Ok(path) if !path.is_empty() => {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {path}"))?
            }
            _ => Config::default(),
        };

        if let Ok(proxy) = env::var("SOCKS5_PROXY") {
            if !proxy.is_empty() {
                cfg.proxy_url = Some(proxy);
            }
        }
        if let Some(v) = env_parse("MAX_RETRIES")? {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse("REQUEST_TIMEOUT_MS")? {
            cfg.request_timeout_ms = v;
        }
        if let Some(v) = env_parse("REFERENCE_TTL_SECS")? {
            cfg.reference_ttl_secs = v;
        }
        if let Some(v) = env_parse("RATE_SKEW_MS")? {
            cfg.rate_skew_ms = v;
        }
        if let Some(v) = env_flag("ENABLE_METRICS") {
            cfg.enable_metrics = v;
        }
        if let Ok(path) = env::var("SYMBOL_ALIASES_FILE") {
            if !path.is_empty() {
                cfg.symbol_aliases_file = Some(path);
            }
        }
        for id in EXCHANGE_IDS {
            let key = format!("{}_BASE_URL", id.to_uppercase());
            if let Ok(url) = env::var(&key) {
                if !url.is_empty() {
                    cfg.base_urls.insert((*id).to_string(), url);
                }
            }
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be at least 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(anyhow!("request_timeout_ms must be greater than zero"));
        }
        if self.reference_ttl_secs == 0 {
            return Err(anyhow!("reference_ttl_secs must be greater than zero"));
        }
        for (id, raw) in &self.base_urls {
            url::Url::parse(raw).with_context(|| format!("invalid base url for {id}: {raw}"))?;
        }
        if let Some(proxy) = &self.proxy_url {
            if proxy.contains("://") {
                return Err(anyhow!("SOCKS5_PROXY expects host:port, got {proxy}"));
            }
        }
        Ok(())
    }

    pub fn base_url(&self, id: &str) -> Option<&str> {
        self.base_urls.get(id).map(String::as_str)
    }
}

pub fn load() -> Result<&'static Config> {
    let cfg = Config::from_env()?;
    cfg.validate()?;
    if cfg.enable_metrics {
        let _ = crate::metrics::init_exporter();
    }
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn get() -> Option<&'static Config> {
    CONFIG.get()
}

/// Loaded configuration, or the defaults when `load` has not run.
pub fn current() -> Config {
    CONFIG.get().cloned().unwrap_or_default()
}

pub fn metrics_enabled() -> bool {
    CONFIG.get().map(|c| c.enable_metrics).unwrap_or(false)
}
