use gateway_core::config::{self, load_credentials, Config, Credentials};
use serial_test::serial;
use std::env;

const VARS: &[&str] = &[
    "GATEWAY_CONFIG_FILE",
    "SOCKS5_PROXY",
    "MAX_RETRIES",
    "REQUEST_TIMEOUT_MS",
    "REFERENCE_TTL_SECS",
    "RATE_SKEW_MS",
    "ENABLE_METRICS",
    "SYMBOL_ALIASES_FILE",
    "BINANCE_FUTURES_BASE_URL",
    "API_KEY",
    "API_SECRET",
    "API_PASSPHRASE",
    "API_CREDENTIALS_FILE",
];

fn clear_env() {
    for v in VARS {
        env::remove_var(v);
    }
}

fn temp_path(name: &str) -> std::path::PathBuf {
    let mut path = env::temp_dir();
    path.push(format!(
        "{}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos(),
        name
    ));
    path
}

#[test]
#[serial]
fn defaults_without_environment() {
    clear_env();
    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg.max_retries, 10);
    assert_eq!(cfg.request_timeout_ms, 10_000);
    assert_eq!(cfg.reference_ttl_secs, 1_800);
    assert_eq!(cfg.rate_skew_ms, 10);
    assert!(!cfg.enable_metrics);
    assert!(cfg.base_urls.is_empty());
    assert!(cfg.symbol_aliases_file.is_none());
    cfg.validate().unwrap();
}

#[test]
#[serial]
fn env_overrides_file_overrides_defaults() {
    clear_env();
    let path = temp_path("gateway.toml");
    std::fs::write(
        &path,
        r#"
max_retries = 3
rate_skew_ms = 25

[base_urls]
binance_futures = "http://file.invalid"
"#,
    )
    .unwrap();
    env::set_var("GATEWAY_CONFIG_FILE", &path);
    env::set_var("MAX_RETRIES", "5");
    env::set_var("BINANCE_FUTURES_BASE_URL", "http://127.0.0.1:9000");
    env::set_var("SYMBOL_ALIASES_FILE", "/etc/gateway/symbols.toml");

    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg.max_retries, 5);
    assert_eq!(cfg.symbol_aliases_file.as_deref(), Some("/etc/gateway/symbols.toml"));
    assert_eq!(cfg.rate_skew_ms, 25);
    assert_eq!(cfg.base_url("binance_futures"), Some("http://127.0.0.1:9000"));

    clear_env();
    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn malformed_number_is_an_error() {
    clear_env();
    env::set_var("REQUEST_TIMEOUT_MS", "soon");
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("REQUEST_TIMEOUT_MS"));
    clear_env();
}

#[test]
fn zero_retries_fails() {
    let cfg = Config {
        max_retries: 0,
        ..Config::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn zero_timeout_fails() {
    let cfg = Config {
        request_timeout_ms: 0,
        ..Config::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn invalid_base_url_fails() {
    let mut cfg = Config::default();
    cfg.base_urls.insert("okx".into(), "not a url".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn current_falls_back_to_defaults() {
    // nothing in this test binary calls `load`
    assert!(config::get().is_none());
    assert_eq!(config::current().max_retries, 10);
    assert!(!config::metrics_enabled());
}

#[test]
#[serial]
fn credentials_from_env_with_passphrase() {
    clear_env();
    env::set_var("API_KEY", "key");
    env::set_var("API_SECRET", "secret");
    env::set_var("API_PASSPHRASE", "phrase");
    let creds = load_credentials().unwrap();
    assert_eq!(creds.api_key, "key");
    assert_eq!(creds.passphrase.as_deref(), Some("phrase"));
    clear_env();
}

#[test]
#[serial]
fn credentials_from_file() {
    clear_env();
    let path = temp_path("creds.json");
    std::fs::write(&path, r#"{"api_key":"k","api_secret":"s"}"#).unwrap();
    env::set_var("API_CREDENTIALS_FILE", &path);
    let creds = load_credentials().unwrap();
    assert_eq!(creds.api_secret, "s");
    assert!(creds.passphrase.is_none());
    clear_env();
    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn missing_credentials_fail() {
    clear_env();
    assert!(load_credentials().is_err());
}

#[test]
fn credentials_debug_is_redacted() {
    let creds = Credentials::new("my-key", "my-secret").with_passphrase("pw");
    let printed = format!("{creds:?}");
    assert!(!printed.contains("my-key"));
    assert!(!printed.contains("my-secret"));
    assert!(!printed.contains("pw\""));
    assert!(printed.contains("***redacted***"));
}
