use agents::adapter::ExchangeAdapter;
use agents::registry::{choose, exchange_ids};
use canonical::MarketKind;
use gateway_core::config::Credentials;

fn creds() -> Credentials {
    Credentials::new("key", "secret").with_passphrase("phrase")
}

#[test]
fn every_builtin_id_is_registered() {
    let ids = exchange_ids();
    for id in [
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
    ] {
        assert!(ids.contains(&id), "{id} missing from {ids:?}");
    }
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn unknown_id_has_no_factory() {
    assert!(choose("mtgox").is_none());
    assert!(choose("").is_none());
}

#[test]
fn lookup_ignores_case_and_whitespace() {
    assert!(choose(" Binance_Futures ").is_some());
}

#[tokio::test]
async fn factory_binds_market_kind_by_id() {
    let cases = [
        ("binance", MarketKind::Spot),
        ("binance_futures", MarketKind::LinearFutures),
        ("binance_delivery", MarketKind::InverseFutures),
        ("kucoin_futures", MarketKind::LinearFutures),
        ("bybit_inverse", MarketKind::InverseFutures),
        ("okx_swap", MarketKind::LinearFutures),
        ("coinbase", MarketKind::Spot),
        ("hyperliquid", MarketKind::LinearFutures),
    ];
    for (id, market) in cases {
        let factory = choose(id).unwrap();
        let adapter = factory(creds()).unwrap();
        assert_eq!(adapter.market(), Some(market), "{id}");
        assert_eq!(adapter.exchange(), id);
    }
}

#[tokio::test]
async fn spot_adapter_rejects_futures_operations_locally() {
    let adapter = choose("binance").unwrap()(creds()).unwrap();

    let env = adapter.positions(None).await;
    assert_eq!(env.reason(), Some("futures type missing"));
    let env = adapter.set_leverage("BTC/USDT", 10).await;
    assert_eq!(env.reason(), Some("futures type missing"));
    assert!(env.time_profile().exchange_request_start_time.is_none());
}

#[tokio::test]
async fn adapters_of_one_id_share_a_limiter() {
    let a = choose("okx").unwrap()(creds()).unwrap();
    let b = choose("okx").unwrap()(creds()).unwrap();
    assert!(std::sync::Arc::ptr_eq(a.connector().limiter(), b.connector().limiter()));
}

#[test]
fn passphrase_exchanges_refuse_a_key_without_passphrase() {
    for id in ["kucoin", "kucoin_futures", "okx", "okx_swap", "bitget", "bitget_futures"] {
        let err = choose(id).unwrap()(Credentials::new("key", "secret")).err();
        let err = err.unwrap_or_else(|| panic!("{id} accepted a key without passphrase"));
        assert!(err.to_string().contains("API_PASSPHRASE"), "{id}: {err}");
    }
    assert!(choose("binance").unwrap()(Credentials::new("key", "secret")).is_ok());
}

#[tokio::test]
async fn private_calls_without_credentials_fail_before_sending() {
    for id in ["binance", "okx"] {
        let adapter = choose(id).unwrap()(Credentials::default()).unwrap();

        let env = adapter.get_balance(None).await;

        assert_eq!(env.reason(), Some("api credentials missing"), "{id}");
        assert_eq!(env.time_profile().attempts, 1);
        assert!(env.time_profile().queue_start_time.is_none());
        assert!(env.time_profile().exchange_request_start_time.is_none());
    }
}
