use std::sync::Arc;

use agents::adapter::binance::{limit_rules, BinanceAdapter, BINANCE_EXCHANGES};
use agents::transport::{Transport, TransportRequest};
use async_trait::async_trait;
use canonical::{CandleInterval, MarginType, OrderType, Side, TimeInForce};
use clap::Parser;
use exchange_gateway::cli::{
    build_adapter, execute, load_symbol_aliases, new_order, run, Cli, Command,
};
use gateway_core::config::{Config, Credentials};
use gateway_core::{RateLimiter, TransportError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing_test::traced_test;

struct Fixed(Result<Value, TransportError>);

#[async_trait]
impl Transport for Fixed {
    async fn request(&self, _req: &TransportRequest) -> Result<Value, TransportError> {
        self.0.clone()
    }
}

fn binance(reply: Result<Value, TransportError>) -> BinanceAdapter {
    let cfg = BINANCE_EXCHANGES.iter().find(|c| c.id == "binance").unwrap();
    BinanceAdapter::with_transport(
        cfg,
        Arc::new(Fixed(reply)),
        Arc::new(RateLimiter::new("cli-test", limit_rules())),
    )
}

#[test]
fn parses_order_arguments() {
    let cli = Cli::try_parse_from([
        "gateway", "-e", "okx", "open", "BTC/USDT", "buy", "0.5", "--price", "30000", "--tif", "ioc",
        "--reduce-only",
    ])
    .unwrap();
    assert_eq!(cli.exchange.as_deref(), Some("okx"));
    match cli.command {
        Command::Open {
            side,
            quantity,
            price,
            tif,
            reduce_only,
            ..
        } => {
            assert_eq!(side, Side::Buy);
            assert_eq!(quantity, Decimal::new(5, 1));
            assert_eq!(price, Some(Decimal::from(30000)));
            assert_eq!(tif, Some(TimeInForce::Ioc));
            assert!(reduce_only);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_typed_positionals() {
    let cli = Cli::try_parse_from(["gateway", "candles", "ETH/USDT", "15m", "--limit", "3", "-e", "bybit"]).unwrap();
    assert!(matches!(
        cli.command,
        Command::Candles { interval: CandleInterval::M15, limit: Some(3), .. }
    ));

    let cli = Cli::try_parse_from(["gateway", "-e", "bitget_futures", "margin", "BTC/USDT", "crossed"]).unwrap();
    assert!(matches!(cli.command, Command::Margin { mode: MarginType::Cross, .. }));

    assert!(Cli::try_parse_from(["gateway", "-e", "okx", "candles", "BTC/USDT", "7m"]).is_err());
    assert!(Cli::try_parse_from(["gateway", "-e", "okx", "open", "BTC/USDT", "hold", "1"]).is_err());
}

#[test]
fn order_type_follows_price_and_stop() {
    let d = Decimal::from;
    assert_eq!(new_order("A/B".into(), Side::Buy, d(1), None, None).order_type, OrderType::Market);
    assert_eq!(new_order("A/B".into(), Side::Buy, d(1), Some(d(2)), None).order_type, OrderType::Limit);
    assert_eq!(new_order("A/B".into(), Side::Buy, d(1), None, Some(d(2))).order_type, OrderType::StopMarket);
    let stop_limit = new_order("A/B".into(), Side::Sell, d(1), Some(d(2)), Some(d(3)));
    assert_eq!(stop_limit.order_type, OrderType::StopLimit);
    assert_eq!(stop_limit.time_in_force, Some(TimeInForce::Gtc));
}

#[test]
fn unknown_exchange_is_a_configuration_error() {
    let err = build_adapter("mtgox", Credentials::default()).err().unwrap();
    assert!(err.to_string().contains("unknown exchange mtgox"));
    assert!(err.to_string().contains("binance_futures"));

    let err = build_adapter("okx", Credentials::new("key", "secret")).err().unwrap();
    assert!(err.to_string().contains("API_PASSPHRASE"));
}

#[tokio::test]
async fn exchanges_command_needs_no_exchange() {
    let cli = Cli::try_parse_from(["gateway", "exchanges"]).unwrap();
    let outcome = run(cli).await.unwrap();
    assert!(outcome.ok);
    assert!(outcome.body.as_array().unwrap().contains(&json!("hyperliquid")));

    let cli = Cli::try_parse_from(["gateway", "prices"]).unwrap();
    assert!(run(cli).await.is_err());
}

#[tokio::test]
async fn envelope_is_printed_in_wire_shape() {
    let adapter = binance(Ok(json!({"symbol": "BTCUSDT", "price": "65000.10"})));

    let outcome = execute(&adapter, Command::Price { symbol: "BTC/USDT".into() })
        .await
        .unwrap();

    assert!(outcome.ok);
    let body = outcome.body;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["data"]["symbol"], "BTC/USDT");
    assert!(body["reason"].is_null());
    assert_eq!(body["usage"][0]["type"], "weight");
    assert!(body["timeProfile"].is_object());
}

#[tokio::test]
#[traced_test]
async fn failures_are_reported_not_raised() {
    let adapter = binance(Err(TransportError::new("Invalid symbol.")
        .with_status(400)
        .with_code("-1121")));

    let outcome = execute(&adapter, Command::Positions { symbol: None }).await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.body["reason"], "futures type missing");

    let outcome = execute(&adapter, Command::OpenOrders { symbol: None, count: true })
        .await
        .unwrap();
    assert_eq!(outcome.body["status"], "NOTOK");
    assert_eq!(outcome.body["reason"], "Invalid symbol.");
    assert!(logs_contain("operation failed"));
}

#[tokio::test]
async fn configured_aliases_rename_exchange_symbols() {
    let mut path = std::env::temp_dir();
    path.push(format!("cli_aliases_{}.json", std::process::id()));
    std::fs::write(&path, r#"[{"id": "LUNA2/USDT", "aliases": {"binance": ["LUNAUSDT"]}}]"#).unwrap();
    let cfg = Config {
        symbol_aliases_file: Some(path.to_string_lossy().into_owned()),
        ..Config::default()
    };

    load_symbol_aliases(&cfg).unwrap();
    let adapter = binance(Ok(json!({"symbol": "LUNAUSDT", "price": "0.61"})));
    let outcome = execute(&adapter, Command::Price { symbol: "LUNA2/USDT".into() })
        .await
        .unwrap();

    assert_eq!(outcome.body["data"]["symbol"], "LUNA2/USDT");
    let _ = std::fs::remove_file(path);

    let missing = Config {
        symbol_aliases_file: Some("/nonexistent/aliases.json".into()),
        ..Config::default()
    };
    assert!(load_symbol_aliases(&missing).is_err());
}
