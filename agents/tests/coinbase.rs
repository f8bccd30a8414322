mod common;

use std::sync::Arc;

use agents::adapter::coinbase::{limit_rules, CoinbaseAdapter, COINBASE_EXCHANGES};
use agents::adapter::ExchangeAdapter;
use canonical::{
    CandleInterval, CandleQuery, NewOrder, OrderStatus, OrderType, Side, TimeInForce,
};
use common::{limiter, ScriptedTransport};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn adapter(transport: Arc<ScriptedTransport>) -> CoinbaseAdapter {
    CoinbaseAdapter::with_transport(&COINBASE_EXCHANGES[0], transport, limiter("coinbase", limit_rules()))
}

fn historical(status: &str, filled: &str) -> Value {
    json!({"order": {
        "order_id": "0000-000000-000000", "client_order_id": "cb-1", "product_id": "BTC-USD",
        "side": "BUY", "status": status, "filled_size": filled, "average_filled_price": "50000",
        "order_configuration": {"limit_limit_gtc": {"base_size": "0.02", "limit_price": "50000", "post_only": false}},
        "created_time": "2024-01-01T00:00:00Z"
    }})
}

#[tokio::test]
async fn order_configuration_follows_type_and_time_in_force() {
    let transport = ScriptedTransport::ok(vec![json!({
        "success": true,
        "success_response": {"order_id": "11111-00000-000000", "product_id": "BTC-USD", "side": "BUY"}
    })]);
    let a = adapter(transport.clone());

    let mut order = NewOrder::limit("BTC/USD", Side::Buy, d("0.02"), d("50000.00"));
    order.time_in_force = Some(TimeInForce::Fok);
    let placed = a.open_order(&order).await.into_result().unwrap();

    let body = transport.request(0).body.unwrap();
    assert_eq!(body["product_id"], "BTC-USD");
    assert_eq!(body["side"], "BUY");
    let cfg = &body["order_configuration"]["limit_limit_fok"];
    assert_eq!(cfg["base_size"], "0.02");
    assert_eq!(cfg["limit_price"], "50000");
    assert_eq!(placed.id, "11111-00000-000000");
    // a client id is generated when none is given
    assert_eq!(
        placed.client_order_id.as_deref(),
        body["client_order_id"].as_str()
    );
}

#[tokio::test]
async fn unsuccessful_placement_is_a_domain_failure() {
    let transport = ScriptedTransport::ok(vec![json!({
        "success": false,
        "failure_reason": "UNKNOWN_FAILURE_REASON",
        "error_response": {"error": "INSUFFICIENT_FUND", "message": "Insufficient balance in source account"}
    })]);
    let a = adapter(transport);

    let env = a.open_order(&NewOrder::market("BTC/USD", Side::Buy, d("1"))).await;
    assert_eq!(env.reason(), Some("Insufficient balance in source account"));
}

#[tokio::test]
async fn stop_market_and_priceless_limits_are_rejected_locally() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter(transport.clone());

    let mut stop = NewOrder::market("BTC/USD", Side::Sell, d("1"));
    stop.order_type = OrderType::StopMarket;
    assert_eq!(a.open_order(&stop).await.reason(), Some("stop market orders are not offered"));

    let mut limit = NewOrder::market("BTC/USD", Side::Sell, d("1"));
    limit.order_type = OrderType::Limit;
    assert_eq!(a.open_order(&limit).await.reason(), Some("limit orders need a price"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn open_order_with_fills_is_partially_filled() {
    let transport = ScriptedTransport::ok(vec![historical("OPEN", "0.01")]);
    let a = adapter(transport.clone());

    let order = a.get_order("BTC/USD", "0000-000000-000000").await.into_result().unwrap();
    assert_eq!(
        transport.request(0).path,
        "/api/v3/brokerage/orders/historical/0000-000000-000000"
    );
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.quantity, d("0.02"));
    assert_eq!(order.price, Some(d("50000")));
    assert_eq!(order.symbol, "BTC/USD");
    assert_eq!(order.created_at, Some(1704067200000));
}

#[tokio::test]
async fn failed_cancel_skips_the_read_back() {
    let transport = ScriptedTransport::ok(vec![json!({
        "results": [{"success": false, "failure_reason": "UNKNOWN_CANCEL_ORDER", "order_id": "x"}]
    })]);
    let a = adapter(transport.clone());

    let env = a.cancel_order("BTC/USD", "x").await;
    assert_eq!(env.reason(), Some("UNKNOWN_CANCEL_ORDER"));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn cancel_reads_the_order_back() {
    let transport = ScriptedTransport::ok(vec![
        json!({"results": [{"success": true, "order_id": "0000-000000-000000"}]}),
        historical("CANCELLED", "0"),
    ]);
    let a = adapter(transport.clone());

    let order = a
        .cancel_order("BTC/USD", "0000-000000-000000")
        .await
        .into_result()
        .unwrap();
    assert_eq!(transport.request(0).body.unwrap()["order_ids"][0], "0000-000000-000000");
    assert_eq!(order.status, OrderStatus::Canceled);
}

#[tokio::test]
async fn candles_use_second_bounds_and_come_back_ascending() {
    let transport = ScriptedTransport::ok(vec![json!({"candles": [
        {"start": "1704067260", "low": "1", "high": "3", "open": "2", "close": "2.5", "volume": "10"},
        {"start": "1704067200", "low": "1", "high": "2", "open": "1.5", "close": "2", "volume": "5"}
    ]})]);
    let a = adapter(transport.clone());

    let query = CandleQuery {
        symbol: "ETH/USD".into(),
        interval: CandleInterval::M1,
        start_time: Some(1704067200000),
        end_time: Some(1704067320000),
        limit: None,
    };
    let candles = a.candles(&query).await.into_result().unwrap();

    let sent = transport.request(0);
    assert_eq!(sent.path, "/api/v3/brokerage/products/ETH-USD/candles");
    assert_eq!(sent.query_value("start"), Some("1704067200"));
    assert_eq!(sent.query_value("end"), Some("1704067320"));
    assert_eq!(sent.query_value("granularity"), Some("ONE_MINUTE"));
    assert_eq!(candles[0].open_time, 1704067200000);
    assert_eq!(candles[1].close, d("2.5"));
}

#[tokio::test]
async fn unsupported_intervals_are_rejected() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter(transport.clone());

    let query = CandleQuery {
        symbol: "ETH/USD".into(),
        interval: CandleInterval::H4,
        start_time: None,
        end_time: None,
        limit: None,
    };
    assert_eq!(a.candles(&query).await.reason(), Some("interval 4h not offered"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn spot_only_venue() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter(transport.clone());

    assert_eq!(a.get_hedge_mode().await.reason(), Some("futures type missing"));
    assert_eq!(a.rebate_records(&Default::default()).await.reason(), Some("method not supported"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn balances_filter_by_asset() {
    let transport = ScriptedTransport::ok(vec![json!({"accounts": [
        {"currency": "BTC", "available_balance": {"value": "1.5", "currency": "BTC"}, "hold": {"value": "0.5", "currency": "BTC"}},
        {"currency": "USD", "available_balance": {"value": "100", "currency": "USD"}}
    ]})]);
    let a = adapter(transport);

    let balances = a.get_balance(Some("btc")).await.into_result().unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].total, d("2"));
    assert_eq!(balances[0].locked, d("0.5"));
}
