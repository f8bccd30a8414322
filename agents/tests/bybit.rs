mod common;

use std::sync::Arc;

use agents::adapter::bybit::{limit_rules, BybitAdapter, BYBIT_EXCHANGES};
use agents::adapter::ExchangeAdapter;
use canonical::{MarginType, OrderStatus, OrderType, PositionSide};
use common::{limiter, ScriptedTransport};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn ok(result: Value) -> Value {
    json!({"retCode": 0, "retMsg": "OK", "result": result, "time": 1700000000000u64})
}

fn adapter(id: &str, transport: Arc<ScriptedTransport>) -> BybitAdapter {
    let cfg = BYBIT_EXCHANGES.iter().find(|c| c.id == id).unwrap();
    BybitAdapter::with_transport(cfg, transport, limiter(id, limit_rules()))
}

fn order_row(id: &str, status: &str) -> Value {
    json!({
        "orderId": id, "orderLinkId": "link", "symbol": "BTCUSDT", "side": "Buy",
        "orderType": "Limit", "orderStatus": status, "price": "30000", "qty": "0.1",
        "cumExecQty": "0", "avgPrice": "", "triggerPrice": "0",
        "createdTime": "1700000000000", "updatedTime": "1700000001000"
    })
}

#[tokio::test]
async fn unchanged_leverage_code_is_success() {
    let transport = ScriptedTransport::ok(vec![
        json!({"retCode": 110043, "retMsg": "leverage not modified", "result": {}}),
    ]);
    let a = adapter("bybit_linear", transport.clone());

    let lev = a.set_leverage("BTC/USDT", 10).await.into_result().unwrap();
    assert_eq!(lev.leverage, 10);
    assert_eq!(lev.symbol, "BTC/USDT");
    let body = transport.request(0).body.unwrap();
    assert_eq!(body["category"], "linear");
    assert_eq!(body["buyLeverage"], "10");
}

#[tokio::test]
async fn other_codes_fail_with_ret_msg() {
    let transport = ScriptedTransport::ok(vec![
        json!({"retCode": 10001, "retMsg": "params error: symbol invalid", "result": {}}),
    ]);
    let a = adapter("bybit", transport);

    let env = a.latest_price("NOPE/USDT").await;
    assert_eq!(env.reason(), Some("params error: symbol invalid"));
}

#[tokio::test(start_paused = true)]
async fn throttled_body_is_retried() {
    let transport = ScriptedTransport::ok(vec![
        json!({"retCode": 10006, "retMsg": "Too many visits!", "result": {}}),
        ok(json!({"list": [{"symbol": "BTCUSDT", "lastPrice": "64000.5"}]})),
    ]);
    let a = adapter("bybit", transport.clone());

    let env = a.latest_price("BTC/USDT").await;

    assert_eq!(env.time_profile().attempts, 2);
    let tick = env.into_result().unwrap();
    assert_eq!(tick.price, d("64000.5"));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn open_orders_follow_the_cursor() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!({"list": [order_row("1", "New")], "nextPageCursor": "page-2"})),
        ok(json!({"list": [order_row("2", "PartiallyFilled")], "nextPageCursor": ""})),
    ]);
    let a = adapter("bybit_linear", transport.clone());

    let env = a.open_orders(None).await;

    let sent = transport.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].query_value("settleCoin"), Some("USDT"));
    assert_eq!(sent[0].query_value("cursor"), None);
    assert_eq!(sent[1].query_value("cursor"), Some("page-2"));
    let orders = env.into_result().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].status, OrderStatus::PartiallyFilled);
    assert_eq!(orders[0].order_type, OrderType::Limit);
    assert_eq!(orders[0].average_price, None);
}

#[tokio::test]
async fn get_order_falls_back_to_history() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!({"list": [], "nextPageCursor": ""})),
        ok(json!({"list": [order_row("9", "Filled")]})),
    ]);
    let a = adapter("bybit", transport.clone());

    let order = a.get_order("BTC/USDT", "9").await.into_result().unwrap();

    let sent = transport.requests();
    assert_eq!(sent[0].path, "/v5/order/realtime");
    assert_eq!(sent[1].path, "/v5/order/history");
    assert_eq!(sent[1].query_value("category"), Some("spot"));
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.client_order_id.as_deref(), Some("link"));
    assert_eq!(order.created_at, Some(1700000000000));
}

#[tokio::test]
async fn unknown_order_is_a_domain_failure() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!({"list": []})),
        ok(json!({"list": []})),
    ]);
    let a = adapter("bybit", transport);

    let env = a.get_order("BTC/USDT", "404").await;
    assert_eq!(env.reason(), Some("order 404 not found"));
}

#[tokio::test]
async fn one_way_short_is_negative_quantity() {
    let transport = ScriptedTransport::ok(vec![ok(json!({
        "list": [
            {"symbol": "ETHUSDT", "side": "Sell", "size": "2", "positionIdx": 0, "avgPrice": "3000",
             "markPrice": "2990", "unrealisedPnl": "20", "leverage": "5", "tradeMode": 0, "liqPrice": ""},
            {"symbol": "BTCUSDT", "side": "", "size": "0", "positionIdx": 0, "avgPrice": "0",
             "leverage": "10", "tradeMode": 0}
        ],
        "nextPageCursor": ""
    }))]);
    let a = adapter("bybit_linear", transport);

    let positions = a.positions(None).await.into_result().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].side, PositionSide::Both);
    assert_eq!(positions[0].quantity, d("-2"));
    assert_eq!(positions[0].margin_type, Some(MarginType::Cross));
    assert_eq!(positions[0].liquidation_price, None);
}

#[tokio::test]
async fn risk_tiers_chain_floors_to_previous_caps() {
    let transport = ScriptedTransport::ok(vec![ok(json!({
        "category": "linear",
        "list": [
            {"id": 1, "symbol": "BTCUSDT", "riskLimitValue": "2000000", "maintenanceMargin": "0.005", "maxLeverage": "100.00"},
            {"id": 2, "symbol": "BTCUSDT", "riskLimitValue": "2600000", "maintenanceMargin": "0.0056", "maxLeverage": "83.33"}
        ]
    }))]);
    let a = adapter("bybit_linear", transport);

    let brackets = a
        .leverage_brackets(Some("BTC/USDT"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(brackets[0].notional_floor, Decimal::ZERO);
    assert_eq!(brackets[1].notional_floor, d("2000000"));
    assert_eq!(brackets[1].notional_cap, d("2600000"));
    assert_eq!(brackets[1].initial_leverage, 83);
}

#[tokio::test]
async fn hedge_mode_from_position_slots() {
    let transport = ScriptedTransport::ok(vec![ok(json!({
        "list": [{"symbol": "BTCUSDT", "positionIdx": 1, "size": "0"}]
    }))]);
    let linear = adapter("bybit_linear", transport.clone());
    assert_eq!(linear.get_hedge_mode().await.data(), Some(&true));

    let inverse = adapter("bybit_inverse", transport.clone());
    assert_eq!(inverse.get_hedge_mode().await.data(), Some(&false));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn affiliate_check_matches_uid() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!({"uid": "1513500", "vipLevel": "No VIP"})),
        ok(json!({})),
    ]);
    let a = adapter("bybit", transport);

    let yes = a.check_affiliate("1513500").await.into_result().unwrap();
    assert!(yes.is_affiliate);
    let no = a.check_affiliate("42").await.into_result().unwrap();
    assert!(!no.is_affiliate);
    assert_eq!(no.uid, "42");
}
