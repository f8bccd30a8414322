mod common;

use std::sync::Arc;

use agents::adapter::okx::{limit_rules, OkxAdapter, OKX_EXCHANGES};
use agents::adapter::ExchangeAdapter;
use agents::transport::Method;
use canonical::{MarginType, NewOrder, OrderStatus, OrderType, PositionSide, Side, TimeInForce};
use common::{limiter, ScriptedTransport};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn ok(data: Value) -> Value {
    json!({"code": "0", "msg": "", "data": data})
}

fn adapter(id: &str, transport: Arc<ScriptedTransport>) -> OkxAdapter {
    let cfg = OKX_EXCHANGES.iter().find(|c| c.id == id).unwrap();
    OkxAdapter::with_transport(cfg, transport, limiter(id, limit_rules()))
}

fn order_row(state: &str) -> Value {
    json!({
        "ordId": "312269865356374016", "clOrdId": "b1", "instId": "BTC-USDT-SWAP",
        "side": "buy", "ordType": "limit", "state": state, "px": "30000", "sz": "2",
        "accFillSz": "1", "avgPx": "29990", "cTime": "1597026383085", "uTime": "1597026383090"
    })
}

#[tokio::test]
async fn item_level_errors_win_over_the_envelope_message() {
    let transport = ScriptedTransport::ok(vec![json!({
        "code": "1",
        "msg": "All operations failed",
        "data": [{"ordId": "", "clOrdId": "x", "sCode": "51008", "sMsg": "Order failed. Insufficient USDT balance"}]
    })]);
    let a = adapter("okx", transport);

    let env = a.open_order(&NewOrder::market("BTC/USDT", Side::Buy, d("1"))).await;
    assert_eq!(env.reason(), Some("Order failed. Insufficient USDT balance"));
}

#[tokio::test]
async fn swap_order_uses_cross_margin_and_swap_instrument() {
    let transport = ScriptedTransport::ok(vec![ok(json!([
        {"ordId": "312269865356374016", "clOrdId": "mine", "sCode": "0", "sMsg": ""}
    ]))]);
    let a = adapter("okx_swap", transport.clone());

    let mut order = NewOrder::limit("BTC/USDT", Side::Sell, d("2"), d("30000.50"));
    order.client_order_id = Some("mine".into());
    order.time_in_force = Some(TimeInForce::Ioc);
    order.reduce_only = true;
    let placed = a.open_order(&order).await.into_result().unwrap();

    let sent = transport.request(0);
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.path, "/api/v5/trade/order");
    let body = sent.body.unwrap();
    assert_eq!(body["instId"], "BTC-USDT-SWAP");
    assert_eq!(body["tdMode"], "cross");
    assert_eq!(body["ordType"], "ioc");
    assert_eq!(body["px"], "30000.5");
    assert_eq!(body["reduceOnly"], true);
    assert_eq!(placed.id, "312269865356374016");
    assert_eq!(placed.client_order_id.as_deref(), Some("mine"));
    assert_eq!(placed.symbol, "BTC/USDT");
}

#[tokio::test]
async fn stop_orders_are_rejected_locally() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter("okx", transport.clone());

    let mut order = NewOrder::market("BTC/USDT", Side::Sell, d("1"));
    order.order_type = OrderType::StopMarket;
    let env = a.open_order(&order).await;
    assert_eq!(env.reason(), Some("stop orders need the algo endpoint"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn cancel_reads_the_order_back() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!([{"ordId": "312269865356374016", "sCode": "0", "sMsg": ""}])),
        ok(json!([order_row("canceled")])),
    ]);
    let a = adapter("okx_swap", transport.clone());

    let env = a.cancel_order("BTC/USDT", "312269865356374016").await;

    let sent = transport.requests();
    assert_eq!(sent[0].path, "/api/v5/trade/cancel-order");
    assert_eq!(sent[1].query_value("ordId"), Some("312269865356374016"));
    let o = env.data().unwrap();
    assert_eq!(o.status, OrderStatus::Canceled);
    assert_eq!(o.filled, d("1"));
    assert_eq!(o.average_price, Some(d("29990")));
    assert_eq!(o.created_at, Some(1597026383085));
}

#[tokio::test]
async fn fees_are_reported_as_positive_rates() {
    let transport = ScriptedTransport::ok(vec![ok(json!([{
        "instType": "SWAP", "maker": "", "taker": "",
        "makerU": "-0.0002", "takerU": "-0.0005", "level": "Lv1"
    }]))]);
    let a = adapter("okx_swap", transport.clone());

    let fee = a.user_fee("BTC/USDT").await.into_result().unwrap();
    let sent = transport.request(0);
    assert_eq!(sent.query_value("instFamily"), Some("BTC-USDT"));
    assert_eq!(sent.query_value("instId"), None);
    assert_eq!(fee.maker, d("0.0002"));
    assert_eq!(fee.taker, d("0.0005"));
    assert_eq!(fee.symbol, "BTC/USDT");
}

#[tokio::test]
async fn margin_type_is_echoed_without_a_request() {
    let transport = ScriptedTransport::ok(vec![]);
    let swap = adapter("okx_swap", transport.clone());
    let spot = adapter("okx", transport.clone());

    let env = swap.set_margin_type("ETH/USDT", MarginType::Isolated).await;
    assert_eq!(env.data(), Some(&MarginType::Isolated));
    assert_eq!(
        spot.set_margin_type("ETH/USDT", MarginType::Cross).await.reason(),
        Some("futures type missing")
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn hedge_mode_reads_position_mode() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!([{"uid": "44705892343619584", "posMode": "long_short_mode"}])),
        ok(json!([{"posMode": "net_mode"}])),
    ]);
    let a = adapter("okx_swap", transport.clone());

    assert_eq!(a.get_hedge_mode().await.data(), Some(&true));
    assert_eq!(a.set_hedge_mode(false).await.data(), Some(&false));
    assert_eq!(transport.request(1).body.unwrap()["posMode"], "net_mode");
}

#[tokio::test]
async fn hedged_positions_are_signed_by_side() {
    let transport = ScriptedTransport::ok(vec![ok(json!([
        {"instId": "ETH-USDT-SWAP", "posSide": "short", "pos": "3", "avgPx": "3000",
         "markPx": "2950", "upl": "150", "lever": "10", "mgnMode": "isolated", "liqPx": "3300"},
        {"instId": "BTC-USDT-SWAP", "posSide": "net", "pos": "0", "avgPx": "", "lever": "5", "mgnMode": "cross"}
    ]))]);
    let a = adapter("okx_swap", transport);

    let positions = a.positions(None).await.into_result().unwrap();
    assert_eq!(positions.len(), 1);
    let p = &positions[0];
    assert_eq!(p.symbol, "ETH/USDT");
    assert_eq!(p.side, PositionSide::Short);
    assert_eq!(p.quantity, d("-3"));
    assert_eq!(p.margin_type, Some(MarginType::Isolated));
    assert_eq!(p.liquidation_price, Some(d("3300")));
}

#[tokio::test]
async fn brackets_need_a_symbol() {
    let transport = ScriptedTransport::ok(vec![ok(json!([
        {"tier": "1", "maxLever": "125", "minSz": "0", "maxSz": "500", "mmr": "0.004"},
        {"tier": "2", "maxLever": "100", "minSz": "500", "maxSz": "1000", "mmr": "0.005"}
    ]))]);
    let a = adapter("okx_swap", transport.clone());

    assert_eq!(a.leverage_brackets(None).await.reason(), Some("symbol is required"));
    let brackets = a
        .leverage_brackets(Some("BTC/USDT"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(brackets[1].bracket, 2);
    assert_eq!(brackets[1].notional_floor, d("500"));
    assert_eq!(brackets[0].initial_leverage, 125);
}

#[tokio::test]
async fn non_invitee_code_means_not_an_affiliate() {
    let transport = ScriptedTransport::ok(vec![
        ok(json!([{"inviteeLv": "2", "joinTime": "1597026383085"}])),
        json!({"code": "51621", "msg": "The user isn't your invitee", "data": []}),
        json!({"code": "50113", "msg": "Invalid Sign", "data": []}),
    ]);
    let a = adapter("okx", transport);

    assert!(a.check_affiliate("1").await.into_result().unwrap().is_affiliate);
    assert!(!a.check_affiliate("2").await.into_result().unwrap().is_affiliate);
    assert_eq!(a.check_affiliate("3").await.reason(), Some("Invalid Sign"));
}
