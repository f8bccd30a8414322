mod common;

use std::sync::Arc;

use agents::adapter::bitget::{limit_rules, BitgetAdapter, BITGET_EXCHANGES};
use agents::adapter::ExchangeAdapter;
use canonical::{CandleInterval, CandleQuery, NewOrder, OrderStatus, PositionSide, Side};
use common::{limiter, ScriptedTransport};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn ok(data: Value) -> Value {
    json!({"code": "00000", "msg": "success", "requestTime": 1695806875837u64, "data": data})
}

fn adapter(id: &str, transport: Arc<ScriptedTransport>) -> BitgetAdapter {
    let cfg = BITGET_EXCHANGES.iter().find(|c| c.id == id).unwrap();
    BitgetAdapter::with_transport(cfg, transport, limiter(id, limit_rules()))
}

#[tokio::test]
async fn error_code_fails_with_message() {
    let transport = ScriptedTransport::ok(vec![json!({
        "code": "40034", "msg": "Parameter symbol does not exist", "data": null
    })]);
    let a = adapter("bitget", transport);

    let env = a.latest_price("NOPE/USDT").await;
    assert_eq!(env.reason(), Some("Parameter symbol does not exist"));
}

#[tokio::test]
async fn futures_order_carries_product_and_margin() {
    let transport = ScriptedTransport::ok(vec![ok(json!({"orderId": "121211212122", "clientOid": "c1"}))]);
    let a = adapter("bitget_futures", transport.clone());

    let mut order = NewOrder::limit("BTC/USDT", Side::Buy, d("0.010"), d("27000"));
    order.client_order_id = Some("c1".into());
    order.reduce_only = true;
    let placed = a.open_order(&order).await.into_result().unwrap();

    let sent = transport.request(0);
    assert_eq!(sent.path, "/api/v2/mix/order/place-order");
    let body = sent.body.unwrap();
    assert_eq!(body["symbol"], "BTCUSDT");
    assert_eq!(body["productType"], "USDT-FUTURES");
    assert_eq!(body["marginMode"], "crossed");
    assert_eq!(body["marginCoin"], "USDT");
    assert_eq!(body["reduceOnly"], "YES");
    assert_eq!(body["force"], "gtc");
    assert_eq!(body["size"], "0.01");
    assert_eq!(placed.id, "121211212122");
    assert_eq!(placed.status, OrderStatus::New);
}

#[tokio::test]
async fn spot_order_detail_is_a_list() {
    let transport = ScriptedTransport::ok(vec![ok(json!([{
        "orderId": "1", "clientOid": "c", "symbol": "ETHUSDT", "side": "sell",
        "orderType": "limit", "status": "partially_filled", "price": "1800", "size": "1",
        "baseVolume": "0.4", "priceAvg": "1800", "cTime": "1695806875837", "uTime": "1695806875900"
    }]))]);
    let a = adapter("bitget", transport.clone());

    let order = a.get_order("ETH/USDT", "1").await.into_result().unwrap();
    let sent = transport.request(0);
    assert_eq!(sent.path, "/api/v2/spot/trade/orderInfo");
    assert_eq!(sent.query_value("productType"), None);
    assert_eq!(order.symbol, "ETH/USDT");
    assert_eq!(order.side, Side::Sell);
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.filled, d("0.4"));
}

#[tokio::test]
async fn empty_futures_listing_is_null() {
    let transport = ScriptedTransport::ok(vec![ok(json!({"entrustedList": null, "endId": null}))]);
    let a = adapter("bitget_futures", transport.clone());

    let orders = a.open_orders(None).await.into_result().unwrap();
    assert!(orders.is_empty());
    assert_eq!(transport.request(0).query_value("productType"), Some("USDT-FUTURES"));
}

#[tokio::test]
async fn contract_tick_scales_by_end_step() {
    let transport = ScriptedTransport::ok(vec![ok(json!([{
        "symbol": "BTCUSDT", "baseCoin": "BTC", "quoteCoin": "USDT", "symbolStatus": "normal",
        "pricePlace": "1", "priceEndStep": "5", "sizeMultiplier": "0.001",
        "minTradeNum": "0.001", "minTradeUSDT": "5", "maxLever": "125"
    }]))]);
    let a = adapter("bitget_futures", transport);

    let info = a.exchange_info("BTC/USDT").await.into_result().unwrap();
    assert_eq!(info.tick_size, d("0.5"));
    assert_eq!(info.price_precision, 1);
    assert_eq!(info.quantity_precision, 3);
    assert_eq!(info.max_leverage, Some(125));
    assert!(info.trading);
}

#[tokio::test]
async fn spot_rejects_two_hour_candles() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter("bitget", transport.clone());

    let query = CandleQuery {
        symbol: "BTC/USDT".into(),
        interval: CandleInterval::H2,
        start_time: None,
        end_time: None,
        limit: Some(10),
    };
    assert_eq!(
        a.candles(&query).await.reason(),
        Some("interval 2h not offered on spot")
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn hedge_mode_reads_the_usdt_account() {
    let transport = ScriptedTransport::ok(vec![ok(json!([
        {"marginCoin": "USDC", "posMode": "one_way_mode"},
        {"marginCoin": "USDT", "posMode": "hedge_mode", "accountEquity": "10", "available": "10"}
    ]))]);
    let a = adapter("bitget_futures", transport);

    assert_eq!(a.get_hedge_mode().await.data(), Some(&true));
}

#[tokio::test]
async fn hedged_short_is_negative() {
    let transport = ScriptedTransport::ok(vec![ok(json!([
        {"symbol": "ETHUSDT", "holdSide": "short", "posMode": "hedge_mode", "total": "1.5",
         "openPriceAvg": "1600", "markPrice": "1590", "unrealizedPL": "15", "leverage": "20",
         "marginMode": "crossed", "liquidationPrice": "0"}
    ]))]);
    let a = adapter("bitget_futures", transport.clone());

    let positions = a.positions(Some("ETH/USDT")).await.into_result().unwrap();
    let sent = transport.request(0);
    assert_eq!(sent.path, "/api/v2/mix/position/single-position");
    assert_eq!(sent.query_value("marginCoin"), Some("USDT"));
    assert_eq!(positions[0].side, PositionSide::Short);
    assert_eq!(positions[0].quantity, d("-1.5"));
    assert_eq!(positions[0].liquidation_price, None);
}

#[tokio::test]
async fn rebates_are_not_offered() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter("bitget", transport.clone());

    assert_eq!(a.check_affiliate("1").await.reason(), Some("method not supported"));
    assert!(transport.requests().is_empty());
}
