mod common;

use std::sync::Arc;

use agents::adapter::binance::{limit_rules, BinanceAdapter, BINANCE_EXCHANGES};
use agents::adapter::ExchangeAdapter;
use agents::transport::Method;
use canonical::{
    MarginType, NewOrder, OrderStatus, PositionSide, RebateQuery, Side, TradeQuery,
};
use common::{limiter, venue_error, ScriptedTransport};
use rust_decimal::Decimal;
use serde_json::json;

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn adapter(id: &str, transport: Arc<ScriptedTransport>) -> BinanceAdapter {
    let cfg = BINANCE_EXCHANGES.iter().find(|c| c.id == id).unwrap();
    BinanceAdapter::with_transport(cfg, transport, limiter(id, limit_rules()))
}

#[tokio::test]
async fn spot_limit_order_is_sent_and_mapped() {
    let transport = ScriptedTransport::ok(vec![json!({
        "symbol": "BTCUSDT",
        "orderId": 28,
        "clientOrderId": "abc",
        "transactTime": 1507725176595u64,
        "price": "30000.00",
        "origQty": "0.01",
        "executedQty": "0.005",
        "cummulativeQuoteQty": "150.0",
        "status": "PARTIALLY_FILLED",
        "type": "LIMIT",
        "side": "BUY"
    })]);
    let a = adapter("binance", transport.clone());

    let mut order = NewOrder::limit("BTC/USDT", Side::Buy, d("0.01"), d("30000"));
    order.client_order_id = Some("abc".into());
    let env = a.open_order(&order).await;

    let sent = transport.request(0);
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.path, "/api/v3/order");
    assert!(sent.private);
    assert_eq!(sent.query_value("symbol"), Some("BTCUSDT"));
    assert_eq!(sent.query_value("type"), Some("LIMIT"));
    assert_eq!(sent.query_value("timeInForce"), Some("GTC"));
    assert_eq!(sent.query_value("price"), Some("30000"));
    assert_eq!(sent.query_value("newClientOrderId"), Some("abc"));
    assert_eq!(sent.query_value("newOrderRespType"), Some("RESULT"));
    assert_eq!(sent.query_value("reduceOnly"), None);

    let o = env.data().unwrap();
    assert_eq!(o.id, "28");
    assert_eq!(o.symbol, "BTC/USDT");
    assert_eq!(o.status, OrderStatus::PartiallyFilled);
    assert_eq!(o.filled, d("0.005"));
    assert_eq!(o.average_price, Some(d("30000")));
    assert_eq!(o.created_at, Some(1507725176595));
}

#[tokio::test]
async fn coin_margined_symbols_use_perp_suffix() {
    let transport = ScriptedTransport::ok(vec![json!([
        {"symbol": "BTCUSD_PERP", "ps": "BTCUSD", "price": "60000.1", "time": 1700000000000u64}
    ])]);
    let a = adapter("binance_delivery", transport.clone());

    let env = a.latest_price("BTC/USD").await;

    assert_eq!(transport.request(0).path, "/dapi/v1/ticker/price");
    assert_eq!(transport.request(0).query_value("symbol"), Some("BTCUSD_PERP"));
    let tick = env.data().unwrap();
    assert_eq!(tick.symbol, "BTC/USD");
    assert_eq!(tick.price, d("60000.1"));
    assert_eq!(tick.timestamp, Some(1700000000000));
}

#[tokio::test]
async fn unchanged_margin_type_counts_as_success() {
    let transport = ScriptedTransport::new(vec![Err(venue_error(
        400,
        "-4046",
        "No need to change margin type.",
    ))]);
    let a = adapter("binance_futures", transport.clone());

    let env = a.set_margin_type("ETH/USDT", MarginType::Isolated).await;

    assert_eq!(env.data(), Some(&MarginType::Isolated));
    let sent = transport.request(0);
    assert_eq!(sent.path, "/fapi/v1/marginType");
    assert_eq!(sent.query_value("marginType"), Some("ISOLATED"));
}

#[tokio::test]
async fn other_margin_errors_still_fail() {
    let transport = ScriptedTransport::new(vec![Err(venue_error(
        400,
        "-4047",
        "Margin type cannot be changed if there exists open orders.",
    ))]);
    let a = adapter("binance_futures", transport);

    let env = a.set_margin_type("ETH/USDT", MarginType::Cross).await;
    assert_eq!(
        env.reason(),
        Some("Margin type cannot be changed if there exists open orders.")
    );
}

#[tokio::test]
async fn spot_has_no_futures_operations() {
    let transport = ScriptedTransport::ok(vec![]);
    let a = adapter("binance", transport.clone());

    assert_eq!(a.get_hedge_mode().await.reason(), Some("futures type missing"));
    assert_eq!(a.leverage_brackets(None).await.reason(), Some("futures type missing"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn single_symbol_brackets_arrive_as_object() {
    let transport = ScriptedTransport::ok(vec![json!({
        "symbol": "ETHUSDT",
        "brackets": [
            {"bracket": 1, "initialLeverage": 75, "notionalCap": 10000, "notionalFloor": 0, "maintMarginRatio": 0.0065},
            {"bracket": 2, "initialLeverage": 50, "notionalCap": 50000, "notionalFloor": 10000, "maintMarginRatio": 0.01}
        ]
    })]);
    let a = adapter("binance_futures", transport);

    let brackets = a.leverage_brackets(Some("ETH/USDT")).await.into_result().unwrap();
    assert_eq!(brackets.len(), 2);
    assert_eq!(brackets[1].symbol, "ETH/USDT");
    assert_eq!(brackets[1].initial_leverage, 50);
    assert_eq!(brackets[1].notional_floor, d("10000"));
    assert_eq!(brackets[1].maintenance_margin_ratio, d("0.01"));
}

#[tokio::test]
async fn spot_balances_skip_empty_assets() {
    let transport = ScriptedTransport::ok(vec![json!({
        "balances": [
            {"asset": "BTC", "free": "0.5", "locked": "0.1"},
            {"asset": "LTC", "free": "0.0", "locked": "0.0"}
        ]
    })]);
    let a = adapter("binance", transport);

    let balances = a.get_balance(None).await.into_result().unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].asset, "BTC");
    assert_eq!(balances[0].total, d("0.6"));
}

#[tokio::test]
async fn positions_drop_flat_entries() {
    let transport = ScriptedTransport::ok(vec![json!([
        {"symbol": "BTCUSDT", "positionAmt": "-0.010", "entryPrice": "65000", "markPrice": "64000",
         "unRealizedProfit": "10", "liquidationPrice": "0", "leverage": "20",
         "marginType": "cross", "positionSide": "BOTH"},
        {"symbol": "ETHUSDT", "positionAmt": "0.000", "entryPrice": "0", "leverage": "20",
         "marginType": "cross", "positionSide": "BOTH"}
    ])]);
    let a = adapter("binance_futures", transport);

    let positions = a.positions(None).await.into_result().unwrap();
    assert_eq!(positions.len(), 1);
    let p = &positions[0];
    assert_eq!(p.symbol, "BTC/USDT");
    assert_eq!(p.side, PositionSide::Both);
    assert_eq!(p.quantity, d("-0.01"));
    assert_eq!(p.margin_type, Some(MarginType::Cross));
    assert_eq!(p.leverage, Some(20));
    assert_eq!(p.liquidation_price, None);
}

#[tokio::test]
async fn exchange_info_derives_precision_from_filters() {
    let transport = ScriptedTransport::ok(vec![json!({
        "symbols": [{
            "symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.01000000"},
                {"filterType": "LOT_SIZE", "stepSize": "0.00001000", "minQty": "0.00001000"},
                {"filterType": "NOTIONAL", "minNotional": "5.00000000"}
            ]
        }]
    })]);
    let a = adapter("binance", transport.clone());

    let info = a.exchange_info("BTC/USDT").await.into_result().unwrap();
    assert_eq!(transport.request(0).query_value("symbol"), Some("BTCUSDT"));
    assert!(info.trading);
    assert_eq!(info.price_precision, 2);
    assert_eq!(info.quantity_precision, 5);
    assert_eq!(info.min_notional, Some(d("5")));
}

#[tokio::test]
async fn trades_forward_pagination_parameters() {
    let transport = ScriptedTransport::ok(vec![json!([
        {"symbol": "BNBBTC", "id": 28457, "orderId": 100234, "price": "4.00000100", "qty": "12.00000000",
         "commission": "10.10000000", "commissionAsset": "BNB", "time": 1499865549590u64,
         "isBuyer": true, "isMaker": false}
    ])]);
    let a = adapter("binance", transport.clone());

    let query = TradeQuery {
        symbol: "BNB/BTC".into(),
        start_time: None,
        end_time: None,
        limit: Some(10),
        from_id: Some("28000".into()),
    };
    let trades = a.trades(&query).await.into_result().unwrap();
    let sent = transport.request(0);
    assert_eq!(sent.query_value("fromId"), Some("28000"));
    assert_eq!(sent.query_value("limit"), Some("10"));
    assert_eq!(trades[0].side, Some(Side::Buy));
    assert_eq!(trades[0].is_maker, Some(false));
    assert_eq!(trades[0].symbol, "BNB/BTC");
}

#[tokio::test]
async fn rebate_overview_sums_records() {
    let transport = ScriptedTransport::ok(vec![json!([
        {"customerId": "1", "income": "0.5", "asset": "USDT", "symbol": "BTCUSDT", "time": 1},
        {"customerId": "2", "income": "1.25", "asset": "USDT", "symbol": "ETHUSDT", "time": 2}
    ])]);
    let a = adapter("binance", transport);

    let overview = a
        .rebate_overview(&RebateQuery::default())
        .await
        .into_result()
        .unwrap();
    assert_eq!(overview.total, d("1.75"));
    assert_eq!(overview.records, 2);
    assert_eq!(overview.asset, "USDT");
}

#[tokio::test]
async fn usage_reflects_endpoint_weight() {
    let transport = ScriptedTransport::ok(vec![json!({"symbols": []})]);
    let a = adapter("binance_us", transport);

    let env = a.all_exchange_info().await;
    assert_eq!(env.data().map(Vec::len), Some(0));
    let usage = env.usage();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].kind, "weight");
    assert!((usage[0].value - 20.0 / 1200.0).abs() < 1e-12);
}
