use anyhow::Result;
use async_trait::async_trait;
use canonical::precision::tick_from_places;
use canonical::{
    normalize_symbol, AccountIdentity, Balance, Candle, CandleInterval, CandleQuery, FeeRate,
    Leverage, LeverageBracket, MarginType, MarketKind, NewOrder, Order, OrderStatus, OrderType,
    Position, PositionSide, PriceTick, Side, SymbolInfo, TimeInForce, Trade, TradeQuery,
};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::{Envelope, GatewayError, TransportError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    candle_row, decimal, decimal_or_zero, first, list, millis, opt_decimal,
    opt_millis, opt_text, side, text, uint,
};
use super::{require_futures, venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for the Bitget exchange.
pub struct BitgetConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// Mix `productType`; `None` for spot.
    pub product_type: Option<&'static str>,
    pub market: MarketKind,
}

/// Supported Bitget exchange endpoints.
pub const BITGET_EXCHANGES: &[BitgetConfig] = &[
    BitgetConfig {
        id: "bitget",
        name: "Bitget Spot",
        base_url: "https://api.bitget.com",
        product_type: None,
        market: MarketKind::Spot,
    },
    BitgetConfig {
        id: "bitget_futures",
        name: "Bitget USDT Futures",
        base_url: "https://api.bitget.com",
        product_type: Some("USDT-FUTURES"),
        market: MarketKind::LinearFutures,
    },
];

pub const WEIGHT: &str = "weight";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![LimitRule::new(WEIGHT, 20, Duration::from_secs(1))]
}

const fn w(weight: u64) -> Cost {
    Cost::new(WEIGHT, weight)
}

const MARGIN_COIN: &str = "USDT";

/// Unwrap the `{code, msg, data}` wrapper; success is `00000`.
pub fn unwrap(mut body: Value) -> Result<Value, TransportError> {
    let Some(code) = body.get("code").and_then(Value::as_str).map(str::to_string) else {
        return Ok(body);
    };
    if code == "00000" {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let msg = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("bitget error")
        .to_string();
    Err(TransportError::new(msg)
        .with_code(code)
        .with_body(body.to_string()))
}

pub struct BitgetAdapter {
    cfg: &'static BitgetConfig,
    connector: Connector,
}

impl BitgetAdapter {
    pub fn new(cfg: &'static BitgetConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(
            base,
            credentials,
            AuthHeaders::with_passphrase("ACCESS-KEY", "ACCESS-PASSPHRASE"),
        )?;
        let limiter = shared_limiter(cfg.id, limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static BitgetConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter).with_unwrap(unwrap),
        }
    }

    fn symbol(&self, symbol: &str) -> String {
        venue_symbol(self.cfg.id, symbol, "")
    }

    /// Mix requests always name the product type.
    fn mix(&self, req: TransportRequest) -> TransportRequest {
        match self.cfg.product_type {
            Some(product) => req.query("productType", product),
            None => req,
        }
    }

    fn product(&self) -> &'static str {
        self.cfg.product_type.unwrap_or("")
    }

    fn is_spot(&self) -> bool {
        self.cfg.product_type.is_none()
    }

    fn order_detail(&self, symbol: &str, order_id: &str) -> TransportRequest {
        if self.is_spot() {
            TransportRequest::get("/api/v2/spot/trade/orderInfo")
                .private()
                .query("orderId", order_id)
        } else {
            self.mix(TransportRequest::get("/api/v2/mix/order/detail"))
                .private()
                .query("symbol", self.symbol(symbol))
                .query("orderId", order_id)
        }
    }

    fn map_detail(&self, data: &Value) -> Result<Order, GatewayError> {
        // spot answers with a one-element list, mix with the object
        let row = match data {
            Value::Array(_) => first(data, "order not found")?,
            other => other,
        };
        map_order(self.cfg.id, row)
    }
}

fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "init" | "new" | "live" => OrderStatus::New,
        "partially_filled" | "partial_fill" => OrderStatus::PartiallyFilled,
        "filled" | "full_fill" => OrderStatus::Filled,
        "cancelled" | "canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

fn spot_granularity(i: CandleInterval) -> Option<&'static str> {
    Some(match i {
        CandleInterval::M1 => "1min",
        CandleInterval::M3 => "3min",
        CandleInterval::M5 => "5min",
        CandleInterval::M15 => "15min",
        CandleInterval::M30 => "30min",
        CandleInterval::H1 => "1h",
        CandleInterval::H4 => "4h",
        CandleInterval::H6 => "6h",
        CandleInterval::H12 => "12h",
        CandleInterval::D1 => "1day",
        CandleInterval::W1 => "1week",
        CandleInterval::H2 => return None,
    })
}

fn mix_granularity(i: CandleInterval) -> &'static str {
    match i {
        CandleInterval::M1 => "1m",
        CandleInterval::M3 => "3m",
        CandleInterval::M5 => "5m",
        CandleInterval::M15 => "15m",
        CandleInterval::M30 => "30m",
        CandleInterval::H1 => "1H",
        CandleInterval::H2 => "2H",
        CandleInterval::H4 => "4H",
        CandleInterval::H6 => "6H",
        CandleInterval::H12 => "12H",
        CandleInterval::D1 => "1D",
        CandleInterval::W1 => "1W",
    }
}

fn non_zero(d: Option<Decimal>) -> Option<Decimal> {
    d.filter(|d| !d.is_zero())
}

pub fn map_order(exchange: &str, v: &Value) -> Result<Order, GatewayError> {
    let status = opt_text(v, "status").or_else(|| opt_text(v, "state")).unwrap_or_default();
    let order_type = match text(v, "orderType")?.as_str() {
        "market" => OrderType::Market,
        _ => OrderType::Limit,
    };
    Ok(Order {
        id: text(v, "orderId")?,
        client_order_id: opt_text(v, "clientOid"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side: side(v, "side")?,
        order_type,
        status: order_status(&status),
        price: non_zero(opt_decimal(v, "price")),
        quantity: decimal(v, "size")?,
        filled: decimal_or_zero(v, "baseVolume"),
        average_price: non_zero(opt_decimal(v, "priceAvg")),
        created_at: opt_millis(v, "cTime"),
        updated_at: opt_millis(v, "uTime"),
    })
}

fn map_spot_symbol(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    Ok(SymbolInfo::from_steps(
        normalize_symbol(exchange, &text(v, "symbol")?),
        text(v, "baseCoin")?,
        text(v, "quoteCoin")?,
        opt_text(v, "status").as_deref() == Some("online"),
        tick_from_places(uint(v, "pricePrecision")?),
        tick_from_places(uint(v, "quantityPrecision")?),
        opt_decimal(v, "minTradeAmount").and_then(|m| non_zero(Some(m))),
        opt_decimal(v, "minTradeUSDT"),
    ))
}

/// Contract ticks are `priceEndStep` units at `pricePlace` decimals.
fn map_contract(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    let end_step = opt_decimal(v, "priceEndStep").unwrap_or(Decimal::ONE);
    let mut info = SymbolInfo::from_steps(
        normalize_symbol(exchange, &text(v, "symbol")?),
        text(v, "baseCoin")?,
        text(v, "quoteCoin")?,
        opt_text(v, "symbolStatus").as_deref() == Some("normal"),
        tick_from_places(uint(v, "pricePlace")?) * end_step,
        decimal(v, "sizeMultiplier")?,
        opt_decimal(v, "minTradeNum"),
        opt_decimal(v, "minTradeUSDT"),
    );
    info.max_leverage = uint(v, "maxLever").ok();
    Ok(info)
}

fn map_ticker(exchange: &str, v: &Value) -> Result<PriceTick, GatewayError> {
    Ok(PriceTick {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        price: decimal(v, "lastPr")?,
        timestamp: opt_millis(v, "ts"),
    })
}

fn map_fill(exchange: &str, v: &Value) -> Result<Trade, GatewayError> {
    // spot carries one fee object, mix a list of them
    let fee = match v.get("feeDetail") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    Ok(Trade {
        id: text(v, "tradeId")?,
        order_id: opt_text(v, "orderId"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side: Some(side(v, "side")?),
        price: decimal(v, "priceAvg").or_else(|_| decimal(v, "price"))?,
        quantity: decimal(v, "size").or_else(|_| decimal(v, "baseVolume"))?,
        fee: fee.and_then(|f| opt_decimal(f, "totalFee")).map(|f| f.abs()),
        fee_asset: fee.and_then(|f| opt_text(f, "feeCoin")),
        is_maker: opt_text(v, "tradeScope").map(|s| s == "maker"),
        timestamp: millis(v, "cTime")?,
    })
}

fn map_position(exchange: &str, v: &Value) -> Result<Position, GatewayError> {
    let total = decimal(v, "total")?;
    let hedged = opt_text(v, "posMode").as_deref() == Some("hedge_mode");
    let (side, quantity) = match (opt_text(v, "holdSide").as_deref(), hedged) {
        (Some("short"), true) => (PositionSide::Short, -total),
        (Some("short"), false) => (PositionSide::Both, -total),
        (_, true) => (PositionSide::Long, total),
        _ => (PositionSide::Both, total),
    };
    Ok(Position {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side,
        quantity,
        entry_price: decimal_or_zero(v, "openPriceAvg"),
        mark_price: opt_decimal(v, "markPrice"),
        unrealized_pnl: opt_decimal(v, "unrealizedPL"),
        leverage: uint(v, "leverage").ok(),
        margin_type: opt_text(v, "marginMode").and_then(|m| m.parse().ok()),
        liquidation_price: non_zero(opt_decimal(v, "liquidationPrice")),
    })
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(self.cfg.market)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let wanted = asset.map(str::to_uppercase);
        if self.is_spot() {
            let req = TransportRequest::get("/api/v2/spot/account/assets")
                .private()
                .query_opt("coin", wanted.as_deref());
            return self
                .connector
                .call("get_balance", w(1), req, |data| {
                    let all = list(&data, |b| {
                        let free = decimal(b, "available")?;
                        let locked = decimal_or_zero(b, "frozen") + decimal_or_zero(b, "locked");
                        Ok(Balance {
                            asset: text(b, "coin")?.to_uppercase(),
                            free,
                            locked,
                            total: free + locked,
                        })
                    })?;
                    Ok(all
                        .into_iter()
                        .filter(|b| wanted.is_some() || !b.total.is_zero())
                        .collect())
                })
                .await;
        }
        let req = self.mix(TransportRequest::get("/api/v2/mix/account/accounts")).private();
        self.connector
            .call("get_balance", w(1), req, |data| {
                let all = list(&data, |b| {
                    let total = decimal(b, "accountEquity")?;
                    let free = decimal(b, "available")?;
                    Ok(Balance {
                        asset: text(b, "marginCoin")?.to_uppercase(),
                        free,
                        locked: decimal_or_zero(b, "locked"),
                        total,
                    })
                })?;
                Ok(all
                    .into_iter()
                    .filter(|b| match &wanted {
                        Some(a) => &b.asset == a,
                        None => !b.total.is_zero(),
                    })
                    .collect())
            })
            .await
    }

    async fn open_order(&self, order: &NewOrder) -> Envelope<Order> {
        if matches!(order.order_type, OrderType::StopLimit | OrderType::StopMarket) {
            return self
                .connector
                .reject("open_order", GatewayError::domain("stop orders need the plan endpoint"));
        }
        let client_oid = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let mut body = json!({
            "symbol": self.symbol(&order.symbol),
            "side": match order.side { Side::Buy => "buy", Side::Sell => "sell" },
            "orderType": if order.order_type == OrderType::Market { "market" } else { "limit" },
            "force": match order.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "gtc",
                TimeInForce::Ioc => "ioc",
                TimeInForce::Fok => "fok",
            },
            "size": order.quantity.normalize().to_string(),
            "clientOid": client_oid,
        });
        if let Some(price) = order.price {
            body["price"] = json!(price.normalize().to_string());
        }
        let path = if self.is_spot() {
            "/api/v2/spot/trade/place-order"
        } else {
            body["productType"] = json!(self.product());
            body["marginMode"] = json!("crossed");
            body["marginCoin"] = json!(MARGIN_COIN);
            body["reduceOnly"] = json!(if order.reduce_only { "YES" } else { "NO" });
            "/api/v2/mix/order/place-order"
        };
        let req = TransportRequest::post(path).private().body(body);
        let mut echoed = order.clone();
        echoed.client_order_id = Some(client_oid);
        self.connector
            .call("open_order", w(1), req, move |data| {
                Ok(Order::accepted(text(&data, "orderId")?, &echoed, gateway_core::now_ms()))
            })
            .await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let req = self.order_detail(symbol, order_id);
        self.connector
            .call("get_order", w(1), req, |data| self.map_detail(&data))
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let mut body = json!({ "symbol": self.symbol(symbol), "orderId": order_id });
        let path = if self.is_spot() {
            "/api/v2/spot/trade/cancel-order"
        } else {
            body["productType"] = json!(self.product());
            "/api/v2/mix/order/cancel-order"
        };
        let cancel = TransportRequest::post(path).private().body(body);
        let result = match scope.fetch(w(1), cancel).await {
            Ok(_) => scope
                .fetch(w(1), self.order_detail(symbol, order_id))
                .await
                .and_then(|data| self.map_detail(&data)),
            Err(e) => Err(e),
        };
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let path = if self.is_spot() {
            "/api/v2/spot/market/tickers"
        } else {
            "/api/v2/mix/market/ticker"
        };
        let req = self
            .mix(TransportRequest::get(path))
            .query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("latest_price", w(1), req, |data| {
                map_ticker(exchange, first(&data, "symbol not found")?)
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let exchange = self.cfg.id;
        let spot = self.is_spot();
        let path = if spot {
            "/api/v2/spot/public/symbols"
        } else {
            "/api/v2/mix/market/contracts"
        };
        let req = self
            .mix(TransportRequest::get(path))
            .query("symbol", self.symbol(symbol));
        self.connector
            .call("exchange_info", w(1), req, move |data| {
                let row = first(&data, "unknown symbol")?;
                if spot {
                    map_spot_symbol(exchange, row)
                } else {
                    map_contract(exchange, row)
                }
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        let exchange = self.cfg.id;
        if self.is_spot() {
            let req = TransportRequest::get("/api/v2/spot/public/symbols");
            return self
                .connector
                .call("all_exchange_info", w(1), req, |data| {
                    list(&data, |s| map_spot_symbol(exchange, s))
                })
                .await;
        }
        let req = self.mix(TransportRequest::get("/api/v2/mix/market/contracts"));
        self.connector
            .call("all_exchange_info", w(1), req, |data| {
                list(&data, |c| map_contract(exchange, c))
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let exchange = self.cfg.id;
        let path = if self.is_spot() {
            "/api/v2/spot/trade/unfilled-orders"
        } else {
            "/api/v2/mix/order/orders-pending"
        };
        let req = self
            .mix(TransportRequest::get(path))
            .private()
            .query_opt("symbol", symbol.map(|s| self.symbol(s)));
        self.connector
            .call("open_orders", w(1), req, |data| match data.get("entrustedList") {
                Some(Value::Array(rows)) => rows.iter().map(|o| map_order(exchange, o)).collect(),
                // an empty mix listing comes back as null
                Some(_) => Ok(Vec::new()),
                None => list(&data, |o| map_order(exchange, o)),
            })
            .await
    }

    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let venue = self.symbol(symbol);
        let req = TransportRequest::get("/api/v2/common/trade-rate")
            .private()
            .query("symbol", &venue)
            .query("businessType", if self.is_spot() { "spot" } else { "mix" });
        let canonical = normalize_symbol(self.cfg.id, &venue);
        self.connector
            .call("user_fee", w(1), req, move |data| {
                Ok(FeeRate {
                    symbol: canonical,
                    maker: decimal(&data, "makerFeeRate")?,
                    taker: decimal(&data, "takerFeeRate")?,
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let (path, granularity) = if self.is_spot() {
            match spot_granularity(query.interval) {
                Some(g) => ("/api/v2/spot/market/candles", g),
                None => {
                    return self.connector.reject(
                        "candles",
                        GatewayError::domain(format!("interval {} not offered on spot", query.interval.as_str())),
                    )
                }
            }
        } else {
            ("/api/v2/mix/market/candles", mix_granularity(query.interval))
        };
        let req = self
            .mix(TransportRequest::get(path))
            .query("symbol", self.symbol(&query.symbol))
            .query("granularity", granularity)
            .query_opt("startTime", query.start_time)
            .query_opt("endTime", query.end_time)
            .query_opt("limit", query.limit);
        self.connector
            .call("candles", w(1), req, |data| list(&data, candle_row))
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let exchange = self.cfg.id;
        let path = if self.is_spot() {
            "/api/v2/spot/trade/fills"
        } else {
            "/api/v2/mix/order/fills"
        };
        let req = self
            .mix(TransportRequest::get(path))
            .private()
            .query("symbol", self.symbol(&query.symbol))
            .query_opt("startTime", query.start_time)
            .query_opt("endTime", query.end_time)
            .query_opt("limit", query.limit)
            .query_opt("idLessThan", query.from_id.as_deref());
        self.connector
            .call("trades", w(1), req, |data| match data.get("fillList") {
                Some(Value::Array(rows)) => rows.iter().map(|t| map_fill(exchange, t)).collect(),
                Some(_) => Ok(Vec::new()),
                None => list(&data, |t| map_fill(exchange, t)),
            })
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        let path = if self.is_spot() {
            "/api/v2/spot/market/tickers"
        } else {
            "/api/v2/mix/market/tickers"
        };
        let req = self.mix(TransportRequest::get(path));
        let exchange = self.cfg.id;
        self.connector
            .call("all_prices", w(1), req, |data| list(&data, |t| map_ticker(exchange, t)))
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_leverage", e);
        }
        let venue = self.symbol(symbol);
        let req = self
            .mix(TransportRequest::get("/api/v2/mix/account/account"))
            .private()
            .query("symbol", &venue)
            .query("marginCoin", MARGIN_COIN);
        let canonical = normalize_symbol(self.cfg.id, &venue);
        self.connector
            .call("get_leverage", w(1), req, move |data| {
                let key = if opt_text(&data, "marginMode").as_deref() == Some("isolated") {
                    "isolatedLongLever"
                } else {
                    "crossedMarginLeverage"
                };
                Ok(Leverage {
                    symbol: canonical,
                    leverage: uint(&data, key)?,
                })
            })
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_leverage", e);
        }
        let venue = self.symbol(symbol);
        let req = TransportRequest::post("/api/v2/mix/account/set-leverage")
            .private()
            .body(json!({
                "symbol": venue,
                "productType": self.product(),
                "marginCoin": MARGIN_COIN,
                "leverage": leverage.to_string(),
            }));
        let canonical = normalize_symbol(self.cfg.id, &venue);
        self.connector
            .call("set_leverage", w(1), req, move |data| {
                Ok(Leverage {
                    symbol: canonical,
                    leverage: uint(&data, "crossMarginLeverage")
                        .or_else(|_| uint(&data, "longLeverage"))
                        .unwrap_or(leverage),
                })
            })
            .await
    }

    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_margin_type", e);
        }
        let mode = match margin {
            MarginType::Isolated => "isolated",
            MarginType::Cross => "crossed",
        };
        let req = TransportRequest::post("/api/v2/mix/account/set-margin-mode")
            .private()
            .body(json!({
                "symbol": self.symbol(symbol),
                "productType": self.product(),
                "marginCoin": MARGIN_COIN,
                "marginMode": mode,
            }));
        self.connector
            .call("set_margin_type", w(1), req, move |data| {
                Ok(opt_text(&data, "marginMode")
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(margin))
            })
            .await
    }

    async fn get_hedge_mode(&self) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_hedge_mode", e);
        }
        let req = self.mix(TransportRequest::get("/api/v2/mix/account/accounts")).private();
        self.connector
            .call("get_hedge_mode", w(1), req, |data| {
                let account = data
                    .as_array()
                    .and_then(|rows| {
                        rows.iter()
                            .find(|a| a.get("marginCoin").and_then(Value::as_str) == Some(MARGIN_COIN))
                    })
                    .ok_or_else(|| GatewayError::domain("no USDT futures account"))?;
                Ok(text(account, "posMode")? == "hedge_mode")
            })
            .await
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_hedge_mode", e);
        }
        let req = TransportRequest::post("/api/v2/mix/account/set-position-mode")
            .private()
            .body(json!({
                "productType": self.product(),
                "posMode": if enabled { "hedge_mode" } else { "one_way_mode" },
            }));
        self.connector
            .call("set_hedge_mode", w(1), req, move |data| {
                Ok(opt_text(&data, "posMode").map_or(enabled, |m| m == "hedge_mode"))
            })
            .await
    }

    async fn leverage_brackets(&self, symbol: Option<&str>) -> Envelope<Vec<LeverageBracket>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("leverage_brackets", e);
        }
        let Some(symbol) = symbol else {
            return self
                .connector
                .reject("leverage_brackets", GatewayError::domain("symbol is required"));
        };
        let venue = self.symbol(symbol);
        let req = self
            .mix(TransportRequest::get("/api/v2/mix/market/query-position-lever"))
            .query("symbol", &venue);
        let canonical = normalize_symbol(self.cfg.id, &venue);
        self.connector
            .call("leverage_brackets", w(1), req, move |data| {
                list(&data, |tier| {
                    Ok(LeverageBracket {
                        symbol: canonical.clone(),
                        bracket: uint(tier, "level")?,
                        initial_leverage: uint(tier, "leverage")?,
                        notional_floor: decimal_or_zero(tier, "startUnit"),
                        notional_cap: decimal(tier, "endUnit")?,
                        maintenance_margin_ratio: decimal(tier, "keepMarginRate")?,
                    })
                })
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("positions", e);
        }
        let req = match symbol {
            Some(s) => self
                .mix(TransportRequest::get("/api/v2/mix/position/single-position"))
                .query("symbol", self.symbol(s)),
            None => self.mix(TransportRequest::get("/api/v2/mix/position/all-position")),
        }
        .private()
        .query("marginCoin", MARGIN_COIN);
        let exchange = self.cfg.id;
        self.connector
            .call("positions", w(1), req, |data| {
                let all = list(&data, |p| map_position(exchange, p))?;
                Ok(all.into_iter().filter(|p| !p.quantity.is_zero()).collect())
            })
            .await
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        let req = TransportRequest::get("/api/v2/spot/account/info").private();
        self.connector
            .call("account_id", w(1), req, |data| {
                Ok(AccountIdentity {
                    uid: text(&data, "userId")?,
                })
            })
            .await
    }
}

static REGISTER: Once = Once::new();

/// Register Bitget adapters for spot and USDT futures.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in BITGET_EXCHANGES {
            let cfg_ref: &'static BitgetConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(BitgetAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
