use anyhow::Result;
use async_trait::async_trait;
use canonical::{
    normalize_symbol, AccountIdentity, AffiliateStatus, Balance, Candle, CandleInterval,
    CandleQuery, FeeRate, Leverage, LeverageBracket, MarginType, MarketKind, NewOrder, Order,
    OrderStatus, OrderType, Position, PositionSide, PriceTick, Side, SymbolInfo, TimeInForce,
    Trade, TradeQuery,
};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::{Envelope, GatewayError, TransportError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    array, boolean, candle_row, decimal, decimal_or_zero, field, millis, opt_decimal,
    opt_millis, opt_text, side, text, uint,
};
use super::{accept_code, require_futures, venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost, Scope};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for a single Bybit v5 product category.
pub struct BybitConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// v5 `category` parameter.
    pub category: &'static str,
    pub market: MarketKind,
}

pub const BYBIT_EXCHANGES: &[BybitConfig] = &[
    BybitConfig {
        id: "bybit",
        name: "Bybit Spot",
        base_url: "https://api.bybit.com",
        category: "spot",
        market: MarketKind::Spot,
    },
    BybitConfig {
        id: "bybit_linear",
        name: "Bybit USDT Perpetual",
        base_url: "https://api.bybit.com",
        category: "linear",
        market: MarketKind::LinearFutures,
    },
    BybitConfig {
        id: "bybit_inverse",
        name: "Bybit Inverse",
        base_url: "https://api.bybit.com",
        category: "inverse",
        market: MarketKind::InverseFutures,
    },
];

pub const WEIGHT: &str = "weight";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![LimitRule::new(WEIGHT, 600, Duration::from_secs(5))]
}

const fn w(weight: u64) -> Cost {
    Cost::new(WEIGHT, weight)
}

/// Leverage not modified.
const LEVERAGE_UNCHANGED: &str = "110043";
/// Position mode not modified.
const POSITION_MODE_UNCHANGED: &str = "110025";
/// Margin mode not modified.
const MARGIN_MODE_UNCHANGED: &str = "110026";

const MAX_PAGES: usize = 50;

/// Unwrap the `{retCode, retMsg, result}` wrapper.
pub fn unwrap(mut body: Value) -> Result<Value, TransportError> {
    let Some(code) = body.get("retCode").and_then(Value::as_i64) else {
        return Ok(body);
    };
    if code == 0 {
        return Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null));
    }
    let msg = body
        .get("retMsg")
        .and_then(Value::as_str)
        .unwrap_or("bybit error")
        .to_string();
    Err(TransportError::new(msg)
        .with_code(code.to_string())
        .with_body(body.to_string()))
}

pub struct BybitAdapter {
    cfg: &'static BybitConfig,
    connector: Connector,
}

impl BybitAdapter {
    pub fn new(cfg: &'static BybitConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(base, credentials, AuthHeaders::key("X-BAPI-API-KEY"))?;
        let limiter = shared_limiter("bybit", limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static BybitConfig,
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

    fn get(&self, path: &str) -> TransportRequest {
        TransportRequest::get(path).query("category", self.cfg.category)
    }

    /// Linear listings without a symbol must name the settle coin.
    fn scoped_list(&self, path: &str, symbol: Option<&str>) -> TransportRequest {
        let req = self.get(path).private();
        match (symbol, self.cfg.market) {
            (Some(s), _) => req.query("symbol", self.symbol(s)),
            (None, MarketKind::LinearFutures) => req.query("settleCoin", "USDT"),
            (None, _) => req,
        }
    }

    /// Look an order up among open orders, then in history.
    async fn lookup_order(
        &self,
        scope: &Scope<'_>,
        symbol: &str,
        order_id: &str,
    ) -> Result<Order, GatewayError> {
        for path in ["/v5/order/realtime", "/v5/order/history"] {
            let req = self
                .get(path)
                .private()
                .query("symbol", self.symbol(symbol))
                .query("orderId", order_id);
            let page = scope.fetch(w(1), req).await?;
            if let Some(row) = array(&page, "list")?.first() {
                return map_order(self.cfg.id, row);
            }
        }
        Err(GatewayError::domain(format!("order {order_id} not found")))
    }
}

/// Follow `nextPageCursor` until the listing is exhausted.
async fn collect_pages<T>(
    scope: &Scope<'_>,
    build: impl Fn(Option<&str>) -> TransportRequest,
    map: impl Fn(&Value) -> Result<T, GatewayError>,
) -> Result<Vec<T>, GatewayError> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_PAGES {
        let page = scope.fetch(w(1), build(cursor.as_deref())).await?;
        for row in array(&page, "list")? {
            out.push(map(row)?);
        }
        cursor = opt_text(&page, "nextPageCursor");
        if cursor.is_none() {
            break;
        }
    }
    Ok(out)
}

fn interval(i: CandleInterval) -> String {
    match i {
        CandleInterval::D1 => "D".to_string(),
        CandleInterval::W1 => "W".to_string(),
        other => other.minutes().to_string(),
    }
}

fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "New" | "Created" | "Untriggered" | "Triggered" => OrderStatus::New,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Unknown,
    }
}

fn non_zero(d: Option<Decimal>) -> Option<Decimal> {
    d.filter(|d| !d.is_zero())
}

pub fn map_order(exchange: &str, v: &Value) -> Result<Order, GatewayError> {
    let triggered = non_zero(opt_decimal(v, "triggerPrice")).is_some();
    let order_type = match (text(v, "orderType")?.as_str(), triggered) {
        ("Market", false) => OrderType::Market,
        ("Market", true) => OrderType::StopMarket,
        (_, true) => OrderType::StopLimit,
        _ => OrderType::Limit,
    };
    Ok(Order {
        id: text(v, "orderId")?,
        client_order_id: opt_text(v, "orderLinkId"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side: side(v, "side")?,
        order_type,
        status: order_status(&text(v, "orderStatus")?),
        price: non_zero(opt_decimal(v, "price")),
        quantity: decimal(v, "qty")?,
        filled: decimal_or_zero(v, "cumExecQty"),
        average_price: non_zero(opt_decimal(v, "avgPrice")),
        created_at: opt_millis(v, "createdTime"),
        updated_at: opt_millis(v, "updatedTime"),
    })
}

fn map_instrument(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    let price = field(v, "priceFilter")?;
    let lot = field(v, "lotSizeFilter")?;
    // spot states precision, derivatives a step
    let step = opt_decimal(lot, "qtyStep")
        .or_else(|| opt_decimal(lot, "basePrecision"))
        .ok_or_else(|| GatewayError::malformed("missing lotSizeFilter step"))?;
    let mut info = SymbolInfo::from_steps(
        normalize_symbol(exchange, &text(v, "symbol")?),
        text(v, "baseCoin")?,
        text(v, "quoteCoin")?,
        opt_text(v, "status").as_deref() == Some("Trading"),
        decimal(price, "tickSize")?,
        step,
        opt_decimal(lot, "minOrderQty"),
        opt_decimal(lot, "minOrderAmt").or_else(|| opt_decimal(lot, "minNotionalValue")),
    );
    info.max_leverage = v
        .get("leverageFilter")
        .and_then(|f| uint(f, "maxLeverage").ok());
    Ok(info)
}

fn map_ticker(exchange: &str, v: &Value) -> Result<PriceTick, GatewayError> {
    Ok(PriceTick {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        price: decimal(v, "lastPrice")?,
        timestamp: None,
    })
}

fn map_fee(exchange: &str, v: &Value) -> Result<FeeRate, GatewayError> {
    Ok(FeeRate {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        maker: decimal(v, "makerFeeRate")?,
        taker: decimal(v, "takerFeeRate")?,
    })
}

fn map_execution(exchange: &str, v: &Value) -> Result<Trade, GatewayError> {
    Ok(Trade {
        id: text(v, "execId")?,
        order_id: opt_text(v, "orderId"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side: Some(side(v, "side")?),
        price: decimal(v, "execPrice")?,
        quantity: decimal(v, "execQty")?,
        fee: opt_decimal(v, "execFee"),
        fee_asset: opt_text(v, "feeCurrency"),
        is_maker: boolean(v, "isMaker"),
        timestamp: millis(v, "execTime")?,
    })
}

fn map_position(exchange: &str, v: &Value) -> Result<Position, GatewayError> {
    let size = decimal(v, "size")?;
    let (side, quantity) = match (opt_text(v, "side").as_deref(), v.get("positionIdx").and_then(Value::as_u64)) {
        (Some("Sell"), Some(2)) => (PositionSide::Short, -size),
        (Some("Sell"), _) => (PositionSide::Both, -size),
        (_, Some(1)) => (PositionSide::Long, size),
        _ => (PositionSide::Both, size),
    };
    Ok(Position {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side,
        quantity,
        entry_price: decimal_or_zero(v, "avgPrice"),
        mark_price: opt_decimal(v, "markPrice"),
        unrealized_pnl: opt_decimal(v, "unrealisedPnl"),
        leverage: uint(v, "leverage").ok(),
        margin_type: v.get("tradeMode").and_then(Value::as_u64).map(|m| {
            if m == 1 {
                MarginType::Isolated
            } else {
                MarginType::Cross
            }
        }),
        liquidation_price: non_zero(opt_decimal(v, "liqPrice")),
    })
}

/// Risk tiers only carry caps; each floor is the previous tier's cap.
fn map_risk_limits(exchange: &str, rows: &[Value]) -> Result<Vec<LeverageBracket>, GatewayError> {
    let mut floor = Decimal::ZERO;
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cap = decimal(row, "riskLimitValue")?;
        out.push(LeverageBracket {
            symbol: normalize_symbol(exchange, &text(row, "symbol")?),
            bracket: uint(row, "id").unwrap_or(i as u32 + 1),
            initial_leverage: uint(row, "maxLeverage")?,
            notional_floor: floor,
            notional_cap: cap,
            maintenance_margin_ratio: decimal(row, "maintenanceMargin")?,
        });
        floor = cap;
    }
    Ok(out)
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(self.cfg.market)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let wanted = asset.map(str::to_uppercase);
        let req = TransportRequest::get("/v5/account/wallet-balance")
            .private()
            .query("accountType", "UNIFIED")
            .query_opt("coin", wanted.as_deref());
        self.connector
            .call("get_balance", w(1), req, |result| {
                let account = array(&result, "list")?
                    .first()
                    .ok_or_else(|| GatewayError::domain("no unified wallet"))?;
                let mut out = Vec::new();
                for c in array(account, "coin")? {
                    let total = decimal(c, "walletBalance")?;
                    let locked = decimal_or_zero(c, "locked");
                    let balance = Balance {
                        asset: text(c, "coin")?,
                        free: total - locked,
                        locked,
                        total,
                    };
                    if wanted.is_some() || !balance.total.is_zero() {
                        out.push(balance);
                    }
                }
                Ok(out)
            })
            .await
    }

    async fn open_order(&self, order: &NewOrder) -> Envelope<Order> {
        let link_id = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let mut body = json!({
            "category": self.cfg.category,
            "symbol": self.symbol(&order.symbol),
            "side": match order.side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "orderType": match order.order_type {
                OrderType::Market | OrderType::StopMarket => "Market",
                OrderType::Limit | OrderType::StopLimit => "Limit",
            },
            "qty": order.quantity.normalize().to_string(),
            "orderLinkId": link_id,
        });
        if let Some(price) = order.price {
            body["price"] = json!(price.normalize().to_string());
        }
        if let Some(trigger) = order.stop_price {
            body["triggerPrice"] = json!(trigger.normalize().to_string());
        }
        if matches!(order.order_type, OrderType::Limit | OrderType::StopLimit) {
            body["timeInForce"] = json!(match order.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            });
        }
        if order.reduce_only && self.cfg.market.is_futures() {
            body["reduceOnly"] = json!(true);
        }
        let req = TransportRequest::post("/v5/order/create").private().body(body);
        let mut echoed = order.clone();
        echoed.client_order_id = Some(link_id);
        self.connector
            .call("open_order", w(1), req, move |result| {
                Ok(Order::accepted(text(&result, "orderId")?, &echoed, gateway_core::now_ms()))
            })
            .await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("get_order");
        let result = self.lookup_order(&scope, symbol, order_id).await;
        scope.finish(result)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let req = TransportRequest::post("/v5/order/cancel").private().body(json!({
            "category": self.cfg.category,
            "symbol": self.symbol(symbol),
            "orderId": order_id,
        }));
        let result = match scope.fetch(w(1), req).await {
            Ok(_) => self.lookup_order(&scope, symbol, order_id).await,
            Err(e) => Err(e),
        };
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let req = self.get("/v5/market/tickers").query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("latest_price", w(1), req, |result| {
                let list = array(&result, "list")?;
                let row = list
                    .first()
                    .ok_or_else(|| GatewayError::domain("symbol not found"))?;
                map_ticker(exchange, row)
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let req = self
            .get("/v5/market/instruments-info")
            .query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("exchange_info", w(1), req, |result| {
                let row = array(&result, "list")?
                    .first()
                    .ok_or_else(|| GatewayError::domain(format!("unknown symbol {symbol}")))?;
                map_instrument(exchange, row)
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        let scope = self.connector.scope("all_exchange_info");
        let exchange = self.cfg.id;
        let result = collect_pages(
            &scope,
            |cursor| {
                self.get("/v5/market/instruments-info")
                    .query("limit", 1000)
                    .query_opt("cursor", cursor)
            },
            |row| map_instrument(exchange, row),
        )
        .await;
        scope.finish(result)
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let scope = self.connector.scope("open_orders");
        let exchange = self.cfg.id;
        let result = collect_pages(
            &scope,
            |cursor| {
                self.scoped_list("/v5/order/realtime", symbol)
                    .query("limit", 50)
                    .query_opt("cursor", cursor)
            },
            |row| map_order(exchange, row),
        )
        .await;
        scope.finish(result)
    }

    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let req = self
            .get("/v5/account/fee-rate")
            .private()
            .query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("user_fee", w(1), req, |result| {
                let row = array(&result, "list")?
                    .first()
                    .ok_or_else(|| GatewayError::domain("symbol not found"))?;
                map_fee(exchange, row)
            })
            .await
    }

    async fn all_user_fees(&self) -> Envelope<Vec<FeeRate>> {
        let req = self.get("/v5/account/fee-rate").private();
        let exchange = self.cfg.id;
        self.connector
            .call("all_user_fees", w(1), req, |result| {
                array(&result, "list")?
                    .iter()
                    .map(|f| map_fee(exchange, f))
                    .collect()
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let req = self
            .get("/v5/market/kline")
            .query("symbol", self.symbol(&query.symbol))
            .query("interval", interval(query.interval))
            .query_opt("start", query.start_time)
            .query_opt("end", query.end_time)
            .query_opt("limit", query.limit);
        self.connector
            .call("candles", w(1), req, |result| {
                // newest first on the wire
                let mut rows = array(&result, "list")?
                    .iter()
                    .map(candle_row)
                    .collect::<Result<Vec<_>, _>>()?;
                rows.reverse();
                Ok(rows)
            })
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = self
            .get("/v5/execution/list")
            .private()
            .query("symbol", self.symbol(&query.symbol))
            .query_opt("startTime", query.start_time)
            .query_opt("endTime", query.end_time)
            .query_opt("limit", query.limit)
            .query_opt("cursor", query.from_id.as_deref());
        let exchange = self.cfg.id;
        self.connector
            .call("trades", w(1), req, |result| {
                array(&result, "list")?
                    .iter()
                    .map(|t| map_execution(exchange, t))
                    .collect()
            })
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        let req = self.get("/v5/market/tickers");
        let exchange = self.cfg.id;
        self.connector
            .call("all_prices", w(1), req, |result| {
                array(&result, "list")?
                    .iter()
                    .map(|t| map_ticker(exchange, t))
                    .collect()
            })
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_leverage", e);
        }
        let req = self.scoped_list("/v5/position/list", Some(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("get_leverage", w(1), req, |result| {
                let pos = array(&result, "list")?
                    .first()
                    .ok_or_else(|| GatewayError::domain("no position information"))?;
                Ok(Leverage {
                    symbol: normalize_symbol(exchange, &text(pos, "symbol")?),
                    leverage: uint(pos, "leverage")?,
                })
            })
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_leverage", e);
        }
        let venue = self.symbol(symbol);
        let req = TransportRequest::post("/v5/position/set-leverage")
            .private()
            .body(json!({
                "category": self.cfg.category,
                "symbol": venue,
                "buyLeverage": leverage.to_string(),
                "sellLeverage": leverage.to_string(),
            }));
        let value = Leverage {
            symbol: normalize_symbol(self.cfg.id, &venue),
            leverage,
        };
        let scope = self.connector.scope("set_leverage");
        let result = scope.fetch(w(1), req).await.map(|_| value.clone());
        scope.finish(accept_code(result, LEVERAGE_UNCHANGED, value))
    }

    /// Unified accounts switch margin mode account-wide.
    async fn set_margin_type(&self, _symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_margin_type", e);
        }
        let mode = match margin {
            MarginType::Isolated => "ISOLATED_MARGIN",
            MarginType::Cross => "REGULAR_MARGIN",
        };
        let req = TransportRequest::post("/v5/account/set-margin-mode")
            .private()
            .body(json!({ "setMarginMode": mode }));
        let scope = self.connector.scope("set_margin_type");
        let result = scope.fetch(w(1), req).await.map(|_| margin);
        scope.finish(accept_code(result, MARGIN_MODE_UNCHANGED, margin))
    }

    /// Hedge mode is visible only through position slots: indexes 1 and 2
    /// exist in hedge mode, 0 in one-way mode.
    async fn get_hedge_mode(&self) -> Envelope<bool> {
        match require_futures(self.market()) {
            Err(e) => return self.connector.reject("get_hedge_mode", e),
            Ok(MarketKind::InverseFutures) => return self.connector.fixed("get_hedge_mode", false),
            Ok(_) => {}
        }
        let req = self.scoped_list("/v5/position/list", None).query("limit", 1);
        self.connector
            .call("get_hedge_mode", w(1), req, |result| {
                Ok(array(&result, "list")?
                    .iter()
                    .any(|p| p.get("positionIdx").and_then(Value::as_u64).unwrap_or(0) != 0))
            })
            .await
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_hedge_mode", e);
        }
        let req = TransportRequest::post("/v5/position/switch-mode")
            .private()
            .body(json!({
                "category": self.cfg.category,
                "coin": "USDT",
                "mode": if enabled { 3 } else { 0 },
            }));
        let scope = self.connector.scope("set_hedge_mode");
        let result = scope.fetch(w(1), req).await.map(|_| enabled);
        scope.finish(accept_code(result, POSITION_MODE_UNCHANGED, enabled))
    }

    async fn leverage_brackets(&self, symbol: Option<&str>) -> Envelope<Vec<LeverageBracket>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("leverage_brackets", e);
        }
        let req = self
            .get("/v5/market/risk-limit")
            .query_opt("symbol", symbol.map(|s| self.symbol(s)));
        let exchange = self.cfg.id;
        self.connector
            .call("leverage_brackets", w(1), req, |result| {
                map_risk_limits(exchange, array(&result, "list")?)
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("positions", e);
        }
        let scope = self.connector.scope("positions");
        let exchange = self.cfg.id;
        let result = collect_pages(
            &scope,
            |cursor| {
                self.scoped_list("/v5/position/list", symbol)
                    .query("limit", 200)
                    .query_opt("cursor", cursor)
            },
            |row| map_position(exchange, row),
        )
        .await
        .map(|all| all.into_iter().filter(|p| !p.quantity.is_zero()).collect());
        scope.finish(result)
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        let req = TransportRequest::get("/v5/user/query-api").private();
        self.connector
            .call("account_id", w(1), req, |result| {
                Ok(AccountIdentity {
                    uid: text(&result, "userID")?,
                })
            })
            .await
    }

    /// Bybit only answers for users registered under the caller's
    /// affiliate code.
    async fn check_affiliate(&self, uid: &str) -> Envelope<AffiliateStatus> {
        let req = TransportRequest::get("/v5/user/aff-customer-info")
            .private()
            .query("uid", uid);
        let uid = uid.to_string();
        self.connector
            .call("check_affiliate", w(1), req, move |result| {
                let is_affiliate = opt_text(&result, "uid").is_some_and(|u| u == uid);
                Ok(AffiliateStatus { uid, is_affiliate })
            })
            .await
    }
}

static REGISTER: Once = Once::new();

/// Register Bybit adapters for every product category.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in BYBIT_EXCHANGES {
            let cfg_ref: &'static BybitConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(BybitAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
