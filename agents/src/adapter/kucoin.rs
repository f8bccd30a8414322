use anyhow::Result;
use async_trait::async_trait;
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
    array, boolean, candle_row, decimal, decimal_or_zero, first, list, millis, opt_decimal, opt_millis,
    opt_text, side, text, uint, value_decimal, value_millis,
};
use super::{require_futures, venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for a single KuCoin endpoint.
pub struct KucoinConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    pub market: MarketKind,
}

/// All KuCoin exchanges supported by this adapter.
pub const KUCOIN_EXCHANGES: &[KucoinConfig] = &[
    KucoinConfig {
        id: "kucoin",
        name: "KuCoin Spot",
        base_url: "https://api.kucoin.com",
        market: MarketKind::Spot,
    },
    KucoinConfig {
        id: "kucoin_futures",
        name: "KuCoin Futures",
        base_url: "https://api-futures.kucoin.com",
        market: MarketKind::LinearFutures,
    },
];

pub const SPOT: &str = "spot";
pub const FUTURES: &str = "futures";
pub const MANAGEMENT: &str = "management";
pub const PUBLIC: &str = "public";

/// KuCoin meters spot, futures, management and public endpoints in separate
/// 30 second pools shared by both hosts.
pub fn limit_rules() -> Vec<LimitRule> {
    let window = Duration::from_secs(30);
    vec![
        LimitRule::new(SPOT, 4000, window),
        LimitRule::new(FUTURES, 2000, window),
        LimitRule::new(MANAGEMENT, 2000, window),
        LimitRule::new(PUBLIC, 2000, window),
    ]
}

const SUCCESS: &str = "200000";

/// Unwrap the `{code, data, msg}` wrapper; any code but 200000 is an error.
pub fn unwrap(mut body: Value) -> Result<Value, TransportError> {
    let code = match body.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Ok(body),
    };
    if code == SUCCESS {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let msg = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("kucoin error")
        .to_string();
    Err(TransportError::new(msg)
        .with_code(code)
        .with_body(body.to_string()))
}

pub struct KucoinAdapter {
    cfg: &'static KucoinConfig,
    connector: Connector,
}

impl KucoinAdapter {
    pub fn new(cfg: &'static KucoinConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(
            base,
            credentials,
            AuthHeaders::with_passphrase("KC-API-KEY", "KC-API-PASSPHRASE"),
        )?;
        let limiter = shared_limiter("kucoin", limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static KucoinConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter).with_unwrap(unwrap),
        }
    }

    fn futures(&self) -> bool {
        self.cfg.market.is_futures()
    }

    fn symbol(&self, symbol: &str) -> String {
        if self.futures() {
            let venue = venue_symbol(self.cfg.id, symbol, "");
            if venue.ends_with('M') {
                return venue;
            }
            // perpetuals are BTC -> XBT, USDT margined suffixed with M
            let venue = venue.strip_prefix("BTC").map(|rest| format!("XBT{rest}")).unwrap_or(venue);
            return format!("{venue}M");
        }
        venue_symbol(self.cfg.id, symbol, "-")
    }

    fn canonical(&self, raw: &str) -> String {
        if self.futures() {
            let trimmed = raw.strip_suffix('M').unwrap_or(raw);
            let trimmed = trimmed.strip_prefix("XBT").map(|r| format!("BTC{r}")).unwrap_or_else(|| trimmed.to_string());
            return normalize_symbol(self.cfg.id, &trimmed);
        }
        normalize_symbol(self.cfg.id, raw)
    }

    fn private_cost(&self, weight: u64) -> Cost {
        Cost::new(if self.futures() { FUTURES } else { SPOT }, weight)
    }
}

fn candle_type(interval: CandleInterval) -> &'static str {
    match interval {
        CandleInterval::M1 => "1min",
        CandleInterval::M3 => "3min",
        CandleInterval::M5 => "5min",
        CandleInterval::M15 => "15min",
        CandleInterval::M30 => "30min",
        CandleInterval::H1 => "1hour",
        CandleInterval::H2 => "2hour",
        CandleInterval::H4 => "4hour",
        CandleInterval::H6 => "6hour",
        CandleInterval::H12 => "12hour",
        CandleInterval::D1 => "1day",
        CandleInterval::W1 => "1week",
    }
}

fn order_type(raw: &str, has_stop: bool) -> OrderType {
    match (raw, has_stop) {
        ("market", false) => OrderType::Market,
        ("market", true) => OrderType::StopMarket,
        (_, true) => OrderType::StopLimit,
        _ => OrderType::Limit,
    }
}

/// KuCoin reports lifecycle flags rather than a status string.
fn order_status(v: &Value, quantity: Decimal, filled: Decimal) -> OrderStatus {
    let active = boolean(v, "isActive").unwrap_or(false);
    let cancelled = boolean(v, "cancelExist").unwrap_or(false);
    match (active, cancelled) {
        (true, _) if filled.is_zero() => OrderStatus::New,
        (true, _) => OrderStatus::PartiallyFilled,
        (false, true) => OrderStatus::Canceled,
        (false, false) if filled >= quantity && !quantity.is_zero() => OrderStatus::Filled,
        _ => OrderStatus::Unknown,
    }
}

impl KucoinAdapter {
    fn map_order(&self, v: &Value) -> Result<Order, GatewayError> {
        let quantity = decimal(v, "size")?;
        let filled = opt_decimal(v, "dealSize")
            .or_else(|| opt_decimal(v, "filledSize"))
            .unwrap_or(Decimal::ZERO);
        let funds = opt_decimal(v, "dealFunds").or_else(|| opt_decimal(v, "filledValue"));
        let has_stop = opt_text(v, "stop").is_some() || opt_decimal(v, "stopPrice").is_some();
        Ok(Order {
            id: text(v, "id")?,
            client_order_id: opt_text(v, "clientOid"),
            symbol: self.canonical(&text(v, "symbol")?),
            side: side(v, "side")?,
            order_type: order_type(&text(v, "type")?, has_stop),
            status: order_status(v, quantity, filled),
            price: opt_decimal(v, "price").filter(|p| !p.is_zero()),
            quantity,
            filled,
            average_price: funds
                .filter(|_| !filled.is_zero())
                .map(|f| f / filled),
            created_at: opt_millis(v, "createdAt"),
            updated_at: opt_millis(v, "updatedAt"),
        })
    }

    fn map_spot_symbol(&self, v: &Value) -> Result<SymbolInfo, GatewayError> {
        Ok(SymbolInfo::from_steps(
            self.canonical(&text(v, "symbol")?),
            text(v, "baseCurrency")?,
            text(v, "quoteCurrency")?,
            boolean(v, "enableTrading").unwrap_or(false),
            decimal(v, "priceIncrement")?,
            decimal(v, "baseIncrement")?,
            opt_decimal(v, "baseMinSize"),
            opt_decimal(v, "minFunds"),
        ))
    }

    fn map_contract(&self, v: &Value) -> Result<SymbolInfo, GatewayError> {
        let mut info = SymbolInfo::from_steps(
            self.canonical(&text(v, "symbol")?),
            text(v, "baseCurrency")?,
            text(v, "quoteCurrency")?,
            opt_text(v, "status").as_deref() == Some("Open"),
            decimal(v, "tickSize")?,
            decimal(v, "lotSize")?,
            opt_decimal(v, "lotSize"),
            None,
        );
        info.max_leverage = uint(v, "maxLeverage").ok();
        Ok(info)
    }

    fn map_fill(&self, v: &Value) -> Result<Trade, GatewayError> {
        let ts = millis(v, "createdAt").or_else(|_| millis(v, "tradeTime"))?;
        Ok(Trade {
            id: text(v, "tradeId")?,
            order_id: opt_text(v, "orderId"),
            symbol: self.canonical(&text(v, "symbol")?),
            side: Some(side(v, "side")?),
            price: decimal(v, "price")?,
            quantity: decimal(v, "size")?,
            fee: opt_decimal(v, "fee"),
            fee_asset: opt_text(v, "feeCurrency"),
            is_maker: opt_text(v, "liquidity").map(|l| l == "maker"),
            // futures trade time is in nanoseconds
            timestamp: if ts > 10_000_000_000_000 { ts / 1_000_000 } else { ts },
        })
    }

    fn map_position(&self, v: &Value) -> Result<Position, GatewayError> {
        let quantity = decimal(v, "currentQty")?;
        Ok(Position {
            symbol: self.canonical(&text(v, "symbol")?),
            side: PositionSide::Both,
            quantity,
            entry_price: decimal_or_zero(v, "avgEntryPrice"),
            mark_price: opt_decimal(v, "markPrice"),
            unrealized_pnl: opt_decimal(v, "unrealisedPnl"),
            leverage: uint(v, "realLeverage").ok(),
            margin_type: Some(match opt_text(v, "marginMode").as_deref() {
                Some("CROSS") => MarginType::Cross,
                Some(_) => MarginType::Isolated,
                None if boolean(v, "crossMode") == Some(true) => MarginType::Cross,
                None => MarginType::Isolated,
            }),
            liquidation_price: opt_decimal(v, "liquidationPrice").filter(|p| !p.is_zero()),
        })
    }
}

/// Spot candles are `[time(s), open, close, high, low, volume, turnover]`.
fn spot_candle(row: &Value) -> Result<Candle, GatewayError> {
    let cell = |i: usize| {
        row.get(i)
            .and_then(value_decimal)
            .ok_or_else(|| GatewayError::malformed(format!("candle column {i}")))
    };
    let open_time = row
        .get(0)
        .and_then(value_millis)
        .ok_or_else(|| GatewayError::malformed("candle open time"))?;
    Ok(Candle {
        open_time: open_time * 1000,
        open: cell(1)?,
        close: cell(2)?,
        high: cell(3)?,
        low: cell(4)?,
        volume: cell(5)?,
    })
}

fn tif(t: Option<TimeInForce>) -> &'static str {
    match t.unwrap_or(TimeInForce::Gtc) {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
    }
}

#[async_trait]
impl ExchangeAdapter for KucoinAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(self.cfg.market)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        if self.futures() {
            let currency = asset.unwrap_or("USDT").to_uppercase();
            let req = TransportRequest::get("/api/v1/account-overview")
                .private()
                .query("currency", &currency);
            return self
                .connector
                .call("get_balance", Cost::new(FUTURES, 5), req, |data| {
                    let total = decimal(&data, "accountEquity")?;
                    let free = decimal(&data, "availableBalance")?;
                    Ok(vec![Balance {
                        asset: opt_text(&data, "currency").unwrap_or(currency),
                        free,
                        locked: total - free,
                        total,
                    }])
                })
                .await;
        }
        let req = TransportRequest::get("/api/v1/accounts")
            .private()
            .query("type", "trade")
            .query_opt("currency", asset.map(str::to_uppercase));
        self.connector
            .call("get_balance", Cost::new(MANAGEMENT, 5), req, |data| {
                let all = list(&data, |a| {
                    Ok(Balance {
                        asset: text(a, "currency")?,
                        free: decimal(a, "available")?,
                        locked: decimal(a, "holds")?,
                        total: decimal(a, "balance")?,
                    })
                })?;
                Ok(all.into_iter().filter(|b| asset.is_some() || !b.total.is_zero()).collect())
            })
            .await
    }

    async fn open_order(&self, order: &NewOrder) -> Envelope<Order> {
        let client_oid = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut body = json!({
            "clientOid": client_oid,
            "side": match order.side { Side::Buy => "buy", Side::Sell => "sell" },
            "symbol": self.symbol(&order.symbol),
            "type": match order.order_type {
                OrderType::Market | OrderType::StopMarket => "market",
                OrderType::Limit | OrderType::StopLimit => "limit",
            },
            "size": order.quantity.normalize().to_string(),
        });
        if let Some(price) = order.price {
            body["price"] = json!(price.normalize().to_string());
        }
        if matches!(order.order_type, OrderType::Limit | OrderType::StopLimit) {
            body["timeInForce"] = json!(tif(order.time_in_force));
        }
        if let Some(stop) = order.stop_price {
            body["stopPrice"] = json!(stop.normalize().to_string());
            body["stop"] = json!(match order.side { Side::Buy => "up", Side::Sell => "down" });
        }
        if self.futures() {
            body["reduceOnly"] = json!(order.reduce_only);
        }
        let req = TransportRequest::post("/api/v1/orders").private().body(body);
        let mut echoed = order.clone();
        echoed.client_order_id = Some(client_oid);
        self.connector
            .call("open_order", self.private_cost(2), req, move |data| {
                Ok(Order::accepted(text(&data, "orderId")?, &echoed, gateway_core::now_ms()))
            })
            .await
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> Envelope<Order> {
        let req = TransportRequest::get(format!("/api/v1/orders/{order_id}")).private();
        self.connector
            .call("get_order", self.private_cost(2), req, |data| self.map_order(&data))
            .await
    }

    /// KuCoin's cancel answers with ids only, so the order is read back.
    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let cancel = TransportRequest::delete(format!("/api/v1/orders/{order_id}")).private();
        let result = match scope.fetch(self.private_cost(3), cancel).await {
            Ok(_) => {
                let get = TransportRequest::get(format!("/api/v1/orders/{order_id}")).private();
                scope
                    .fetch(self.private_cost(2), get)
                    .await
                    .and_then(|data| self.map_order(&data))
            }
            Err(e) => Err(e),
        };
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let venue = self.symbol(symbol);
        let path = if self.futures() {
            "/api/v1/ticker"
        } else {
            "/api/v1/market/orderbook/level1"
        };
        let req = TransportRequest::get(path).query("symbol", &venue);
        let canonical = self.canonical(&venue);
        let futures = self.futures();
        self.connector
            .call("latest_price", Cost::new(PUBLIC, 2), req, move |data| {
                let ts = if futures {
                    opt_millis(&data, "ts").map(|ns| ns / 1_000_000)
                } else {
                    opt_millis(&data, "time")
                };
                Ok(PriceTick {
                    symbol: canonical,
                    price: decimal(&data, "price")?,
                    timestamp: ts,
                })
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let venue = self.symbol(symbol);
        if self.futures() {
            let req = TransportRequest::get(format!("/api/v1/contracts/{venue}"));
            return self
                .connector
                .call("exchange_info", Cost::new(PUBLIC, 3), req, |data| self.map_contract(&data))
                .await;
        }
        let req = TransportRequest::get("/api/v2/symbols");
        self.connector
            .call("exchange_info", Cost::new(PUBLIC, 4), req, |data| {
                let found = data
                    .as_array()
                    .and_then(|rows| {
                        rows.iter()
                            .find(|s| s.get("symbol").and_then(Value::as_str) == Some(venue.as_str()))
                    })
                    .ok_or_else(|| GatewayError::domain(format!("unknown symbol {venue}")))?;
                self.map_spot_symbol(found)
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        if self.futures() {
            let req = TransportRequest::get("/api/v1/contracts/active");
            return self
                .connector
                .call("all_exchange_info", Cost::new(PUBLIC, 3), req, |data| {
                    list(&data, |c| self.map_contract(c))
                })
                .await;
        }
        let req = TransportRequest::get("/api/v2/symbols");
        self.connector
            .call("all_exchange_info", Cost::new(PUBLIC, 4), req, |data| {
                list(&data, |s| self.map_spot_symbol(s))
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let req = TransportRequest::get("/api/v1/orders")
            .private()
            .query("status", "active")
            .query_opt("symbol", symbol.map(|s| self.symbol(s)));
        self.connector
            .call("open_orders", self.private_cost(2), req, |data| {
                array(&data, "items")?
                    .iter()
                    .map(|o| self.map_order(o))
                    .collect()
            })
            .await
    }

    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let venue = self.symbol(symbol);
        let futures = self.futures();
        let req = TransportRequest::get("/api/v1/trade-fees")
            .private()
            .query(if futures { "symbol" } else { "symbols" }, &venue);
        self.connector
            .call("user_fee", self.private_cost(3), req, |data| {
                let fee = if futures { &data } else { first(&data, "symbol not found")? };
                Ok(FeeRate {
                    symbol: self.canonical(&text(fee, "symbol")?),
                    maker: decimal(fee, "makerFeeRate")?,
                    taker: decimal(fee, "takerFeeRate")?,
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let venue = self.symbol(&query.symbol);
        if self.futures() {
            let req = TransportRequest::get("/api/v1/kline/query")
                .query("symbol", &venue)
                .query("granularity", query.interval.minutes())
                .query_opt("from", query.start_time)
                .query_opt("to", query.end_time);
            return self
                .connector
                .call("candles", Cost::new(PUBLIC, 3), req, |data| {
                    list(&data, candle_row)
                })
                .await;
        }
        let req = TransportRequest::get("/api/v1/market/candles")
            .query("symbol", &venue)
            .query("type", candle_type(query.interval))
            .query_opt("startAt", query.start_time.map(|t| t / 1000))
            .query_opt("endAt", query.end_time.map(|t| t / 1000));
        let limit = query.limit.map(|l| l as usize);
        self.connector
            .call("candles", Cost::new(PUBLIC, 3), req, move |data| {
                // newest first on the wire
                let mut rows = list(&data, spot_candle)?;
                rows.reverse();
                if let Some(limit) = limit {
                    let skip = rows.len().saturating_sub(limit);
                    rows.drain(..skip);
                }
                Ok(rows)
            })
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = TransportRequest::get("/api/v1/fills")
            .private()
            .query("symbol", self.symbol(&query.symbol))
            .query_opt("startAt", query.start_time)
            .query_opt("endAt", query.end_time)
            .query_opt("pageSize", query.limit);
        self.connector
            .call("trades", self.private_cost(10), req, |data| {
                array(&data, "items")?.iter().map(|t| self.map_fill(t)).collect()
            })
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        if self.futures() {
            let req = TransportRequest::get("/api/v1/allTickers");
            return self
                .connector
                .call("all_prices", Cost::new(PUBLIC, 5), req, |data| {
                    list(&data, |t| {
                        Ok(PriceTick {
                            symbol: self.canonical(&text(t, "symbol")?),
                            price: decimal(t, "price")?,
                            timestamp: opt_millis(t, "ts").map(|ns| ns / 1_000_000),
                        })
                    })
                })
                .await;
        }
        let req = TransportRequest::get("/api/v1/market/allTickers");
        self.connector
            .call("all_prices", Cost::new(PUBLIC, 15), req, |data| {
                let time = opt_millis(&data, "time");
                array(&data, "ticker")?
                    .iter()
                    .filter(|t| opt_text(t, "last").is_some())
                    .map(|t| {
                        Ok(PriceTick {
                            symbol: self.canonical(&text(t, "symbol")?),
                            price: decimal(t, "last")?,
                            timestamp: time,
                        })
                    })
                    .collect()
            })
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_leverage", e);
        }
        let req = TransportRequest::get("/api/v2/getCrossUserLeverage")
            .private()
            .query("symbol", self.symbol(symbol));
        self.connector
            .call("get_leverage", Cost::new(FUTURES, 2), req, |data| {
                Ok(Leverage {
                    symbol: self.canonical(&text(&data, "symbol")?),
                    leverage: uint(&data, "leverage")?,
                })
            })
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_leverage", e);
        }
        let venue = self.symbol(symbol);
        let req = TransportRequest::post("/api/v2/changeCrossUserLeverage")
            .private()
            .body(json!({ "symbol": venue, "leverage": leverage.to_string() }));
        let canonical = self.canonical(&venue);
        self.connector
            .call("set_leverage", Cost::new(FUTURES, 2), req, move |data| {
                match data {
                    Value::Bool(false) => Err(GatewayError::domain("leverage change rejected")),
                    _ => Ok(Leverage {
                        symbol: canonical,
                        leverage,
                    }),
                }
            })
            .await
    }

    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_margin_type", e);
        }
        let mode = match margin {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSS",
        };
        let req = TransportRequest::post("/api/v2/position/changeMarginMode")
            .private()
            .body(json!({ "symbol": self.symbol(symbol), "marginMode": mode }));
        self.connector
            .call("set_margin_type", Cost::new(FUTURES, 2), req, move |data| {
                Ok(opt_text(&data, "marginMode")
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(margin))
            })
            .await
    }

    /// KuCoin futures positions are one-way only.
    async fn get_hedge_mode(&self) -> Envelope<bool> {
        match require_futures(self.market()) {
            Ok(_) => self.connector.fixed("get_hedge_mode", false),
            Err(e) => self.connector.reject("get_hedge_mode", e),
        }
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
        let req = TransportRequest::get(format!("/api/v1/contracts/risk-limit/{venue}")).private();
        self.connector
            .call("leverage_brackets", Cost::new(FUTURES, 5), req, |data| {
                list(&data, |b| {
                    Ok(LeverageBracket {
                        symbol: self.canonical(&text(b, "symbol")?),
                        bracket: uint(b, "level")?,
                        initial_leverage: uint(b, "maxLeverage")?,
                        notional_floor: decimal_or_zero(b, "minRiskLimit"),
                        notional_cap: decimal(b, "maxRiskLimit")?,
                        maintenance_margin_ratio: decimal(b, "maintainMargin")?,
                    })
                })
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("positions", e);
        }
        let wanted = symbol.map(|s| self.symbol(s));
        let req = TransportRequest::get("/api/v1/positions").private();
        self.connector
            .call("positions", Cost::new(FUTURES, 2), req, |data| {
                let rows = data.as_array().cloned().unwrap_or_default();
                rows.iter()
                    .filter(|p| match &wanted {
                        Some(w) => p.get("symbol").and_then(Value::as_str) == Some(w.as_str()),
                        None => true,
                    })
                    .map(|p| self.map_position(p))
                    .filter(|p| !matches!(p, Ok(pos) if pos.quantity.is_zero()))
                    .collect()
            })
            .await
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        if self.futures() {
            return self.connector.unsupported("account_id");
        }
        let req = TransportRequest::get("/api/v1/user/api-key").private();
        self.connector
            .call("account_id", Cost::new(MANAGEMENT, 20), req, |data| {
                Ok(AccountIdentity {
                    uid: text(&data, "uid")?,
                })
            })
            .await
    }
}

static REGISTER: Once = Once::new();

/// Register KuCoin adapters for all market types.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in KUCOIN_EXCHANGES {
            let cfg_ref: &'static KucoinConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(KucoinAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
