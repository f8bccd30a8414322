use anyhow::Result;
use async_trait::async_trait;
use canonical::{
    normalize_symbol, AccountIdentity, AffiliateStatus, Balance, Candle, CandleInterval,
    CandleQuery, FeeRate, Leverage, LeverageBracket, MarginType, MarketKind, NewOrder, Order,
    OrderStatus, OrderType, Pair, Position, PositionSide, PriceTick, Side, SymbolInfo,
    TimeInForce, Trade, TradeQuery,
};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::{Envelope, GatewayError, TransportError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    array, candle_row, decimal, decimal_or_zero, first, list, millis, opt_decimal, opt_millis,
    opt_text, side, text, uint,
};
use super::{accept_code, require_futures, venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for a single OKX instrument type.
pub struct OkxConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// v5 `instType`.
    pub inst_type: &'static str,
    pub market: MarketKind,
}

pub const OKX_EXCHANGES: &[OkxConfig] = &[
    OkxConfig {
        id: "okx",
        name: "OKX Spot",
        base_url: "https://www.okx.com",
        inst_type: "SPOT",
        market: MarketKind::Spot,
    },
    OkxConfig {
        id: "okx_swap",
        name: "OKX Perpetual Swap",
        base_url: "https://www.okx.com",
        inst_type: "SWAP",
        market: MarketKind::LinearFutures,
    },
];

pub const WEIGHT: &str = "weight";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![LimitRule::new(WEIGHT, 60, Duration::from_secs(2))]
}

const fn w(weight: u64) -> Cost {
    Cost::new(WEIGHT, weight)
}

/// The uid is not an invitee of the caller.
const NOT_INVITEE: &str = "51621";

/// Unwrap the `{code, msg, data}` wrapper.
pub fn unwrap(mut body: Value) -> Result<Value, TransportError> {
    let code = match body.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Ok(body),
    };
    if code == "0" {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    // batch style errors carry the useful code per item
    let item = body.get("data").and_then(|d| d.get(0));
    let code = item
        .and_then(|i| opt_text(i, "sCode"))
        .filter(|c| c != "0")
        .unwrap_or(code);
    let msg = item
        .and_then(|i| opt_text(i, "sMsg"))
        .or_else(|| opt_text(&body, "msg"))
        .unwrap_or_else(|| "okx error".to_string());
    Err(TransportError::new(msg)
        .with_code(code)
        .with_body(body.to_string()))
}

pub struct OkxAdapter {
    cfg: &'static OkxConfig,
    connector: Connector,
}

impl OkxAdapter {
    pub fn new(cfg: &'static OkxConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(
            base,
            credentials,
            AuthHeaders::with_passphrase("OK-ACCESS-KEY", "OK-ACCESS-PASSPHRASE"),
        )?;
        let limiter = shared_limiter("okx", limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static OkxConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter).with_unwrap(unwrap),
        }
    }

    fn swap(&self) -> bool {
        self.cfg.market.is_futures()
    }

    /// `BTC-USDT` on spot, `BTC-USDT-SWAP` on perpetuals.
    fn inst_id(&self, symbol: &str) -> String {
        let venue = venue_symbol(self.cfg.id, symbol, "-");
        if self.swap() && !venue.ends_with("-SWAP") {
            format!("{venue}-SWAP")
        } else {
            venue
        }
    }

    fn order_req(&self, path: &str, symbol: &str, order_id: &str) -> TransportRequest {
        TransportRequest::get(path)
            .private()
            .query("instId", self.inst_id(symbol))
            .query("ordId", order_id)
    }
}

fn bar(i: CandleInterval) -> &'static str {
    match i {
        CandleInterval::M1 => "1m",
        CandleInterval::M3 => "3m",
        CandleInterval::M5 => "5m",
        CandleInterval::M15 => "15m",
        CandleInterval::M30 => "30m",
        CandleInterval::H1 => "1H",
        CandleInterval::H2 => "2H",
        CandleInterval::H4 => "4H",
        CandleInterval::H6 => "6Hutc",
        CandleInterval::H12 => "12Hutc",
        CandleInterval::D1 => "1Dutc",
        CandleInterval::W1 => "1Wutc",
    }
}

fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "live" => OrderStatus::New,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "mmp_canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

fn non_zero(d: Option<Decimal>) -> Option<Decimal> {
    d.filter(|d| !d.is_zero())
}

pub fn map_order(exchange: &str, v: &Value) -> Result<Order, GatewayError> {
    let order_type = match text(v, "ordType")?.as_str() {
        "market" => OrderType::Market,
        _ => OrderType::Limit,
    };
    Ok(Order {
        id: text(v, "ordId")?,
        client_order_id: opt_text(v, "clOrdId"),
        symbol: normalize_symbol(exchange, &text(v, "instId")?),
        side: side(v, "side")?,
        order_type,
        status: order_status(&text(v, "state")?),
        price: non_zero(opt_decimal(v, "px")),
        quantity: decimal(v, "sz")?,
        filled: decimal_or_zero(v, "accFillSz"),
        average_price: non_zero(opt_decimal(v, "avgPx")),
        created_at: opt_millis(v, "cTime"),
        updated_at: opt_millis(v, "uTime"),
    })
}

fn map_instrument(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    let inst_id = text(v, "instId")?;
    // swaps leave baseCcy/quoteCcy empty; the family names the pair
    let (base, quote) = match (opt_text(v, "baseCcy"), opt_text(v, "quoteCcy")) {
        (Some(b), Some(q)) => (b, q),
        _ => {
            let pair = Pair::parse(&inst_id).map_err(|e| GatewayError::malformed(e.to_string()))?;
            (pair.base, pair.quote)
        }
    };
    let mut info = SymbolInfo::from_steps(
        normalize_symbol(exchange, &inst_id),
        base,
        quote,
        opt_text(v, "state").as_deref() == Some("live"),
        decimal(v, "tickSz")?,
        decimal(v, "lotSz")?,
        opt_decimal(v, "minSz"),
        None,
    );
    info.max_leverage = uint(v, "lever").ok();
    Ok(info)
}

fn map_ticker(exchange: &str, v: &Value) -> Result<PriceTick, GatewayError> {
    Ok(PriceTick {
        symbol: normalize_symbol(exchange, &text(v, "instId")?),
        price: decimal(v, "last")?,
        timestamp: opt_millis(v, "ts"),
    })
}

fn map_fill(exchange: &str, v: &Value) -> Result<Trade, GatewayError> {
    Ok(Trade {
        id: text(v, "tradeId")?,
        order_id: opt_text(v, "ordId"),
        symbol: normalize_symbol(exchange, &text(v, "instId")?),
        side: Some(side(v, "side")?),
        price: decimal(v, "fillPx")?,
        quantity: decimal(v, "fillSz")?,
        // charged fees are negative on the wire
        fee: opt_decimal(v, "fee").map(|f| -f),
        fee_asset: opt_text(v, "feeCcy"),
        is_maker: opt_text(v, "execType").map(|t| t == "M"),
        timestamp: millis(v, "ts")?,
    })
}

fn map_position(exchange: &str, v: &Value) -> Result<Position, GatewayError> {
    let pos = decimal(v, "pos")?;
    let (side, quantity) = match opt_text(v, "posSide").as_deref() {
        Some("long") => (PositionSide::Long, pos.abs()),
        Some("short") => (PositionSide::Short, -pos.abs()),
        _ => (PositionSide::Both, pos),
    };
    Ok(Position {
        symbol: normalize_symbol(exchange, &text(v, "instId")?),
        side,
        quantity,
        entry_price: decimal_or_zero(v, "avgPx"),
        mark_price: opt_decimal(v, "markPx"),
        unrealized_pnl: opt_decimal(v, "upl"),
        leverage: uint(v, "lever").ok(),
        margin_type: opt_text(v, "mgnMode").and_then(|m| m.parse().ok()),
        liquidation_price: non_zero(opt_decimal(v, "liqPx")),
    })
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(self.cfg.market)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let wanted = asset.map(str::to_uppercase);
        let req = TransportRequest::get("/api/v5/account/balance")
            .private()
            .query_opt("ccy", wanted.as_deref());
        self.connector
            .call("get_balance", w(6), req, |data| {
                let account = first(&data, "no trading account")?;
                let mut out = Vec::new();
                for d in array(account, "details")? {
                    let free = decimal(d, "availBal")?;
                    let locked = decimal_or_zero(d, "frozenBal");
                    let balance = Balance {
                        asset: text(d, "ccy")?,
                        free,
                        locked,
                        total: opt_decimal(d, "cashBal").unwrap_or(free + locked),
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
        if matches!(order.order_type, OrderType::StopLimit | OrderType::StopMarket) {
            return self
                .connector
                .reject("open_order", GatewayError::domain("stop orders need the algo endpoint"));
        }
        let cl_ord_id = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let ord_type = match (order.order_type, order.time_in_force) {
            (OrderType::Market, _) => "market",
            (_, Some(TimeInForce::Ioc)) => "ioc",
            (_, Some(TimeInForce::Fok)) => "fok",
            _ => "limit",
        };
        let mut body = json!({
            "instId": self.inst_id(&order.symbol),
            "tdMode": if self.swap() { "cross" } else { "cash" },
            "side": match order.side { Side::Buy => "buy", Side::Sell => "sell" },
            "ordType": ord_type,
            "sz": order.quantity.normalize().to_string(),
            "clOrdId": cl_ord_id,
        });
        if let Some(price) = order.price {
            body["px"] = json!(price.normalize().to_string());
        }
        if order.reduce_only && self.swap() {
            body["reduceOnly"] = json!(true);
        }
        let req = TransportRequest::post("/api/v5/trade/order").private().body(body);
        let mut echoed = order.clone();
        echoed.client_order_id = Some(cl_ord_id);
        self.connector
            .call("open_order", w(1), req, move |data| {
                let placed = first(&data, "order not acknowledged")?;
                Ok(Order::accepted(text(placed, "ordId")?, &echoed, gateway_core::now_ms()))
            })
            .await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let req = self.order_req("/api/v5/trade/order", symbol, order_id);
        let exchange = self.cfg.id;
        self.connector
            .call("get_order", w(1), req, |data| {
                map_order(exchange, first(&data, "order not found")?)
            })
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let cancel = TransportRequest::post("/api/v5/trade/cancel-order")
            .private()
            .body(json!({ "instId": self.inst_id(symbol), "ordId": order_id }));
        let exchange = self.cfg.id;
        let result = match scope.fetch(w(1), cancel).await {
            Ok(_) => scope
                .fetch(w(1), self.order_req("/api/v5/trade/order", symbol, order_id))
                .await
                .and_then(|data| map_order(exchange, first(&data, "order not found")?)),
            Err(e) => Err(e),
        };
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let req = TransportRequest::get("/api/v5/market/ticker").query("instId", self.inst_id(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("latest_price", w(1), req, |data| {
                map_ticker(exchange, first(&data, "symbol not found")?)
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let req = TransportRequest::get("/api/v5/public/instruments")
            .query("instType", self.cfg.inst_type)
            .query("instId", self.inst_id(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("exchange_info", w(3), req, |data| {
                map_instrument(exchange, first(&data, "unknown symbol")?)
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        let req = TransportRequest::get("/api/v5/public/instruments").query("instType", self.cfg.inst_type);
        let exchange = self.cfg.id;
        self.connector
            .call("all_exchange_info", w(3), req, |data| {
                list(&data, |i| map_instrument(exchange, i))
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let req = TransportRequest::get("/api/v5/trade/orders-pending")
            .private()
            .query("instType", self.cfg.inst_type)
            .query_opt("instId", symbol.map(|s| self.inst_id(s)));
        let exchange = self.cfg.id;
        self.connector
            .call("open_orders", w(1), req, |data| list(&data, |o| map_order(exchange, o)))
            .await
    }

    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let inst_id = self.inst_id(symbol);
        let mut req = TransportRequest::get("/api/v5/account/trade-fee")
            .private()
            .query("instType", self.cfg.inst_type);
        req = if self.swap() {
            req.query("instFamily", inst_id.trim_end_matches("-SWAP"))
        } else {
            req.query("instId", &inst_id)
        };
        let canonical = normalize_symbol(self.cfg.id, &inst_id);
        let swap = self.swap();
        self.connector
            .call("user_fee", w(12), req, move |data| {
                let fee = first(&data, "no fee tier")?;
                // charged rates are negative; swaps quote USDT-margined rates separately
                let (maker, taker) = if swap {
                    ("makerU", "takerU")
                } else {
                    ("maker", "taker")
                };
                Ok(FeeRate {
                    symbol: canonical,
                    maker: -decimal(fee, maker)?,
                    taker: -decimal(fee, taker)?,
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        // `after` pages backwards from a timestamp, `before` forwards
        let req = TransportRequest::get("/api/v5/market/candles")
            .query("instId", self.inst_id(&query.symbol))
            .query("bar", bar(query.interval))
            .query_opt("after", query.end_time)
            .query_opt("before", query.start_time)
            .query_opt("limit", query.limit);
        self.connector
            .call("candles", w(1), req, |data| {
                let mut rows = list(&data, candle_row)?;
                rows.reverse();
                Ok(rows)
            })
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = TransportRequest::get("/api/v5/trade/fills-history")
            .private()
            .query("instType", self.cfg.inst_type)
            .query("instId", self.inst_id(&query.symbol))
            .query_opt("begin", query.start_time)
            .query_opt("end", query.end_time)
            .query_opt("limit", query.limit)
            .query_opt("after", query.from_id.as_deref());
        let exchange = self.cfg.id;
        self.connector
            .call("trades", w(6), req, |data| list(&data, |f| map_fill(exchange, f)))
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        let req = TransportRequest::get("/api/v5/market/tickers").query("instType", self.cfg.inst_type);
        let exchange = self.cfg.id;
        self.connector
            .call("all_prices", w(3), req, |data| list(&data, |t| map_ticker(exchange, t)))
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_leverage", e);
        }
        let req = TransportRequest::get("/api/v5/account/leverage-info")
            .private()
            .query("instId", self.inst_id(symbol))
            .query("mgnMode", "cross");
        let exchange = self.cfg.id;
        self.connector
            .call("get_leverage", w(3), req, |data| {
                let info = first(&data, "no leverage information")?;
                Ok(Leverage {
                    symbol: normalize_symbol(exchange, &text(info, "instId")?),
                    leverage: uint(info, "lever")?,
                })
            })
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_leverage", e);
        }
        let req = TransportRequest::post("/api/v5/account/set-leverage")
            .private()
            .body(json!({
                "instId": self.inst_id(symbol),
                "lever": leverage.to_string(),
                "mgnMode": "cross",
            }));
        let exchange = self.cfg.id;
        self.connector
            .call("set_leverage", w(3), req, |data| {
                let info = first(&data, "leverage not acknowledged")?;
                Ok(Leverage {
                    symbol: normalize_symbol(exchange, &text(info, "instId")?),
                    leverage: uint(info, "lever")?,
                })
            })
            .await
    }

    /// OKX chooses the margin mode per order, so the requested mode is
    /// echoed without a request.
    async fn set_margin_type(&self, _symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        match require_futures(self.market()) {
            Ok(_) => self.connector.fixed("set_margin_type", margin),
            Err(e) => self.connector.reject("set_margin_type", e),
        }
    }

    async fn get_hedge_mode(&self) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_hedge_mode", e);
        }
        let req = TransportRequest::get("/api/v5/account/config").private();
        self.connector
            .call("get_hedge_mode", w(12), req, |data| {
                let cfg = first(&data, "no account config")?;
                Ok(text(cfg, "posMode")? == "long_short_mode")
            })
            .await
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_hedge_mode", e);
        }
        let mode = if enabled { "long_short_mode" } else { "net_mode" };
        let req = TransportRequest::post("/api/v5/account/set-position-mode")
            .private()
            .body(json!({ "posMode": mode }));
        self.connector
            .call("set_hedge_mode", w(12), req, move |data| {
                let cfg = first(&data, "position mode not acknowledged")?;
                Ok(opt_text(cfg, "posMode").map_or(enabled, |m| m == "long_short_mode"))
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
        let inst_id = self.inst_id(symbol);
        let req = TransportRequest::get("/api/v5/public/position-tiers")
            .query("instType", self.cfg.inst_type)
            .query("tdMode", "cross")
            .query("instFamily", inst_id.trim_end_matches("-SWAP"));
        let canonical = normalize_symbol(self.cfg.id, &inst_id);
        self.connector
            .call("leverage_brackets", w(3), req, move |data| {
                list(&data, |t| {
                    Ok(LeverageBracket {
                        symbol: canonical.clone(),
                        bracket: uint(t, "tier")?,
                        initial_leverage: uint(t, "maxLever")?,
                        notional_floor: decimal_or_zero(t, "minSz"),
                        notional_cap: decimal(t, "maxSz")?,
                        maintenance_margin_ratio: decimal(t, "mmr")?,
                    })
                })
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("positions", e);
        }
        let req = TransportRequest::get("/api/v5/account/positions")
            .private()
            .query("instType", self.cfg.inst_type)
            .query_opt("instId", symbol.map(|s| self.inst_id(s)));
        let exchange = self.cfg.id;
        self.connector
            .call("positions", w(6), req, |data| {
                let all = list(&data, |p| map_position(exchange, p))?;
                Ok(all.into_iter().filter(|p| !p.quantity.is_zero()).collect())
            })
            .await
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        let req = TransportRequest::get("/api/v5/account/config").private();
        self.connector
            .call("account_id", w(12), req, |data| {
                Ok(AccountIdentity {
                    uid: text(first(&data, "no account config")?, "uid")?,
                })
            })
            .await
    }

    async fn check_affiliate(&self, uid: &str) -> Envelope<AffiliateStatus> {
        let req = TransportRequest::get("/api/v5/affiliate/invitee/detail")
            .private()
            .query("uid", uid);
        let status = |is_affiliate| AffiliateStatus {
            uid: uid.to_string(),
            is_affiliate,
        };
        let scope = self.connector.scope("check_affiliate");
        let result = scope.fetch(w(3), req).await.map(|_| status(true));
        scope.finish(accept_code(result, NOT_INVITEE, status(false)))
    }
}

static REGISTER: Once = Once::new();

/// Register OKX adapters for spot and perpetual swaps.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in OKX_EXCHANGES {
            let cfg_ref: &'static OkxConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(OkxAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
