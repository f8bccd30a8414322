//! Hyperliquid perpetuals.
//!
//! Everything goes through two POST endpoints: `/info` for reads and
//! `/exchange` for actions. Actions address markets by asset index, which
//! is resolved from the perp universe through the shared reference cache.

use anyhow::Result;
use async_trait::async_trait;
use canonical::precision::tick_from_places;
use canonical::{
    AccountIdentity, AffiliateStatus, Balance, Candle, CandleInterval, CandleQuery, FeeRate,
    Leverage, LeverageBracket, MarginType, MarketKind, NewOrder, Order, OrderStatus, OrderType,
    Position, PositionSide, PriceTick, RebateOverview, RebateQuery, RebateRecord, Side,
    SymbolInfo, TimeInForce, Trade, TradeQuery,
};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::reference::{shared_cache, ReferenceCache};
use gateway_core::{now_ms, Envelope, GatewayError, TransportError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    array, boolean, decimal, decimal_or_zero, field, list, millis, opt_decimal, opt_millis,
    opt_text, side, text, uint, value_decimal,
};
use super::{require_futures, ExchangeAdapter};
use crate::connector::{Connector, Cost, Scope};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for a Hyperliquid network.
pub struct HyperliquidConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
}

pub const HYPERLIQUID_EXCHANGES: &[HyperliquidConfig] = &[HyperliquidConfig {
    id: "hyperliquid",
    name: "Hyperliquid Perpetuals",
    base_url: "https://api.hyperliquid.xyz",
}];

pub const WEIGHT: &str = "weight";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![LimitRule::new(WEIGHT, 1200, Duration::from_secs(60))]
}

/// allMids, clearinghouseState, orderStatus.
const LIGHT_INFO: Cost = Cost::new(WEIGHT, 2);
const INFO: Cost = Cost::new(WEIGHT, 20);
const ACTION: Cost = Cost::new(WEIGHT, 1);

/// Every perp settles in USDC.
pub const QUOTE: &str = "USDC";
const DEFAULT_CANDLES: u64 = 500;
/// Prices carry at most this many decimals minus the size decimals.
const MAX_PRICE_DECIMALS: u32 = 6;

/// Unwrap `/exchange` answers; `/info` bodies pass through untouched.
pub fn unwrap(mut body: Value) -> Result<Value, TransportError> {
    match body.get("status").and_then(Value::as_str) {
        Some("ok") if body.get("response").is_some() => {
            Ok(body.get_mut("response").map(Value::take).unwrap_or(Value::Null))
        }
        Some("err") => {
            let msg = body
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or("hyperliquid error")
                .to_string();
            Err(TransportError::new(msg).with_body(body.to_string()))
        }
        _ => Ok(body),
    }
}

/// Coin of a `COIN/USDC` pair; case is kept since coins like `kPEPE` are
/// case sensitive.
pub fn coin(symbol: &str) -> &str {
    symbol
        .split(['/', '-', ':'])
        .next()
        .unwrap_or(symbol)
        .trim()
}

pub fn pair(coin: &str) -> String {
    format!("{coin}/{QUOTE}")
}

pub struct HyperliquidAdapter {
    cfg: &'static HyperliquidConfig,
    connector: Connector,
    /// Wallet address the account is queried for.
    user: String,
    assets: Arc<ReferenceCache>,
}

impl HyperliquidAdapter {
    pub fn new(cfg: &'static HyperliquidConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let user = credentials.api_key.clone();
        let transport = RestTransport::new(base, credentials, AuthHeaders::key("X-HL-WALLET"))?;
        let limiter = shared_limiter(cfg.id, limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter, user))
    }

    pub fn with_transport(
        cfg: &'static HyperliquidConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter).with_unwrap(unwrap),
            user: user.into(),
            assets: shared_cache(cfg.id),
        }
    }

    pub fn config(&self) -> &'static HyperliquidConfig {
        self.cfg
    }

    /// Use a private asset directory instead of the process-wide one.
    pub fn with_assets(mut self, assets: Arc<ReferenceCache>) -> Self {
        self.assets = assets;
        self
    }

    /// Asset index of `coin`; the universe is loaded through `scope` when
    /// the directory is stale.
    async fn asset(&self, scope: &Scope<'_>, coin: &str) -> Result<u32, GatewayError> {
        let loader = || async move {
            let meta = scope.fetch(INFO, info(json!({ "type": "meta" }))).await?;
            Ok::<_, anyhow::Error>(universe_ids(&meta)?)
        };
        self.assets
            .resolve(&pair(coin), loader)
            .await
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| GatewayError::domain(format!("unknown asset {coin}")))
    }

    async fn order_status(&self, scope: &Scope<'_>, order_id: &str) -> Result<Order, GatewayError> {
        let oid = parse_oid(order_id)?;
        let body = scope
            .fetch(
                LIGHT_INFO,
                info(json!({ "type": "orderStatus", "user": self.user, "oid": oid })),
            )
            .await?;
        if opt_text(&body, "status").as_deref() != Some("order") {
            return Err(GatewayError::domain(format!("order {order_id} not found")));
        }
        let wrapper = field(&body, "order")?;
        map_order(
            field(wrapper, "order")?,
            status(&text(wrapper, "status")?),
            opt_millis(wrapper, "statusTimestamp"),
        )
    }

    async fn active_leverage(&self, scope: &Scope<'_>, coin: &str) -> Result<(MarginType, u32), GatewayError> {
        let body = scope
            .fetch(
                INFO,
                info(json!({ "type": "activeAssetData", "user": self.user, "coin": coin })),
            )
            .await?;
        let lev = field(&body, "leverage")?;
        let margin = match text(lev, "type")?.as_str() {
            "isolated" => MarginType::Isolated,
            _ => MarginType::Cross,
        };
        Ok((margin, uint(lev, "value")?))
    }

    async fn update_leverage(
        &self,
        scope: &Scope<'_>,
        coin: &str,
        margin: MarginType,
        leverage: u32,
    ) -> Result<(), GatewayError> {
        let asset = self.asset(scope, coin).await?;
        let action = json!({
            "type": "updateLeverage",
            "asset": asset,
            "isCross": margin == MarginType::Cross,
            "leverage": leverage,
        });
        scope.fetch(ACTION, exchange(action)).await.map(|_| ())
    }
}

fn info(body: Value) -> TransportRequest {
    TransportRequest::post("/info").body(body)
}

/// Actions are signed by the transport; the adapter supplies action and nonce.
fn exchange(action: Value) -> TransportRequest {
    TransportRequest::post("/exchange")
        .private()
        .body(json!({ "action": action, "nonce": now_ms() }))
}

fn parse_oid(order_id: &str) -> Result<u64, GatewayError> {
    order_id
        .parse()
        .map_err(|_| GatewayError::domain(format!("invalid order id {order_id}")))
}

/// `(pair, asset index)` for every perp in the universe, by position.
fn universe_ids(meta: &Value) -> Result<Vec<(String, String)>, GatewayError> {
    Ok(array(meta, "universe")?
        .iter()
        .enumerate()
        .filter_map(|(i, a)| opt_text(a, "name").map(|name| (pair(&name), i.to_string())))
        .collect())
}

fn status(raw: &str) -> OrderStatus {
    match raw {
        "open" | "triggered" => OrderStatus::New,
        "filled" => OrderStatus::Filled,
        "rejected" => OrderStatus::Rejected,
        s if s.ends_with("anceled") => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

fn interval(i: CandleInterval) -> Option<&'static str> {
    match i {
        CandleInterval::H6 => None,
        other => Some(other.as_str()),
    }
}

pub fn map_order(v: &Value, status: OrderStatus, updated_at: Option<u64>) -> Result<Order, GatewayError> {
    let remaining = decimal(v, "sz")?;
    let quantity = opt_decimal(v, "origSz").unwrap_or(remaining);
    let filled = quantity - remaining;
    let status = match status {
        OrderStatus::New if !filled.is_zero() => OrderStatus::PartiallyFilled,
        other => other,
    };
    let order_type = match opt_text(v, "orderType").as_deref() {
        Some("Market") => OrderType::Market,
        Some(t) if t.starts_with("Stop Market") || t.starts_with("Take Profit Market") => OrderType::StopMarket,
        Some(t) if t.starts_with("Stop") || t.starts_with("Take Profit") => OrderType::StopLimit,
        _ => OrderType::Limit,
    };
    let created_at = opt_millis(v, "timestamp");
    Ok(Order {
        id: text(v, "oid")?,
        client_order_id: opt_text(v, "cloid"),
        symbol: pair(&text(v, "coin")?),
        side: side(v, "side")?,
        order_type,
        status,
        price: opt_decimal(v, "limitPx"),
        quantity,
        filled,
        average_price: None,
        created_at,
        updated_at: updated_at.or(created_at),
    })
}

fn map_asset(v: &Value) -> Result<SymbolInfo, GatewayError> {
    let coin = text(v, "name")?;
    let sz_decimals = uint(v, "szDecimals")?;
    let mut info = SymbolInfo::from_steps(
        pair(&coin),
        coin,
        QUOTE.to_string(),
        !boolean(v, "isDelisted").unwrap_or(false),
        tick_from_places(MAX_PRICE_DECIMALS.saturating_sub(sz_decimals)),
        tick_from_places(sz_decimals),
        Some(tick_from_places(sz_decimals)),
        Some(Decimal::TEN),
    );
    info.max_leverage = uint(v, "maxLeverage").ok();
    Ok(info)
}

fn map_fill(v: &Value) -> Result<Trade, GatewayError> {
    Ok(Trade {
        id: text(v, "tid")?,
        order_id: opt_text(v, "oid"),
        symbol: pair(&text(v, "coin")?),
        side: Some(side(v, "side")?),
        price: decimal(v, "px")?,
        quantity: decimal(v, "sz")?,
        fee: opt_decimal(v, "fee"),
        fee_asset: opt_text(v, "feeToken"),
        is_maker: boolean(v, "crossed").map(|crossed| !crossed),
        timestamp: millis(v, "time")?,
    })
}

fn map_position(v: &Value) -> Result<Position, GatewayError> {
    let p = field(v, "position")?;
    let lev = p.get("leverage");
    Ok(Position {
        symbol: pair(&text(p, "coin")?),
        side: PositionSide::Both,
        quantity: decimal(p, "szi")?,
        entry_price: decimal_or_zero(p, "entryPx"),
        mark_price: None,
        unrealized_pnl: opt_decimal(p, "unrealizedPnl"),
        leverage: lev.and_then(|l| uint(l, "value").ok()),
        margin_type: lev
            .and_then(|l| opt_text(l, "type"))
            .and_then(|t| t.parse().ok()),
        liquidation_price: opt_decimal(p, "liquidationPx"),
    })
}

fn map_candle(v: &Value) -> Result<Candle, GatewayError> {
    Ok(Candle {
        open_time: millis(v, "t")?,
        open: decimal(v, "o")?,
        high: decimal(v, "h")?,
        low: decimal(v, "l")?,
        close: decimal(v, "c")?,
        volume: decimal(v, "v")?,
    })
}

/// Brackets from the margin table the asset points at. Maintenance margin
/// is half the initial margin at the tier's maximum leverage.
fn map_brackets(meta: &Value, coin: &str) -> Result<Vec<LeverageBracket>, GatewayError> {
    let asset = array(meta, "universe")?
        .iter()
        .find(|a| a.get("name").and_then(Value::as_str) == Some(coin))
        .ok_or_else(|| GatewayError::domain(format!("unknown asset {coin}")))?;
    let max_leverage = uint(asset, "maxLeverage")?;
    let table_id = asset.get("marginTableId").and_then(Value::as_u64);
    let tiers: Vec<(Decimal, u32)> = meta
        .get("marginTables")
        .and_then(Value::as_array)
        .and_then(|tables| {
            tables.iter().find(|t| t.get(0).and_then(Value::as_u64) == table_id && table_id.is_some())
        })
        .and_then(|t| t.get(1))
        .and_then(|t| t.get("marginTiers"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|r| Some((r.get("lowerBound").and_then(value_decimal)?, uint(r, "maxLeverage").ok()?)))
                .collect()
        })
        .filter(|rows: &Vec<(Decimal, u32)>| !rows.is_empty())
        .unwrap_or_else(|| vec![(Decimal::ZERO, max_leverage)]);
    let symbol = pair(coin);
    Ok(tiers
        .iter()
        .enumerate()
        .map(|(i, (floor, leverage))| LeverageBracket {
            symbol: symbol.clone(),
            bracket: i as u32 + 1,
            initial_leverage: *leverage,
            notional_floor: *floor,
            notional_cap: tiers.get(i + 1).map_or(Decimal::MAX, |(next, _)| *next),
            maintenance_margin_ratio: Decimal::ONE
                .checked_div(Decimal::from(u64::from(*leverage) * 2))
                .unwrap_or(Decimal::ZERO),
        })
        .collect())
}

fn order_wire(asset: u32, order: &NewOrder) -> Result<Value, GatewayError> {
    let price = order
        .price
        .or(order.stop_price)
        .ok_or_else(|| GatewayError::domain("hyperliquid orders need a limit price"))?;
    let kind = match order.order_type {
        OrderType::Limit => {
            let tif = match order.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "Gtc",
                TimeInForce::Ioc => "Ioc",
                TimeInForce::Fok => {
                    return Err(GatewayError::domain("fill-or-kill is not offered"))
                }
            };
            json!({ "limit": { "tif": tif } })
        }
        // market orders are aggressive IOC limits
        OrderType::Market => json!({ "limit": { "tif": "Ioc" } }),
        OrderType::StopLimit | OrderType::StopMarket => {
            let trigger = order
                .stop_price
                .ok_or_else(|| GatewayError::domain("stop orders need a stop price"))?;
            json!({ "trigger": {
                "isMarket": order.order_type == OrderType::StopMarket,
                "triggerPx": trigger.normalize().to_string(),
                "tpsl": "sl",
            }})
        }
    };
    let mut wire = json!({
        "a": asset,
        "b": order.side == Side::Buy,
        "p": price.normalize().to_string(),
        "s": order.quantity.normalize().to_string(),
        "r": order.reduce_only,
        "t": kind,
    });
    if let Some(cloid) = &order.client_order_id {
        wire["c"] = json!(cloid);
    }
    Ok(wire)
}

/// First entry of an action's `data.statuses`, erroring on `{"error": ..}`.
fn action_status(response: &Value) -> Result<&Value, GatewayError> {
    let data = field(response, "data")?;
    let first = array(data, "statuses")?
        .first()
        .ok_or_else(|| GatewayError::malformed("empty statuses"))?;
    match first.get("error").and_then(Value::as_str) {
        Some(err) => Err(GatewayError::domain(err)),
        None => Ok(first),
    }
}

#[async_trait]
impl ExchangeAdapter for HyperliquidAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(MarketKind::LinearFutures)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let req = info(json!({ "type": "clearinghouseState", "user": self.user }));
        let wanted = asset.map(str::to_uppercase);
        self.connector
            .call("get_balance", LIGHT_INFO, req, |body| {
                if wanted.as_deref().is_some_and(|a| a != QUOTE) {
                    return Ok(Vec::new());
                }
                let total = decimal(field(&body, "marginSummary")?, "accountValue")?;
                let free = decimal(&body, "withdrawable")?;
                Ok(vec![Balance {
                    asset: QUOTE.to_string(),
                    free,
                    locked: total - free,
                    total,
                }])
            })
            .await
    }

    async fn open_order(&self, order: &NewOrder) -> Envelope<Order> {
        let scope = self.connector.scope("open_order");
        let result = async {
            let asset = self.asset(&scope, coin(&order.symbol)).await?;
            let wire = order_wire(asset, order)?;
            let action = json!({ "type": "order", "orders": [wire], "grouping": "na" });
            let response = scope.fetch(ACTION, exchange(action)).await?;
            let placed = action_status(&response)?;
            let mut accepted = Order::accepted(String::new(), order, now_ms());
            accepted.symbol = pair(coin(&order.symbol));
            if let Some(resting) = placed.get("resting") {
                accepted.id = text(resting, "oid")?;
            } else {
                let filled = field(placed, "filled")?;
                accepted.id = text(filled, "oid")?;
                accepted.status = OrderStatus::Filled;
                accepted.filled = decimal(filled, "totalSz")?;
                accepted.average_price = opt_decimal(filled, "avgPx");
            }
            Ok(accepted)
        }
        .await;
        scope.finish(result)
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("get_order");
        let result = self.order_status(&scope, order_id).await;
        scope.finish(result)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let result = async {
            let oid = parse_oid(order_id)?;
            let asset = self.asset(&scope, coin(symbol)).await?;
            let action = json!({ "type": "cancel", "cancels": [{ "a": asset, "o": oid }] });
            let response = scope.fetch(ACTION, exchange(action)).await?;
            action_status(&response)?;
            self.order_status(&scope, order_id).await
        }
        .await;
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let coin = coin(symbol).to_string();
        self.connector
            .call("latest_price", LIGHT_INFO, info(json!({ "type": "allMids" })), move |body| {
                let price = body
                    .get(&coin)
                    .and_then(value_decimal)
                    .ok_or_else(|| GatewayError::domain(format!("unknown asset {coin}")))?;
                Ok(PriceTick {
                    symbol: pair(&coin),
                    price,
                    timestamp: None,
                })
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let coin = coin(symbol);
        self.connector
            .call("exchange_info", INFO, info(json!({ "type": "meta" })), |meta| {
                let asset = array(&meta, "universe")?
                    .iter()
                    .find(|a| a.get("name").and_then(Value::as_str) == Some(coin))
                    .ok_or_else(|| GatewayError::domain(format!("unknown asset {coin}")))?;
                map_asset(asset)
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        self.connector
            .call("all_exchange_info", INFO, info(json!({ "type": "meta" })), |meta| {
                array(&meta, "universe")?.iter().map(map_asset).collect()
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let req = info(json!({ "type": "frontendOpenOrders", "user": self.user }));
        let wanted = symbol.map(coin);
        self.connector
            .call("open_orders", INFO, req, |body| {
                let all = list(&body, |o| map_order(o, OrderStatus::New, None))?;
                Ok(all
                    .into_iter()
                    .filter(|o| wanted.map_or(true, |c| o.symbol == pair(c)))
                    .collect())
            })
            .await
    }

    /// Fees are per account; every perp shares them.
    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let req = info(json!({ "type": "userFees", "user": self.user }));
        let symbol = pair(coin(symbol));
        self.connector
            .call("user_fee", INFO, req, move |body| {
                Ok(FeeRate {
                    symbol,
                    maker: decimal(&body, "userAddRate")?,
                    taker: decimal(&body, "userCrossRate")?,
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let Some(interval) = interval(query.interval) else {
            return self.connector.reject(
                "candles",
                GatewayError::domain(format!("interval {} not offered", query.interval.as_str())),
            );
        };
        let span = query.interval.millis() * query.limit.map_or(DEFAULT_CANDLES, u64::from);
        let end = query.end_time.unwrap_or_else(now_ms);
        let start = query.start_time.unwrap_or_else(|| end.saturating_sub(span));
        let req = info(json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin(&query.symbol),
                "interval": interval,
                "startTime": start,
                "endTime": end,
            }
        }));
        let limit = query.limit.map(|l| l as usize);
        self.connector
            .call("candles", INFO, req, move |body| {
                let mut rows = list(&body, map_candle)?;
                if let Some(limit) = limit {
                    let skip = rows.len().saturating_sub(limit);
                    rows.drain(..skip);
                }
                Ok(rows)
            })
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = match query.start_time {
            Some(start) => info(json!({
                "type": "userFillsByTime",
                "user": self.user,
                "startTime": start,
                "endTime": query.end_time,
            })),
            None => info(json!({ "type": "userFills", "user": self.user })),
        };
        let symbol = pair(coin(&query.symbol));
        let limit = query.limit.map(|l| l as usize);
        self.connector
            .call("trades", INFO, req, move |body| {
                let mut fills: Vec<Trade> = list(&body, map_fill)?
                    .into_iter()
                    .filter(|t| t.symbol == symbol)
                    .collect();
                if let Some(limit) = limit {
                    fills.truncate(limit);
                }
                Ok(fills)
            })
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        self.connector
            .call("all_prices", LIGHT_INFO, info(json!({ "type": "allMids" })), |body| {
                let mids = body
                    .as_object()
                    .ok_or_else(|| GatewayError::malformed("allMids is not an object"))?;
                Ok(mids
                    .iter()
                    // spot mids are keyed `@<index>`
                    .filter(|(coin, _)| !coin.starts_with('@'))
                    .filter_map(|(coin, px)| {
                        Some(PriceTick {
                            symbol: pair(coin),
                            price: value_decimal(px)?,
                            timestamp: None,
                        })
                    })
                    .collect())
            })
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        let scope = self.connector.scope("get_leverage");
        let coin = coin(symbol);
        let result = self
            .active_leverage(&scope, coin)
            .await
            .map(|(_, leverage)| Leverage {
                symbol: pair(coin),
                leverage,
            });
        scope.finish(result)
    }

    /// Keeps the asset's current margin mode.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Envelope<Leverage> {
        let scope = self.connector.scope("set_leverage");
        let coin = coin(symbol);
        let result = async {
            let (margin, _) = self.active_leverage(&scope, coin).await?;
            self.update_leverage(&scope, coin, margin, leverage).await?;
            Ok(Leverage {
                symbol: pair(coin),
                leverage,
            })
        }
        .await;
        scope.finish(result)
    }

    /// Margin mode travels with the leverage update, so the current
    /// leverage is read and re-sent.
    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        let scope = self.connector.scope("set_margin_type");
        let coin = coin(symbol);
        let result = async {
            let (_, leverage) = self.active_leverage(&scope, coin).await?;
            self.update_leverage(&scope, coin, margin, leverage).await?;
            Ok(margin)
        }
        .await;
        scope.finish(result)
    }

    /// Hyperliquid positions are always one-way.
    async fn get_hedge_mode(&self) -> Envelope<bool> {
        self.connector.fixed("get_hedge_mode", false)
    }

    async fn leverage_brackets(&self, symbol: Option<&str>) -> Envelope<Vec<LeverageBracket>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("leverage_brackets", e);
        }
        let wanted = symbol.map(coin);
        self.connector
            .call("leverage_brackets", INFO, info(json!({ "type": "meta" })), |meta| match wanted {
                Some(c) => map_brackets(&meta, c),
                None => {
                    let mut out = Vec::new();
                    for asset in array(&meta, "universe")? {
                        out.extend(map_brackets(&meta, &text(asset, "name")?)?);
                    }
                    Ok(out)
                }
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        let req = info(json!({ "type": "clearinghouseState", "user": self.user }));
        let wanted = symbol.map(|s| pair(coin(s)));
        self.connector
            .call("positions", LIGHT_INFO, req, |body| {
                let all = array(&body, "assetPositions")?
                    .iter()
                    .map(map_position)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(all
                    .into_iter()
                    .filter(|p| !p.quantity.is_zero())
                    .filter(|p| wanted.as_ref().map_or(true, |w| &p.symbol == w))
                    .collect())
            })
            .await
    }

    /// The account is identified by its wallet address.
    async fn account_id(&self) -> Envelope<AccountIdentity> {
        self.connector.fixed(
            "account_id",
            AccountIdentity {
                uid: self.user.clone(),
            },
        )
    }

    /// A user is an affiliate when it was referred by this account.
    async fn check_affiliate(&self, uid: &str) -> Envelope<AffiliateStatus> {
        let req = info(json!({ "type": "referral", "user": uid }));
        let me = self.user.to_lowercase();
        let uid = uid.to_string();
        self.connector
            .call("check_affiliate", INFO, req, move |body| {
                let referrer = body
                    .get("referredBy")
                    .and_then(|r| opt_text(r, "referrer"))
                    .map(|r| r.to_lowercase());
                Ok(AffiliateStatus {
                    uid,
                    is_affiliate: referrer.as_deref() == Some(me.as_str()),
                })
            })
            .await
    }

    async fn rebate_records(&self, query: &RebateQuery) -> Envelope<Vec<RebateRecord>> {
        let req = info(json!({ "type": "referral", "user": self.user }));
        let (start, end) = (query.start_time, query.end_time);
        let limit = query.limit.map(|l| l as usize);
        self.connector
            .call("rebate_records", INFO, req, move |body| {
                let states = body
                    .get("referrerState")
                    .and_then(|s| s.get("data"))
                    .and_then(|d| d.get("referralStates"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut out = Vec::new();
                for s in &states {
                    let joined = millis(s, "timeJoined")?;
                    if start.is_some_and(|t| joined < t) || end.is_some_and(|t| joined > t) {
                        continue;
                    }
                    out.push(RebateRecord {
                        uid: opt_text(s, "user"),
                        symbol: None,
                        asset: QUOTE.to_string(),
                        amount: decimal(s, "cumFeesRewardedToReferrer")?,
                        timestamp: joined,
                    });
                }
                if let Some(limit) = limit {
                    out.truncate(limit);
                }
                Ok(out)
            })
            .await
    }

    async fn rebate_overview(&self, _query: &RebateQuery) -> Envelope<RebateOverview> {
        let req = info(json!({ "type": "referral", "user": self.user }));
        self.connector
            .call("rebate_overview", INFO, req, |body| {
                let claimed = decimal_or_zero(&body, "claimedRewards");
                let unclaimed = decimal_or_zero(&body, "unclaimedRewards");
                let records = body
                    .get("referrerState")
                    .and_then(|s| s.get("data"))
                    .and_then(|d| d.get("referralStates"))
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                Ok(RebateOverview {
                    asset: QUOTE.to_string(),
                    total: claimed + unclaimed,
                    pending: Some(unclaimed),
                    records,
                })
            })
            .await
    }
}

static REGISTER: Once = Once::new();

/// Register the Hyperliquid adapter.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in HYPERLIQUID_EXCHANGES {
            let cfg_ref: &'static HyperliquidConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(HyperliquidAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
