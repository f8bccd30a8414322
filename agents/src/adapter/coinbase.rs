use anyhow::Result;
use async_trait::async_trait;
use canonical::{
    normalize_symbol, AccountIdentity, Balance, Candle, CandleInterval, CandleQuery, FeeRate,
    MarketKind, NewOrder, Order, OrderStatus, OrderType, PriceTick, Side, SymbolInfo,
    TimeInForce, Trade, TradeQuery,
};
use chrono::{DateTime, SecondsFormat, Utc};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::{Envelope, GatewayError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    array, boolean, decimal, decimal_or_zero, field, millis, opt_decimal, opt_text, side, text,
};
use super::{venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

/// Configuration for Coinbase Advanced Trade.
pub struct CoinbaseConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
}

/// Supported Coinbase endpoints.
pub const COINBASE_EXCHANGES: &[CoinbaseConfig] = &[CoinbaseConfig {
    id: "coinbase",
    name: "Coinbase Advanced Trade",
    base_url: "https://api.coinbase.com",
}];

pub const PRIVATE: &str = "private";
pub const PUBLIC: &str = "public";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![
        LimitRule::new(PRIVATE, 30, Duration::from_secs(1)),
        LimitRule::new(PUBLIC, 10, Duration::from_secs(1)),
    ]
}

const PRIVATE_CALL: Cost = Cost::new(PRIVATE, 1);
const PUBLIC_CALL: Cost = Cost::new(PUBLIC, 1);

/// Candle requests without a range fetch this many buckets.
const DEFAULT_CANDLES: u64 = 300;

pub struct CoinbaseAdapter {
    cfg: &'static CoinbaseConfig,
    connector: Connector,
}

impl CoinbaseAdapter {
    pub fn new(cfg: &'static CoinbaseConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(base, credentials, AuthHeaders::key("CB-ACCESS-KEY"))?;
        let limiter = shared_limiter(cfg.id, limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static CoinbaseConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter),
        }
    }

    fn product_id(&self, symbol: &str) -> String {
        venue_symbol(self.cfg.id, symbol, "-")
    }

    fn order_req(&self, order_id: &str) -> TransportRequest {
        TransportRequest::get(format!("/api/v3/brokerage/orders/historical/{order_id}")).private()
    }
}

fn rfc3339_millis(v: &Value, key: &str) -> Option<u64> {
    let raw = opt_text(v, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .and_then(|t| u64::try_from(t.timestamp_millis()).ok())
}

fn rfc3339(ms: u64) -> Option<String> {
    let ms = i64::try_from(ms).ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn granularity(i: CandleInterval) -> Option<&'static str> {
    match i {
        CandleInterval::M1 => Some("ONE_MINUTE"),
        CandleInterval::M5 => Some("FIVE_MINUTE"),
        CandleInterval::M15 => Some("FIFTEEN_MINUTE"),
        CandleInterval::M30 => Some("THIRTY_MINUTE"),
        CandleInterval::H1 => Some("ONE_HOUR"),
        CandleInterval::H2 => Some("TWO_HOUR"),
        CandleInterval::H6 => Some("SIX_HOUR"),
        CandleInterval::D1 => Some("ONE_DAY"),
        _ => None,
    }
}

fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "OPEN" | "PENDING" | "QUEUED" => OrderStatus::New,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" | "CANCEL_QUEUED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        "FAILED" => OrderStatus::Rejected,
        _ => OrderStatus::Unknown,
    }
}

/// The order configuration is keyed by its kind, e.g.
/// `{"limit_limit_gtc": {"base_size": "1", "limit_price": "10"}}`.
fn configuration(v: &Value) -> Option<(&str, &Value)> {
    v.get("order_configuration")?
        .as_object()?
        .iter()
        .next()
        .map(|(k, cfg)| (k.as_str(), cfg))
}

pub fn map_order(exchange: &str, v: &Value) -> Result<Order, GatewayError> {
    let (kind, cfg) = configuration(v).ok_or_else(|| GatewayError::malformed("missing order_configuration"))?;
    let order_type = match kind {
        k if k.starts_with("market") => OrderType::Market,
        k if k.starts_with("stop_limit") => OrderType::StopLimit,
        _ => OrderType::Limit,
    };
    let filled = decimal_or_zero(v, "filled_size");
    let mut status = order_status(&text(v, "status")?);
    if status == OrderStatus::New && !filled.is_zero() {
        status = OrderStatus::PartiallyFilled;
    }
    Ok(Order {
        id: text(v, "order_id")?,
        client_order_id: opt_text(v, "client_order_id"),
        symbol: normalize_symbol(exchange, &text(v, "product_id")?),
        side: side(v, "side")?,
        order_type,
        status,
        price: opt_decimal(cfg, "limit_price"),
        quantity: opt_decimal(cfg, "base_size").unwrap_or(filled),
        filled,
        average_price: opt_decimal(v, "average_filled_price").filter(|p| !p.is_zero()),
        created_at: rfc3339_millis(v, "created_time"),
        updated_at: rfc3339_millis(v, "last_fill_time").or_else(|| rfc3339_millis(v, "created_time")),
    })
}

fn map_product(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    let trading = opt_text(v, "status").as_deref() == Some("online")
        && !boolean(v, "trading_disabled").unwrap_or(false);
    Ok(SymbolInfo::from_steps(
        normalize_symbol(exchange, &text(v, "product_id")?),
        text(v, "base_currency_id")?,
        text(v, "quote_currency_id")?,
        trading,
        opt_decimal(v, "price_increment")
            .map_or_else(|| decimal(v, "quote_increment"), Ok)?,
        decimal(v, "base_increment")?,
        opt_decimal(v, "base_min_size"),
        opt_decimal(v, "quote_min_size"),
    ))
}

fn map_price(exchange: &str, v: &Value) -> Result<PriceTick, GatewayError> {
    Ok(PriceTick {
        symbol: normalize_symbol(exchange, &text(v, "product_id")?),
        price: decimal(v, "price")?,
        timestamp: None,
    })
}

fn map_fill(exchange: &str, v: &Value) -> Result<Trade, GatewayError> {
    Ok(Trade {
        id: text(v, "trade_id").or_else(|_| text(v, "entry_id"))?,
        order_id: opt_text(v, "order_id"),
        symbol: normalize_symbol(exchange, &text(v, "product_id")?),
        side: Some(side(v, "side")?),
        price: decimal(v, "price")?,
        quantity: decimal(v, "size")?,
        fee: opt_decimal(v, "commission"),
        fee_asset: None,
        is_maker: opt_text(v, "liquidity_indicator").map(|l| l == "MAKER"),
        timestamp: rfc3339_millis(v, "trade_time")
            .ok_or_else(|| GatewayError::malformed("field trade_time is not a timestamp"))?,
    })
}

fn map_candle(v: &Value) -> Result<Candle, GatewayError> {
    Ok(Candle {
        open_time: millis(v, "start")? * 1000,
        open: decimal(v, "open")?,
        high: decimal(v, "high")?,
        low: decimal(v, "low")?,
        close: decimal(v, "close")?,
        volume: decimal(v, "volume")?,
    })
}

fn order_configuration(order: &NewOrder) -> Result<Value, GatewayError> {
    let size = order.quantity.normalize().to_string();
    let price = || {
        order
            .price
            .map(|p| p.normalize().to_string())
            .ok_or_else(|| GatewayError::domain("limit orders need a price"))
    };
    Ok(match order.order_type {
        OrderType::Market => json!({ "market_market_ioc": { "base_size": size } }),
        OrderType::Limit => match order.time_in_force.unwrap_or(TimeInForce::Gtc) {
            TimeInForce::Gtc => json!({
                "limit_limit_gtc": { "base_size": size, "limit_price": price()?, "post_only": false }
            }),
            TimeInForce::Ioc => json!({
                "sor_limit_ioc": { "base_size": size, "limit_price": price()? }
            }),
            TimeInForce::Fok => json!({
                "limit_limit_fok": { "base_size": size, "limit_price": price()? }
            }),
        },
        OrderType::StopLimit => {
            let stop = order
                .stop_price
                .ok_or_else(|| GatewayError::domain("stop orders need a stop price"))?;
            let direction = match order.side {
                Side::Buy => "STOP_DIRECTION_STOP_UP",
                Side::Sell => "STOP_DIRECTION_STOP_DOWN",
            };
            json!({
                "stop_limit_stop_limit_gtc": {
                    "base_size": size,
                    "limit_price": price()?,
                    "stop_price": stop.normalize().to_string(),
                    "stop_direction": direction,
                }
            })
        }
        OrderType::StopMarket => {
            return Err(GatewayError::domain("stop market orders are not offered"))
        }
    })
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(MarketKind::Spot)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let wanted = asset.map(str::to_uppercase);
        let req = TransportRequest::get("/api/v3/brokerage/accounts")
            .private()
            .query("limit", 250);
        self.connector
            .call("get_balance", PRIVATE_CALL, req, |body| {
                let mut out = Vec::new();
                for a in array(&body, "accounts")? {
                    let free = decimal(field(a, "available_balance")?, "value")?;
                    let locked = a
                        .get("hold")
                        .and_then(|h| opt_decimal(h, "value"))
                        .unwrap_or(Decimal::ZERO);
                    let balance = Balance {
                        asset: text(a, "currency")?,
                        free,
                        locked,
                        total: free + locked,
                    };
                    let keep = match &wanted {
                        Some(w) => &balance.asset == w,
                        None => !balance.total.is_zero(),
                    };
                    if keep {
                        out.push(balance);
                    }
                }
                Ok(out)
            })
            .await
    }

    async fn open_order(&self, order: &NewOrder) -> Envelope<Order> {
        let configuration = match order_configuration(order) {
            Ok(c) => c,
            Err(e) => return self.connector.reject("open_order", e),
        };
        let client_id = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let req = TransportRequest::post("/api/v3/brokerage/orders")
            .private()
            .body(json!({
                "client_order_id": client_id,
                "product_id": self.product_id(&order.symbol),
                "side": match order.side { Side::Buy => "BUY", Side::Sell => "SELL" },
                "order_configuration": configuration,
            }));
        let mut echoed = order.clone();
        echoed.client_order_id = Some(client_id);
        self.connector
            .call("open_order", PRIVATE_CALL, req, move |body| {
                if !boolean(&body, "success").unwrap_or(false) {
                    let failure = body.get("error_response");
                    let reason = failure
                        .and_then(|f| opt_text(f, "message").or_else(|| opt_text(f, "preview_failure_reason")))
                        .unwrap_or_else(|| "order rejected".to_string());
                    return Err(GatewayError::Domain(reason));
                }
                let accepted = field(&body, "success_response")?;
                Ok(Order::accepted(text(accepted, "order_id")?, &echoed, gateway_core::now_ms()))
            })
            .await
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> Envelope<Order> {
        let exchange = self.cfg.id;
        self.connector
            .call("get_order", PRIVATE_CALL, self.order_req(order_id), |body| {
                map_order(exchange, field(&body, "order")?)
            })
            .await
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Envelope<Order> {
        let scope = self.connector.scope("cancel_order");
        let req = TransportRequest::post("/api/v3/brokerage/orders/batch_cancel")
            .private()
            .body(json!({ "order_ids": [order_id] }));
        let exchange = self.cfg.id;
        let cancelled = scope.fetch(PRIVATE_CALL, req).await.and_then(|body| {
            let outcome = array(&body, "results")?
                .first()
                .ok_or_else(|| GatewayError::malformed("empty cancel results"))?;
            if boolean(outcome, "success").unwrap_or(false) {
                Ok(())
            } else {
                Err(GatewayError::Domain(
                    opt_text(outcome, "failure_reason").unwrap_or_else(|| "cancel rejected".to_string()),
                ))
            }
        });
        let result = match cancelled {
            Ok(()) => scope
                .fetch(PRIVATE_CALL, self.order_req(order_id))
                .await
                .and_then(|body| map_order(exchange, field(&body, "order")?)),
            Err(e) => Err(e),
        };
        scope.finish(result)
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let req = TransportRequest::get(format!("/api/v3/brokerage/products/{}", self.product_id(symbol))).private();
        let exchange = self.cfg.id;
        self.connector
            .call("latest_price", PRIVATE_CALL, req, |body| map_price(exchange, &body))
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let req = TransportRequest::get(format!("/api/v3/brokerage/products/{}", self.product_id(symbol))).private();
        let exchange = self.cfg.id;
        self.connector
            .call("exchange_info", PRIVATE_CALL, req, |body| map_product(exchange, &body))
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        let req = TransportRequest::get("/api/v3/brokerage/market/products");
        let exchange = self.cfg.id;
        self.connector
            .call("all_exchange_info", PUBLIC_CALL, req, |body| {
                array(&body, "products")?
                    .iter()
                    .map(|p| map_product(exchange, p))
                    .collect()
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let req = TransportRequest::get("/api/v3/brokerage/orders/historical/batch")
            .private()
            .query("order_status", "OPEN")
            .query_opt("product_ids", symbol.map(|s| self.product_id(s)));
        let exchange = self.cfg.id;
        self.connector
            .call("open_orders", PRIVATE_CALL, req, |body| {
                array(&body, "orders")?
                    .iter()
                    .map(|o| map_order(exchange, o))
                    .collect()
            })
            .await
    }

    /// Coinbase fees follow the account's volume tier, not the product.
    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let req = TransportRequest::get("/api/v3/brokerage/transaction_summary").private();
        let canonical = normalize_symbol(self.cfg.id, &self.product_id(symbol));
        self.connector
            .call("user_fee", PRIVATE_CALL, req, move |body| {
                let tier = field(&body, "fee_tier")?;
                Ok(FeeRate {
                    symbol: canonical,
                    maker: decimal(tier, "maker_fee_rate")?,
                    taker: decimal(tier, "taker_fee_rate")?,
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let Some(granularity) = granularity(query.interval) else {
            return self.connector.reject(
                "candles",
                GatewayError::domain(format!("interval {} not offered", query.interval.as_str())),
            );
        };
        // both bounds are mandatory and in seconds
        let span = query.interval.millis() * query.limit.map_or(DEFAULT_CANDLES, u64::from);
        let end = query.end_time.unwrap_or_else(gateway_core::now_ms);
        let start = query.start_time.unwrap_or_else(|| end.saturating_sub(span));
        let req = TransportRequest::get(format!(
            "/api/v3/brokerage/products/{}/candles",
            self.product_id(&query.symbol)
        ))
        .private()
        .query("start", start / 1000)
        .query("end", end / 1000)
        .query("granularity", granularity);
        let limit = query.limit.map(|l| l as usize);
        self.connector
            .call("candles", PRIVATE_CALL, req, move |body| {
                let mut rows = array(&body, "candles")?
                    .iter()
                    .map(map_candle)
                    .collect::<Result<Vec<_>, _>>()?;
                rows.sort_by_key(|c| c.open_time);
                if let Some(limit) = limit {
                    let skip = rows.len().saturating_sub(limit);
                    rows.drain(..skip);
                }
                Ok(rows)
            })
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = TransportRequest::get("/api/v3/brokerage/orders/historical/fills")
            .private()
            .query("product_ids", self.product_id(&query.symbol))
            .query_opt("start_sequence_timestamp", query.start_time.and_then(rfc3339))
            .query_opt("end_sequence_timestamp", query.end_time.and_then(rfc3339))
            .query_opt("limit", query.limit)
            .query_opt("cursor", query.from_id.as_deref());
        let exchange = self.cfg.id;
        self.connector
            .call("trades", PRIVATE_CALL, req, |body| {
                array(&body, "fills")?
                    .iter()
                    .map(|f| map_fill(exchange, f))
                    .collect()
            })
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        let req = TransportRequest::get("/api/v3/brokerage/market/products");
        let exchange = self.cfg.id;
        self.connector
            .call("all_prices", PUBLIC_CALL, req, |body| {
                array(&body, "products")?
                    .iter()
                    .filter(|p| opt_text(p, "price").is_some())
                    .map(|p| map_price(exchange, p))
                    .collect()
            })
            .await
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        let req = TransportRequest::get("/api/v3/brokerage/key_permissions").private();
        self.connector
            .call("account_id", PRIVATE_CALL, req, |body| {
                Ok(AccountIdentity {
                    uid: text(&body, "portfolio_uuid")?,
                })
            })
            .await
    }
}

static REGISTER: Once = Once::new();

/// Register the Coinbase adapter.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in COINBASE_EXCHANGES {
            let cfg_ref: &'static CoinbaseConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(CoinbaseAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
