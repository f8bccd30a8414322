use anyhow::Result;
use async_trait::async_trait;
use canonical::{
    normalize_symbol, AccountIdentity, AffiliateStatus, Balance, Candle, CandleQuery, FeeRate,
    Leverage, LeverageBracket, MarginType, MarketKind, NewOrder, Order, OrderStatus, OrderType,
    Position, PositionSide, PriceTick, RebateOverview, RebateQuery, RebateRecord, Side,
    SymbolInfo, TimeInForce, Trade, TradeQuery,
};
use gateway_core::config::{self, Credentials};
use gateway_core::rate_limit::{shared_limiter, LimitRule, RateLimiter};
use gateway_core::{Envelope, GatewayError};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::{Arc, Once};
use std::time::Duration;

use super::parse::{
    array, boolean, candle_row, decimal, decimal_or_zero, first, millis, opt_decimal,
    list, opt_millis, opt_text, side, text, uint,
};
use super::{accept_code, require_futures, summarize_rebates, venue_symbol, ExchangeAdapter};
use crate::connector::{Connector, Cost};
use crate::registry;
use crate::transport::{AuthHeaders, RestTransport, Transport, TransportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceApi {
    Spot,
    /// USDⓈ-M futures (`/fapi`).
    UsdM,
    /// COIN-M futures (`/dapi`).
    CoinM,
}

/// Configuration for a single Binance endpoint.
pub struct BinanceConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    pub api: BinanceApi,
    pub market: MarketKind,
}

/// All Binance endpoints supported by this adapter.
pub const BINANCE_EXCHANGES: &[BinanceConfig] = &[
    BinanceConfig {
        id: "binance",
        name: "Binance Spot",
        base_url: "https://api.binance.com",
        api: BinanceApi::Spot,
        market: MarketKind::Spot,
    },
    BinanceConfig {
        id: "binance_us",
        name: "Binance.US Spot",
        base_url: "https://api.binance.us",
        api: BinanceApi::Spot,
        market: MarketKind::Spot,
    },
    BinanceConfig {
        id: "binance_futures",
        name: "Binance USD-M Futures",
        base_url: "https://fapi.binance.com",
        api: BinanceApi::UsdM,
        market: MarketKind::LinearFutures,
    },
    BinanceConfig {
        id: "binance_delivery",
        name: "Binance COIN-M Futures",
        base_url: "https://dapi.binance.com",
        api: BinanceApi::CoinM,
        market: MarketKind::InverseFutures,
    },
];

pub const WEIGHT: &str = "weight";

pub fn limit_rules() -> Vec<LimitRule> {
    vec![LimitRule::new(WEIGHT, 1200, Duration::from_secs(60))]
}

const fn w(weight: u64) -> Cost {
    Cost::new(WEIGHT, weight)
}

/// Margin type already set.
const NO_MARGIN_CHANGE: &str = "-4046";
/// Position mode already set.
const NO_POSITION_SIDE_CHANGE: &str = "-4059";

pub struct BinanceAdapter {
    cfg: &'static BinanceConfig,
    connector: Connector,
}

impl BinanceAdapter {
    pub fn new(cfg: &'static BinanceConfig, credentials: Credentials) -> Result<Self> {
        let global = config::current();
        let base = global.base_url(cfg.id).unwrap_or(cfg.base_url);
        let transport = RestTransport::new(base, credentials, AuthHeaders::key("X-MBX-APIKEY"))?;
        let limiter = shared_limiter(cfg.id, limit_rules);
        Ok(Self::with_transport(cfg, Arc::new(transport), limiter))
    }

    pub fn with_transport(
        cfg: &'static BinanceConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            connector: Connector::new(cfg.id, transport, limiter),
        }
    }

    pub fn config(&self) -> &'static BinanceConfig {
        self.cfg
    }

    fn path(&self, spot: &str, usdm: &str, coinm: &str) -> String {
        match self.cfg.api {
            BinanceApi::Spot => spot,
            BinanceApi::UsdM => usdm,
            BinanceApi::CoinM => coinm,
        }
        .to_string()
    }

    fn symbol(&self, symbol: &str) -> String {
        let venue = venue_symbol(self.cfg.id, symbol, "");
        match self.cfg.api {
            // COIN-M perpetuals trade as BTCUSD_PERP
            BinanceApi::CoinM if !venue.contains('_') => format!("{venue}_PERP"),
            _ => venue,
        }
    }

    fn is_spot(&self) -> bool {
        self.cfg.api == BinanceApi::Spot
    }
}

fn order_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" | "PENDING_NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    }
}

fn order_type(raw: &str) -> OrderType {
    match raw {
        "MARKET" => OrderType::Market,
        "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" | "STOP" | "TAKE_PROFIT" => OrderType::StopLimit,
        "STOP_LOSS" | "STOP_MARKET" | "TAKE_PROFIT_MARKET" => OrderType::StopMarket,
        _ => OrderType::Limit,
    }
}

fn wire_order_type(api: BinanceApi, kind: OrderType) -> &'static str {
    match (api, kind) {
        (_, OrderType::Limit) => "LIMIT",
        (_, OrderType::Market) => "MARKET",
        (BinanceApi::Spot, OrderType::StopLimit) => "STOP_LOSS_LIMIT",
        (BinanceApi::Spot, OrderType::StopMarket) => "STOP_LOSS",
        (_, OrderType::StopLimit) => "STOP",
        (_, OrderType::StopMarket) => "STOP_MARKET",
    }
}

fn non_zero(d: Option<Decimal>) -> Option<Decimal> {
    d.filter(|d| !d.is_zero())
}

pub fn map_order(exchange: &str, v: &Value) -> Result<Order, GatewayError> {
    let filled = decimal_or_zero(v, "executedQty");
    let average_price = non_zero(opt_decimal(v, "avgPrice")).or_else(|| {
        let quote = opt_decimal(v, "cummulativeQuoteQty")?;
        (!filled.is_zero()).then(|| quote / filled)
    });
    Ok(Order {
        id: text(v, "orderId")?,
        client_order_id: opt_text(v, "clientOrderId"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side: side(v, "side")?,
        order_type: order_type(&text(v, "type")?),
        status: order_status(&text(v, "status")?),
        price: non_zero(opt_decimal(v, "price")),
        quantity: decimal(v, "origQty")?,
        filled,
        average_price,
        created_at: opt_millis(v, "time").or_else(|| opt_millis(v, "transactTime")),
        updated_at: opt_millis(v, "updateTime").or_else(|| opt_millis(v, "transactTime")),
    })
}

fn filter<'a>(filters: &'a [Value], kind: &str) -> Option<&'a Value> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some(kind))
}

pub fn map_symbol_info(exchange: &str, v: &Value) -> Result<SymbolInfo, GatewayError> {
    let empty = Vec::new();
    let filters = v.get("filters").and_then(Value::as_array).unwrap_or(&empty);
    let price = filter(filters, "PRICE_FILTER");
    let lot = filter(filters, "LOT_SIZE");
    let notional = filter(filters, "MIN_NOTIONAL").or_else(|| filter(filters, "NOTIONAL"));
    let status = opt_text(v, "status")
        .or_else(|| opt_text(v, "contractStatus"))
        .unwrap_or_default();
    let tick = price
        .and_then(|f| opt_decimal(f, "tickSize"))
        .ok_or_else(|| GatewayError::malformed("missing PRICE_FILTER tickSize"))?;
    let step = lot
        .and_then(|f| opt_decimal(f, "stepSize"))
        .ok_or_else(|| GatewayError::malformed("missing LOT_SIZE stepSize"))?;
    Ok(SymbolInfo::from_steps(
        normalize_symbol(exchange, &text(v, "symbol")?),
        text(v, "baseAsset")?,
        text(v, "quoteAsset")?,
        status == "TRADING",
        tick,
        step,
        lot.and_then(|f| opt_decimal(f, "minQty")),
        notional.and_then(|f| opt_decimal(f, "minNotional").or_else(|| opt_decimal(f, "notional"))),
    ))
}

fn map_price(exchange: &str, v: &Value) -> Result<PriceTick, GatewayError> {
    Ok(PriceTick {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        price: decimal(v, "price")?,
        timestamp: opt_millis(v, "time"),
    })
}

fn map_trade(exchange: &str, v: &Value) -> Result<Trade, GatewayError> {
    let side = match opt_text(v, "side") {
        Some(_) => Some(side(v, "side")?),
        None => boolean(v, "isBuyer").map(|buyer| if buyer { Side::Buy } else { Side::Sell }),
    };
    Ok(Trade {
        id: text(v, "id")?,
        order_id: opt_text(v, "orderId"),
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side,
        price: decimal(v, "price")?,
        quantity: decimal(v, "qty")?,
        fee: opt_decimal(v, "commission"),
        fee_asset: opt_text(v, "commissionAsset"),
        is_maker: boolean(v, "isMaker").or_else(|| boolean(v, "maker")),
        timestamp: millis(v, "time")?,
    })
}

fn map_position(exchange: &str, v: &Value) -> Result<Position, GatewayError> {
    let quantity = decimal(v, "positionAmt")?;
    let side = match opt_text(v, "positionSide").as_deref() {
        Some("LONG") => PositionSide::Long,
        Some("SHORT") => PositionSide::Short,
        _ => PositionSide::Both,
    };
    Ok(Position {
        symbol: normalize_symbol(exchange, &text(v, "symbol")?),
        side,
        quantity,
        entry_price: decimal(v, "entryPrice")?,
        mark_price: opt_decimal(v, "markPrice"),
        unrealized_pnl: opt_decimal(v, "unRealizedProfit"),
        leverage: uint(v, "leverage").ok(),
        margin_type: opt_text(v, "marginType").and_then(|m| m.parse().ok()),
        liquidation_price: non_zero(opt_decimal(v, "liquidationPrice")),
    })
}

fn map_brackets(exchange: &str, v: &Value) -> Result<Vec<LeverageBracket>, GatewayError> {
    let symbol = normalize_symbol(exchange, &text(v, "symbol")?);
    array(v, "brackets")?
        .iter()
        .map(|b| {
            Ok(LeverageBracket {
                symbol: symbol.clone(),
                bracket: uint(b, "bracket")?,
                initial_leverage: uint(b, "initialLeverage")?,
                notional_floor: opt_decimal(b, "notionalFloor")
                    .or_else(|| opt_decimal(b, "qtyFloor"))
                    .unwrap_or(Decimal::ZERO),
                notional_cap: opt_decimal(b, "notionalCap")
                    .or_else(|| opt_decimal(b, "qtyCap"))
                    .unwrap_or(Decimal::ZERO),
                maintenance_margin_ratio: decimal(b, "maintMarginRatio")?,
            })
        })
        .collect()
}

fn map_rebate(v: &Value) -> Result<RebateRecord, GatewayError> {
    Ok(RebateRecord {
        uid: opt_text(v, "customerId"),
        symbol: opt_text(v, "symbol"),
        asset: text(v, "asset")?,
        amount: decimal(v, "income")?,
        timestamp: millis(v, "time")?,
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn connector(&self) -> &Connector {
        &self.connector
    }

    fn market(&self) -> Option<MarketKind> {
        Some(self.cfg.market)
    }

    async fn get_balance(&self, asset: Option<&str>) -> Envelope<Vec<Balance>> {
        let wanted = asset.map(str::to_uppercase);
        if self.is_spot() {
            let req = TransportRequest::get("/api/v3/account").private();
            return self
                .connector
                .call("get_balance", w(20), req, |body| {
                    array(&body, "balances")?
                        .iter()
                        .map(|b| {
                            let free = decimal(b, "free")?;
                            let locked = decimal(b, "locked")?;
                            Ok(Balance {
                                asset: text(b, "asset")?,
                                free,
                                locked,
                                total: free + locked,
                            })
                        })
                        .filter(|b: &Result<Balance, GatewayError>| match (b, &wanted) {
                            (Ok(b), Some(a)) => &b.asset == a,
                            (Ok(b), None) => !b.total.is_zero(),
                            (Err(_), _) => true,
                        })
                        .collect()
                })
                .await;
        }
        let req = TransportRequest::get(self.path("", "/fapi/v2/balance", "/dapi/v1/balance")).private();
        self.connector
            .call("get_balance", w(5), req, |body| {
                let all = list(&body, |b| {
                    let total = decimal(b, "balance")?;
                    let free = decimal(b, "availableBalance")?;
                    Ok(Balance {
                        asset: text(b, "asset")?,
                        free,
                        locked: total - free,
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
        let client_id = order
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let side = match order.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let mut req = TransportRequest::post(self.path("/api/v3/order", "/fapi/v1/order", "/dapi/v1/order"))
            .private()
            .query("symbol", self.symbol(&order.symbol))
            .query("side", side)
            .query("type", wire_order_type(self.cfg.api, order.order_type))
            .query("quantity", order.quantity.normalize())
            .query("newClientOrderId", &client_id)
            .query_opt("price", order.price.map(|p| p.normalize()))
            .query_opt("stopPrice", order.stop_price.map(|p| p.normalize()));
        if matches!(order.order_type, OrderType::Limit | OrderType::StopLimit) {
            let tif = match order.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            };
            req = req.query("timeInForce", tif);
        }
        if order.reduce_only && !self.is_spot() {
            req = req.query("reduceOnly", "true");
        }
        if self.is_spot() {
            req = req.query("newOrderRespType", "RESULT");
        }
        let exchange = self.cfg.id;
        self.connector
            .call("open_order", w(1), req, |body| map_order(exchange, &body))
            .await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let req = TransportRequest::get(self.path("/api/v3/order", "/fapi/v1/order", "/dapi/v1/order"))
            .private()
            .query("symbol", self.symbol(symbol))
            .query("orderId", order_id);
        let exchange = self.cfg.id;
        self.connector
            .call("get_order", w(4), req, |body| map_order(exchange, &body))
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Envelope<Order> {
        let req = TransportRequest::delete(self.path("/api/v3/order", "/fapi/v1/order", "/dapi/v1/order"))
            .private()
            .query("symbol", self.symbol(symbol))
            .query("orderId", order_id);
        let exchange = self.cfg.id;
        self.connector
            .call("cancel_order", w(1), req, |body| map_order(exchange, &body))
            .await
    }

    async fn latest_price(&self, symbol: &str) -> Envelope<PriceTick> {
        let req = TransportRequest::get(self.path(
            "/api/v3/ticker/price",
            "/fapi/v1/ticker/price",
            "/dapi/v1/ticker/price",
        ))
        .query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("latest_price", w(2), req, |body| match &body {
                // COIN-M answers with a one-element array
                Value::Array(_) => map_price(exchange, first(&body, "symbol not found")?),
                _ => map_price(exchange, &body),
            })
            .await
    }

    async fn exchange_info(&self, symbol: &str) -> Envelope<SymbolInfo> {
        let venue = self.symbol(symbol);
        let mut req = TransportRequest::get(self.path(
            "/api/v3/exchangeInfo",
            "/fapi/v1/exchangeInfo",
            "/dapi/v1/exchangeInfo",
        ));
        if self.is_spot() {
            req = req.query("symbol", &venue);
        }
        let exchange = self.cfg.id;
        self.connector
            .call("exchange_info", w(20), req, |body| {
                let found = array(&body, "symbols")?
                    .iter()
                    .find(|s| s.get("symbol").and_then(Value::as_str) == Some(venue.as_str()))
                    .ok_or_else(|| GatewayError::domain(format!("unknown symbol {venue}")))?;
                map_symbol_info(exchange, found)
            })
            .await
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        let req = TransportRequest::get(self.path(
            "/api/v3/exchangeInfo",
            "/fapi/v1/exchangeInfo",
            "/dapi/v1/exchangeInfo",
        ));
        let exchange = self.cfg.id;
        self.connector
            .call("all_exchange_info", w(20), req, |body| {
                array(&body, "symbols")?
                    .iter()
                    .map(|s| map_symbol_info(exchange, s))
                    .collect()
            })
            .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Envelope<Vec<Order>> {
        let req = TransportRequest::get(self.path(
            "/api/v3/openOrders",
            "/fapi/v1/openOrders",
            "/dapi/v1/openOrders",
        ))
        .private()
        .query_opt("symbol", symbol.map(|s| self.symbol(s)));
        let weight = match (symbol.is_some(), self.is_spot()) {
            (true, true) => 6,
            (false, true) => 80,
            (true, false) => 1,
            (false, false) => 40,
        };
        let exchange = self.cfg.id;
        self.connector
            .call("open_orders", w(weight), req, |body| list(&body, |o| map_order(exchange, o)))
            .await
    }

    async fn user_fee(&self, symbol: &str) -> Envelope<FeeRate> {
        let exchange = self.cfg.id;
        if self.is_spot() {
            let req = TransportRequest::get("/sapi/v1/asset/tradeFee")
                .private()
                .query("symbol", self.symbol(symbol));
            return self
                .connector
                .call("user_fee", w(1), req, |body| {
                    let fee = first(&body, "symbol not found")?;
                    Ok(FeeRate {
                        symbol: normalize_symbol(exchange, &text(fee, "symbol")?),
                        maker: decimal(fee, "makerCommission")?,
                        taker: decimal(fee, "takerCommission")?,
                    })
                })
                .await;
        }
        let req = TransportRequest::get(self.path("", "/fapi/v1/commissionRate", "/dapi/v1/commissionRate"))
            .private()
            .query("symbol", self.symbol(symbol));
        self.connector
            .call("user_fee", w(20), req, |body| {
                Ok(FeeRate {
                    symbol: normalize_symbol(exchange, &text(&body, "symbol")?),
                    maker: decimal(&body, "makerCommissionRate")?,
                    taker: decimal(&body, "takerCommissionRate")?,
                })
            })
            .await
    }

    async fn all_user_fees(&self) -> Envelope<Vec<FeeRate>> {
        if !self.is_spot() {
            return self.connector.unsupported("all_user_fees");
        }
        let exchange = self.cfg.id;
        let req = TransportRequest::get("/sapi/v1/asset/tradeFee").private();
        self.connector
            .call("all_user_fees", w(1), req, |body| {
                list(&body, |fee| {
                    Ok(FeeRate {
                        symbol: normalize_symbol(exchange, &text(fee, "symbol")?),
                        maker: decimal(fee, "makerCommission")?,
                        taker: decimal(fee, "takerCommission")?,
                    })
                })
            })
            .await
    }

    async fn candles(&self, query: &CandleQuery) -> Envelope<Vec<Candle>> {
        let req = TransportRequest::get(self.path("/api/v3/klines", "/fapi/v1/klines", "/dapi/v1/klines"))
            .query("symbol", self.symbol(&query.symbol))
            .query("interval", query.interval.as_str())
            .query_opt("startTime", query.start_time)
            .query_opt("endTime", query.end_time)
            .query_opt("limit", query.limit);
        self.connector
            .call("candles", w(2), req, |body| list(&body, candle_row))
            .await
    }

    async fn trades(&self, query: &TradeQuery) -> Envelope<Vec<Trade>> {
        let req = TransportRequest::get(self.path(
            "/api/v3/myTrades",
            "/fapi/v1/userTrades",
            "/dapi/v1/userTrades",
        ))
        .private()
        .query("symbol", self.symbol(&query.symbol))
        .query_opt("startTime", query.start_time)
        .query_opt("endTime", query.end_time)
        .query_opt("limit", query.limit)
        .query_opt("fromId", query.from_id.as_deref());
        let exchange = self.cfg.id;
        self.connector
            .call("trades", w(20), req, |body| list(&body, |t| map_trade(exchange, t)))
            .await
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        let req = TransportRequest::get(self.path(
            "/api/v3/ticker/price",
            "/fapi/v1/ticker/price",
            "/dapi/v1/ticker/price",
        ));
        let exchange = self.cfg.id;
        self.connector
            .call("all_prices", w(4), req, |body| list(&body, |p| map_price(exchange, p)))
            .await
    }

    async fn get_leverage(&self, symbol: &str) -> Envelope<Leverage> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_leverage", e);
        }
        let req = TransportRequest::get(self.path("", "/fapi/v2/positionRisk", "/dapi/v1/positionRisk"))
            .private()
            .query("symbol", self.symbol(symbol));
        let exchange = self.cfg.id;
        self.connector
            .call("get_leverage", w(5), req, |body| {
                let pos = first(&body, "no position information")?;
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
        let req = TransportRequest::post(self.path("", "/fapi/v1/leverage", "/dapi/v1/leverage"))
            .private()
            .query("symbol", self.symbol(symbol))
            .query("leverage", leverage);
        let exchange = self.cfg.id;
        self.connector
            .call("set_leverage", w(1), req, |body| {
                Ok(Leverage {
                    symbol: normalize_symbol(exchange, &text(&body, "symbol")?),
                    leverage: uint(&body, "leverage")?,
                })
            })
            .await
    }

    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> Envelope<MarginType> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_margin_type", e);
        }
        let wire = match margin {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSSED",
        };
        let req = TransportRequest::post(self.path("", "/fapi/v1/marginType", "/dapi/v1/marginType"))
            .private()
            .query("symbol", self.symbol(symbol))
            .query("marginType", wire);
        let scope = self.connector.scope("set_margin_type");
        let result = scope.fetch(w(1), req).await.map(|_| margin);
        scope.finish(accept_code(result, NO_MARGIN_CHANGE, margin))
    }

    async fn get_hedge_mode(&self) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("get_hedge_mode", e);
        }
        let req = TransportRequest::get(self.path(
            "",
            "/fapi/v1/positionSide/dual",
            "/dapi/v1/positionSide/dual",
        ))
        .private();
        self.connector
            .call("get_hedge_mode", w(30), req, |body| {
                boolean(&body, "dualSidePosition")
                    .ok_or_else(|| GatewayError::malformed("missing dualSidePosition"))
            })
            .await
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Envelope<bool> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("set_hedge_mode", e);
        }
        let req = TransportRequest::post(self.path(
            "",
            "/fapi/v1/positionSide/dual",
            "/dapi/v1/positionSide/dual",
        ))
        .private()
        .query("dualSidePosition", enabled);
        let scope = self.connector.scope("set_hedge_mode");
        let result = scope.fetch(w(1), req).await.map(|_| enabled);
        scope.finish(accept_code(result, NO_POSITION_SIDE_CHANGE, enabled))
    }

    async fn leverage_brackets(&self, symbol: Option<&str>) -> Envelope<Vec<LeverageBracket>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("leverage_brackets", e);
        }
        let venue = symbol.map(|s| self.symbol(s));
        let req = TransportRequest::get(self.path("", "/fapi/v1/leverageBracket", "/dapi/v2/leverageBracket"))
            .private()
            .query_opt("symbol", venue.as_deref());
        let exchange = self.cfg.id;
        self.connector
            .call("leverage_brackets", w(1), req, |body| {
                // a single symbol comes back as an object on USDⓈ-M
                let rows = match body {
                    Value::Array(rows) => rows,
                    other => vec![other],
                };
                let mut out = Vec::new();
                for row in &rows {
                    out.extend(map_brackets(exchange, row)?);
                }
                Ok(out)
            })
            .await
    }

    async fn positions(&self, symbol: Option<&str>) -> Envelope<Vec<Position>> {
        if let Err(e) = require_futures(self.market()) {
            return self.connector.reject("positions", e);
        }
        let req = TransportRequest::get(self.path("", "/fapi/v2/positionRisk", "/dapi/v1/positionRisk"))
            .private()
            .query_opt("symbol", symbol.map(|s| self.symbol(s)));
        let exchange = self.cfg.id;
        self.connector
            .call("positions", w(5), req, |body| {
                let all = list(&body, |p| map_position(exchange, p))?;
                Ok(all.into_iter().filter(|p| !p.quantity.is_zero()).collect())
            })
            .await
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        if !self.is_spot() {
            return self.connector.unsupported("account_id");
        }
        let req = TransportRequest::get("/api/v3/account").private();
        self.connector
            .call("account_id", w(20), req, |body| {
                Ok(AccountIdentity {
                    uid: text(&body, "uid")?,
                })
            })
            .await
    }

    async fn check_affiliate(&self, uid: &str) -> Envelope<AffiliateStatus> {
        let path = match self.cfg.api {
            BinanceApi::Spot => "/sapi/v1/apiReferral/ifNewUser",
            BinanceApi::UsdM => "/fapi/v1/apiReferral/ifNewUser",
            BinanceApi::CoinM => return self.connector.unsupported("check_affiliate"),
        };
        let req = TransportRequest::get(path).private().query("apiAgentCode", uid);
        let uid = uid.to_string();
        self.connector
            .call("check_affiliate", w(1), req, move |body| {
                Ok(AffiliateStatus {
                    uid,
                    is_affiliate: boolean(&body, "rebateWorking").unwrap_or(false),
                })
            })
            .await
    }

    async fn rebate_records(&self, query: &RebateQuery) -> Envelope<Vec<RebateRecord>> {
        if !self.is_spot() {
            return self.connector.unsupported("rebate_records");
        }
        let req = rebate_request(query);
        self.connector
            .call("rebate_records", w(1), req, |body| list(&body, map_rebate))
            .await
    }

    async fn rebate_overview(&self, query: &RebateQuery) -> Envelope<RebateOverview> {
        if !self.is_spot() {
            return self.connector.unsupported("rebate_overview");
        }
        let req = rebate_request(query);
        self.connector
            .call("rebate_overview", w(1), req, |body| {
                let records = list(&body, map_rebate)?;
                Ok(summarize_rebates(&records, "USDT"))
            })
            .await
    }
}

fn rebate_request(query: &RebateQuery) -> TransportRequest {
    TransportRequest::get("/sapi/v1/apiReferral/rebate/recentRecord")
        .private()
        .query_opt("startTime", query.start_time)
        .query_opt("endTime", query.end_time)
        .query_opt("limit", query.limit)
}

static REGISTER: Once = Once::new();

/// Register Binance adapters for all hosts and market types.
pub fn register() {
    REGISTER.call_once(|| {
        for exch in BINANCE_EXCHANGES {
            let cfg_ref: &'static BinanceConfig = exch;
            registry::register_adapter(
                cfg_ref.id,
                Arc::new(move |credentials: Credentials| {
                    let adapter: Arc<dyn ExchangeAdapter> =
                        Arc::new(BinanceAdapter::new(cfg_ref, credentials)?);
                    Ok(adapter)
                }),
            );
        }
    });
}
