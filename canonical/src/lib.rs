use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod precision;
pub mod symbol;

pub use precision::{format_with_precision, parse_decimal, precision, round_down, round_to_step};
pub use symbol::{normalize_symbol, Pair};

/// Market an adapter is bound to. Adapters built without one only serve
/// account-wide operations.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Spot,
    LinearFutures,
    InverseFutures,
}

impl MarketKind {
    pub fn is_futures(self) -> bool {
        !matches!(self, MarketKind::Spot)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" | "long" => Ok(Side::Buy),
            "sell" | "s" | "a" | "ask" | "short" => Ok(Side::Sell),
            other => Err(anyhow::anyhow!("unknown side {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl NewOrder {
    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            client_order_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
}

impl Order {
    /// Order echoed back from a placement that only returned identifiers.
    pub fn accepted(id: String, request: &NewOrder, now_ms: u64) -> Self {
        Self {
            id,
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::New,
            price: request.price,
            quantity: request.quantity,
            filled: Decimal::ZERO,
            average_price: None,
            created_at: Some(now_ms),
            updated_at: Some(now_ms),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub trading: bool,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub min_quantity: Option<Decimal>,
    pub min_notional: Option<Decimal>,
    pub max_leverage: Option<u32>,
}

impl SymbolInfo {
    /// Build from tick and step sizes, deriving both precisions.
    #[allow(clippy::too_many_arguments)]
    pub fn from_steps(
        symbol: String,
        base: String,
        quote: String,
        trading: bool,
        tick_size: Decimal,
        step_size: Decimal,
        min_quantity: Option<Decimal>,
        min_notional: Option<Decimal>,
    ) -> Self {
        Self {
            symbol,
            base,
            quote,
            trading,
            price_precision: precision::precision_of(tick_size).unwrap_or(0),
            quantity_precision: precision::precision_of(step_size).unwrap_or(0),
            tick_size: tick_size.normalize(),
            step_size: step_size.normalize(),
            min_quantity,
            min_notional,
            max_leverage: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeeRate {
    pub symbol: String,
    pub maker: Decimal,
    pub taker: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 12] = [
        CandleInterval::M1,
        CandleInterval::M3,
        CandleInterval::M5,
        CandleInterval::M15,
        CandleInterval::M30,
        CandleInterval::H1,
        CandleInterval::H2,
        CandleInterval::H4,
        CandleInterval::H6,
        CandleInterval::H12,
        CandleInterval::D1,
        CandleInterval::W1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CandleInterval::M1 => "1m",
            CandleInterval::M3 => "3m",
            CandleInterval::M5 => "5m",
            CandleInterval::M15 => "15m",
            CandleInterval::M30 => "30m",
            CandleInterval::H1 => "1h",
            CandleInterval::H2 => "2h",
            CandleInterval::H4 => "4h",
            CandleInterval::H6 => "6h",
            CandleInterval::H12 => "12h",
            CandleInterval::D1 => "1d",
            CandleInterval::W1 => "1w",
        }
    }

    pub fn minutes(self) -> u64 {
        match self {
            CandleInterval::M1 => 1,
            CandleInterval::M3 => 3,
            CandleInterval::M5 => 5,
            CandleInterval::M15 => 15,
            CandleInterval::M30 => 30,
            CandleInterval::H1 => 60,
            CandleInterval::H2 => 120,
            CandleInterval::H4 => 240,
            CandleInterval::H6 => 360,
            CandleInterval::H12 => 720,
            CandleInterval::D1 => 1440,
            CandleInterval::W1 => 10080,
        }
    }

    pub fn millis(self) -> u64 {
        self.minutes() * 60_000
    }
}

impl FromStr for CandleInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandleInterval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown candle interval {}", s))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandleQuery {
    pub symbol: String,
    pub interval: CandleInterval,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TradeQuery {
    pub symbol: String,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Exchange pagination cursor (trade id or opaque token).
    #[serde(default)]
    pub from_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Option<Side>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub is_maker: Option<bool>,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Leverage {
    pub symbol: String,
    pub leverage: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Isolated,
    Cross,
}

impl FromStr for MarginType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "isolated" => Ok(MarginType::Isolated),
            "cross" | "crossed" => Ok(MarginType::Cross),
            other => Err(anyhow::anyhow!("unknown margin type {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeverageBracket {
    pub symbol: String,
    pub bracket: u32,
    pub initial_leverage: u32,
    pub notional_floor: Decimal,
    pub notional_cap: Decimal,
    pub maintenance_margin_ratio: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Signed size: positive long, negative short.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub leverage: Option<u32>,
    pub margin_type: Option<MarginType>,
    pub liquidation_price: Option<Decimal>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountIdentity {
    pub uid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateStatus {
    pub uid: String,
    pub is_affiliate: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RebateQuery {
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RebateRecord {
    pub uid: Option<String>,
    pub symbol: Option<String>,
    pub asset: String,
    pub amount: Decimal,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RebateOverview {
    pub asset: String,
    pub total: Decimal,
    pub pending: Option<Decimal>,
    pub records: usize,
}
