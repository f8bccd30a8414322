use async_trait::async_trait;
use canonical::symbol::{exchange_alias, Pair};
use canonical::{
    AccountIdentity, AffiliateStatus, Balance, Candle, CandleQuery, FeeRate, Leverage,
    LeverageBracket, MarginType, MarketKind, NewOrder, Order, Position, PriceTick, RebateOverview,
    RebateQuery, RebateRecord, SymbolInfo, Trade, TradeQuery,
};
use gateway_core::{Envelope, GatewayError, Usage};

use crate::connector::Connector;

pub mod parse;

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod coinbase;
pub mod hyperliquid;
pub mod kucoin;
pub mod okx;

/// Capability contract every exchange adapter implements.
///
/// Each operation resolves to exactly one [`Envelope`]. The provided
/// implementations answer "method not supported", or "futures type missing"
/// for derivatives operations on an adapter not bound to a futures market;
/// adapters override what their venue offers.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn connector(&self) -> &Connector;

    fn market(&self) -> Option<MarketKind>;

    fn exchange(&self) -> &str {
        self.connector().name()
    }

    /// Current rate-limit consumption, one entry per limit type.
    fn usage(&self) -> Usage {
        self.connector().usage()
    }

    async fn get_balance(&self, _asset: Option<&str>) -> Envelope<Vec<Balance>> {
        self.connector().unsupported("get_balance")
    }

    async fn open_order(&self, _order: &NewOrder) -> Envelope<Order> {
        self.connector().unsupported("open_order")
    }

    async fn get_order(&self, _symbol: &str, _order_id: &str) -> Envelope<Order> {
        self.connector().unsupported("get_order")
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Envelope<Order> {
        self.connector().unsupported("cancel_order")
    }

    async fn latest_price(&self, _symbol: &str) -> Envelope<PriceTick> {
        self.connector().unsupported("latest_price")
    }

    async fn exchange_info(&self, _symbol: &str) -> Envelope<SymbolInfo> {
        self.connector().unsupported("exchange_info")
    }

    async fn all_exchange_info(&self) -> Envelope<Vec<SymbolInfo>> {
        self.connector().unsupported("all_exchange_info")
    }

    async fn open_orders(&self, _symbol: Option<&str>) -> Envelope<Vec<Order>> {
        self.connector().unsupported("open_orders")
    }

    async fn open_orders_count(&self, symbol: Option<&str>) -> Envelope<usize> {
        self.open_orders(symbol).await.map(|orders| orders.len())
    }

    async fn user_fee(&self, _symbol: &str) -> Envelope<FeeRate> {
        self.connector().unsupported("user_fee")
    }

    async fn all_user_fees(&self) -> Envelope<Vec<FeeRate>> {
        self.connector().unsupported("all_user_fees")
    }

    async fn candles(&self, _query: &CandleQuery) -> Envelope<Vec<Candle>> {
        self.connector().unsupported("candles")
    }

    async fn trades(&self, _query: &TradeQuery) -> Envelope<Vec<Trade>> {
        self.connector().unsupported("trades")
    }

    async fn all_prices(&self) -> Envelope<Vec<PriceTick>> {
        self.connector().unsupported("all_prices")
    }

    async fn get_leverage(&self, _symbol: &str) -> Envelope<Leverage> {
        futures_default(self.connector(), self.market(), "get_leverage")
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Envelope<Leverage> {
        futures_default(self.connector(), self.market(), "set_leverage")
    }

    async fn set_margin_type(&self, _symbol: &str, _margin: MarginType) -> Envelope<MarginType> {
        futures_default(self.connector(), self.market(), "set_margin_type")
    }

    async fn get_hedge_mode(&self) -> Envelope<bool> {
        futures_default(self.connector(), self.market(), "get_hedge_mode")
    }

    async fn set_hedge_mode(&self, _enabled: bool) -> Envelope<bool> {
        futures_default(self.connector(), self.market(), "set_hedge_mode")
    }

    async fn leverage_brackets(&self, _symbol: Option<&str>) -> Envelope<Vec<LeverageBracket>> {
        futures_default(self.connector(), self.market(), "leverage_brackets")
    }

    async fn positions(&self, _symbol: Option<&str>) -> Envelope<Vec<Position>> {
        futures_default(self.connector(), self.market(), "positions")
    }

    async fn account_id(&self) -> Envelope<AccountIdentity> {
        self.connector().unsupported("account_id")
    }

    async fn check_affiliate(&self, _uid: &str) -> Envelope<AffiliateStatus> {
        self.connector().unsupported("check_affiliate")
    }

    async fn rebate_records(&self, _query: &RebateQuery) -> Envelope<Vec<RebateRecord>> {
        self.connector().unsupported("rebate_records")
    }

    async fn rebate_overview(&self, _query: &RebateQuery) -> Envelope<RebateOverview> {
        self.connector().unsupported("rebate_overview")
    }
}

fn futures_default<T>(connector: &Connector, market: Option<MarketKind>, op: &'static str) -> Envelope<T> {
    match require_futures(market) {
        Ok(_) => connector.unsupported(op),
        Err(e) => connector.reject(op, e),
    }
}

/// Futures market of the adapter, or "futures type missing".
pub fn require_futures(market: Option<MarketKind>) -> Result<MarketKind, GatewayError> {
    match market {
        Some(kind) if kind.is_futures() => Ok(kind),
        _ => Err(GatewayError::FuturesTypeMissing),
    }
}

/// Exchange spelling of a pair: a configured alias when one exists, else
/// base and quote joined by `sep`. Unparsable input is passed through.
pub fn venue_symbol(exchange: &str, symbol: &str, sep: &str) -> String {
    match Pair::parse(symbol) {
        Ok(pair) => exchange_alias(exchange, &pair).unwrap_or_else(|| pair.joined(sep)),
        Err(_) => symbol.to_string(),
    }
}

/// Sum of a rebate record list, as an overview in the first record's asset.
pub fn summarize_rebates(records: &[RebateRecord], default_asset: &str) -> RebateOverview {
    RebateOverview {
        asset: records
            .first()
            .map(|r| r.asset.clone())
            .unwrap_or_else(|| default_asset.to_string()),
        total: records.iter().map(|r| r.amount).sum(),
        pending: None,
        records: records.len(),
    }
}

/// Treat a specific exchange error code as an idempotent success.
pub fn accept_code<T>(result: Result<T, GatewayError>, code: &str, value: T) -> Result<T, GatewayError> {
    match result {
        Err(GatewayError::Call(failure))
            if failure.error.as_ref().and_then(|e| e.code.as_deref()) == Some(code) =>
        {
            Ok(value)
        }
        other => other,
    }
}
