pub mod adapter;
pub mod connector;
pub mod registry;
pub mod transport;

pub use adapter::binance::{BinanceAdapter, BINANCE_EXCHANGES};
pub use adapter::bitget::{BitgetAdapter, BITGET_EXCHANGES};
pub use adapter::bybit::{BybitAdapter, BYBIT_EXCHANGES};
pub use adapter::coinbase::{CoinbaseAdapter, COINBASE_EXCHANGES};
pub use adapter::hyperliquid::{HyperliquidAdapter, HYPERLIQUID_EXCHANGES};
pub use adapter::kucoin::{KucoinAdapter, KUCOIN_EXCHANGES};
pub use adapter::okx::{OkxAdapter, OKX_EXCHANGES};
pub use adapter::ExchangeAdapter;
pub use connector::{Connector, Cost};
pub use registry::{choose, exchange_ids, get_adapter, register_adapter, AdapterFactory};
pub use transport::{AuthHeaders, Method, RestTransport, Transport, TransportRequest};
