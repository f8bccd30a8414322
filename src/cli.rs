//! Command line front end: pick an exchange, run one operation, print the
//! envelope as JSON.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use agents::registry::{choose, exchange_ids};
use agents::ExchangeAdapter;
use canonical::{
    CandleInterval, CandleQuery, MarginType, NewOrder, OrderType, RebateQuery, Side, TimeInForce,
    TradeQuery,
};
use gateway_core::config::{self, Config, Credentials};
use gateway_core::Envelope;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Uniform REST access to crypto exchange accounts and markets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Exchange id, e.g. `binance_futures` or `okx`.
    #[arg(short, long, global = true)]
    pub exchange: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered exchange ids
    Exchanges,
    Balance {
        #[arg(long)]
        asset: Option<String>,
    },
    /// Place an order; limit when --price is given, market otherwise
    Open {
        symbol: String,
        side: Side,
        quantity: Decimal,
        #[arg(long)]
        price: Option<Decimal>,
        /// Trigger price; turns the order into a stop order
        #[arg(long)]
        stop: Option<Decimal>,
        #[arg(long, value_parser = parse_tif)]
        tif: Option<TimeInForce>,
        #[arg(long)]
        reduce_only: bool,
        #[arg(long)]
        client_id: Option<String>,
    },
    Order {
        symbol: String,
        id: String,
    },
    Cancel {
        symbol: String,
        id: String,
    },
    Price {
        symbol: String,
    },
    Prices,
    /// Symbol rules; every symbol when none is given
    Info {
        symbol: Option<String>,
    },
    OpenOrders {
        #[arg(long)]
        symbol: Option<String>,
        /// Only report how many orders are open
        #[arg(long)]
        count: bool,
    },
    /// Trading fees; every symbol when none is given
    Fee {
        symbol: Option<String>,
    },
    Candles {
        symbol: String,
        interval: CandleInterval,
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Trades {
        symbol: String,
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        from_id: Option<String>,
    },
    /// Read the leverage, or change it with --set
    Leverage {
        symbol: String,
        #[arg(long)]
        set: Option<u32>,
    },
    Margin {
        symbol: String,
        mode: MarginType,
    },
    /// Read the position mode, or change it with --set
    Hedge {
        #[arg(long)]
        set: Option<bool>,
    },
    Brackets {
        symbol: Option<String>,
    },
    Positions {
        symbol: Option<String>,
    },
    Account,
    Affiliate {
        uid: String,
    },
    Rebates {
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
        #[arg(long)]
        limit: Option<u32>,
        /// Summarize instead of listing records
        #[arg(long)]
        overview: bool,
    },
}

fn parse_tif(raw: &str) -> Result<TimeInForce> {
    match raw.to_ascii_lowercase().as_str() {
        "gtc" => Ok(TimeInForce::Gtc),
        "ioc" => Ok(TimeInForce::Ioc),
        "fok" => Ok(TimeInForce::Fok),
        other => Err(anyhow!("unknown time in force {other}")),
    }
}

/// Printed result of one command.
#[derive(Debug)]
pub struct Outcome {
    pub ok: bool,
    pub body: Value,
}

fn outcome<T: Serialize>(envelope: Envelope<T>) -> Result<Outcome> {
    Ok(Outcome {
        ok: envelope.is_ok(),
        body: serde_json::to_value(&envelope)?,
    })
}

/// Order described by the `open` arguments.
pub fn new_order(
    symbol: String,
    side: Side,
    quantity: Decimal,
    price: Option<Decimal>,
    stop: Option<Decimal>,
) -> NewOrder {
    let order_type = match (price, stop) {
        (Some(_), Some(_)) => OrderType::StopLimit,
        (None, Some(_)) => OrderType::StopMarket,
        (Some(_), None) => OrderType::Limit,
        (None, None) => OrderType::Market,
    };
    NewOrder {
        symbol,
        side,
        order_type,
        quantity,
        price,
        stop_price: stop,
        time_in_force: price.map(|_| TimeInForce::Gtc),
        reduce_only: false,
        client_order_id: None,
    }
}

/// Adapter for `exchange`; unknown ids are a configuration error.
pub fn build_adapter(exchange: &str, credentials: Credentials) -> Result<Arc<dyn ExchangeAdapter>> {
    let factory = choose(exchange).ok_or_else(|| {
        anyhow!(
            "unknown exchange {exchange}; known: {}",
            exchange_ids().join(", ")
        )
    })?;
    factory(credentials)
}

/// Install the pair aliases named in the configuration, if any.
pub fn load_symbol_aliases(cfg: &Config) -> Result<()> {
    if let Some(path) = &cfg.symbol_aliases_file {
        canonical::symbol::load_from_path(path)
            .with_context(|| format!("loading symbol aliases from {path}"))?;
        info!(path = %path, "loaded symbol aliases");
    }
    Ok(())
}

fn credentials() -> Credentials {
    match config::load_credentials() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "no credentials configured, private calls will be rejected");
            Credentials::default()
        }
    }
}

pub async fn run(cli: Cli) -> Result<Outcome> {
    if let Command::Exchanges = cli.command {
        return Ok(Outcome {
            ok: true,
            body: serde_json::to_value(exchange_ids())?,
        });
    }
    let exchange = cli
        .exchange
        .as_deref()
        .ok_or_else(|| anyhow!("--exchange is required"))?;
    let adapter = build_adapter(exchange, credentials())?;
    info!(exchange = adapter.exchange(), command = ?cli.command, "running");
    execute(adapter.as_ref(), cli.command).await
}

/// Run `command` against `adapter`.
pub async fn execute(adapter: &dyn ExchangeAdapter, command: Command) -> Result<Outcome> {
    match command {
        Command::Exchanges => Ok(Outcome {
            ok: true,
            body: serde_json::to_value(exchange_ids())?,
        }),
        Command::Balance { asset } => outcome(adapter.get_balance(asset.as_deref()).await),
        Command::Open {
            symbol,
            side,
            quantity,
            price,
            stop,
            tif,
            reduce_only,
            client_id,
        } => {
            let mut order = new_order(symbol, side, quantity, price, stop);
            if tif.is_some() {
                order.time_in_force = tif;
            }
            order.reduce_only = reduce_only;
            order.client_order_id = client_id;
            outcome(adapter.open_order(&order).await)
        }
        Command::Order { symbol, id } => outcome(adapter.get_order(&symbol, &id).await),
        Command::Cancel { symbol, id } => outcome(adapter.cancel_order(&symbol, &id).await),
        Command::Price { symbol } => outcome(adapter.latest_price(&symbol).await),
        Command::Prices => outcome(adapter.all_prices().await),
        Command::Info { symbol: Some(s) } => outcome(adapter.exchange_info(&s).await),
        Command::Info { symbol: None } => outcome(adapter.all_exchange_info().await),
        Command::OpenOrders { symbol, count: true } => {
            outcome(adapter.open_orders_count(symbol.as_deref()).await)
        }
        Command::OpenOrders { symbol, count: false } => {
            outcome(adapter.open_orders(symbol.as_deref()).await)
        }
        Command::Fee { symbol: Some(s) } => outcome(adapter.user_fee(&s).await),
        Command::Fee { symbol: None } => outcome(adapter.all_user_fees().await),
        Command::Candles {
            symbol,
            interval,
            start,
            end,
            limit,
        } => {
            let query = CandleQuery {
                symbol,
                interval,
                start_time: start,
                end_time: end,
                limit,
            };
            outcome(adapter.candles(&query).await)
        }
        Command::Trades {
            symbol,
            start,
            end,
            limit,
            from_id,
        } => {
            let query = TradeQuery {
                symbol,
                start_time: start,
                end_time: end,
                limit,
                from_id,
            };
            outcome(adapter.trades(&query).await)
        }
        Command::Leverage { symbol, set: Some(l) } => outcome(adapter.set_leverage(&symbol, l).await),
        Command::Leverage { symbol, set: None } => outcome(adapter.get_leverage(&symbol).await),
        Command::Margin { symbol, mode } => outcome(adapter.set_margin_type(&symbol, mode).await),
        Command::Hedge { set: Some(on) } => outcome(adapter.set_hedge_mode(on).await),
        Command::Hedge { set: None } => outcome(adapter.get_hedge_mode().await),
        Command::Brackets { symbol } => outcome(adapter.leverage_brackets(symbol.as_deref()).await),
        Command::Positions { symbol } => outcome(adapter.positions(symbol.as_deref()).await),
        Command::Account => outcome(adapter.account_id().await),
        Command::Affiliate { uid } => outcome(adapter.check_affiliate(&uid).await),
        Command::Rebates {
            start,
            end,
            limit,
            overview,
        } => {
            let query = RebateQuery {
                start_time: start,
                end_time: end,
                limit,
            };
            if overview {
                outcome(adapter.rebate_overview(&query).await)
            } else {
                outcome(adapter.rebate_records(&query).await)
            }
        }
    }
}
