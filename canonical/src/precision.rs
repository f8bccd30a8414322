use anyhow::{anyhow, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Parse a decimal string in plain (`0.00025`) or exponential (`1e-7`)
/// notation.
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("empty decimal string"));
    }
    if raw.contains(['e', 'E']) {
        return Decimal::from_scientific(raw)
            .map_err(|e| anyhow!("invalid decimal {}: {}", raw, e));
    }
    Decimal::from_str(raw).map_err(|e| anyhow!("invalid decimal {}: {}", raw, e))
}

/// Number of decimal places implied by a tick or step size.
///
/// The result is the position of the first non-zero fractional digit, so
/// `"0.00025"` yields 4, `"1e-7"` yields 7 and anything `>= 1` yields 0.
pub fn precision(tick: &str) -> Result<u32> {
    let tick = parse_decimal(tick)?;
    precision_of(tick).ok_or_else(|| anyhow!("tick size must be positive"))
}

pub fn precision_of(tick: Decimal) -> Option<u32> {
    if tick <= Decimal::ZERO {
        return None;
    }
    let ten = Decimal::TEN;
    let mut value = tick.normalize();
    let mut places = 0;
    while value < Decimal::ONE {
        value *= ten;
        places += 1;
    }
    Some(places)
}

/// Tick size for a number of decimal places, e.g. 3 -> 0.001.
pub fn tick_from_places(places: u32) -> Decimal {
    Decimal::new(1, places.min(28))
}

/// Truncate `value` to `places` decimals.
pub fn round_down(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::ToZero)
}

/// Largest multiple of `step` not above `value`.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Format `value` with exactly `places` decimals after truncation.
pub fn format_with_precision(value: Decimal, places: u32) -> String {
    let rounded = round_down(value, places);
    format!("{:.*}", places as usize, rounded)
}
