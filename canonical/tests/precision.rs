use canonical::precision::{format_with_precision, parse_decimal, precision, round_down};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

#[test]
fn precision_from_tick_strings() {
    assert_eq!(precision("0.00025").unwrap(), 4);
    assert_eq!(precision("1e-7").unwrap(), 7);
    assert_eq!(precision("1").unwrap(), 0);
    assert_eq!(precision("0.01").unwrap(), 2);
    assert_eq!(precision("0.010000").unwrap(), 2);
    assert_eq!(precision("10").unwrap(), 0);
    assert_eq!(precision("5E-3").unwrap(), 3);
}

#[test]
fn formatting_does_not_drift() {
    let qty = parse_decimal("0.1").unwrap() + parse_decimal("0.2").unwrap();
    assert_eq!(format_with_precision(qty, 4), "0.3000");
    let price = Decimal::from_str("27123.456789").unwrap();
    assert_eq!(format_with_precision(price, 2), "27123.45");
    assert_eq!(round_down(price, 0), Decimal::from(27123));
}

proptest! {
    #[test]
    fn exponent_and_plain_forms_agree(places in 1u32..20) {
        let plain = format!("0.{}1", "0".repeat(places as usize - 1));
        let exp = format!("1e-{}", places);
        prop_assert_eq!(precision(&plain).unwrap(), places);
        prop_assert_eq!(precision(&exp).unwrap(), places);
    }

    #[test]
    fn leading_digit_sets_precision(places in 1u32..12, digit in 1u32..10) {
        let tick = format!("0.{}{}5", "0".repeat(places as usize - 1), digit);
        prop_assert_eq!(precision(&tick).unwrap(), places);
    }
}
