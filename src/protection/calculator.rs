//! Pure computation of protection target prices. No I/O, no state.

use crate::exchange::types::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const HUNDRED: Decimal = dec!(100);

/// Price at which a fixed quote-currency loss is realized.
///
/// The loss amount is converted to a percentage of the position's notional
/// value, then applied to the entry price against the position's direction.
/// Returns `None` when the notional value is zero or the resulting price is
/// not positive.
pub fn compute_stop_loss(
    side: Side,
    entry_price: Decimal,
    notional_value: Decimal,
    amount_usdt: Decimal,
) -> Option<Decimal> {
    if notional_value.is_zero() {
        return None;
    }

    let percentage = amount_usdt * HUNDRED / notional_value;
    let price_delta = entry_price * percentage / HUNDRED;
    let target = match side {
        Side::Buy => entry_price - price_delta,
        Side::Sell => entry_price + price_delta,
    };

    if target <= Decimal::ZERO {
        return None;
    }
    Some(target)
}

/// Price at which a fixed percentage gain is realized.
pub fn compute_take_profit(
    side: Side,
    entry_price: Decimal,
    percentage: Decimal,
) -> Option<Decimal> {
    let price_delta = entry_price * percentage / HUNDRED;
    let target = match side {
        Side::Buy => entry_price + price_delta,
        Side::Sell => entry_price - price_delta,
    };

    if target <= Decimal::ZERO {
        return None;
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_stop_loss_moves_below_entry() {
        // 30 USDT on a 3000 USDT position is 1%, so 300 off a 30000 entry.
        let target = compute_stop_loss(Side::Buy, dec!(30000), dec!(3000), dec!(30));
        assert_eq!(target, Some(dec!(29700)));
    }

    #[test]
    fn short_stop_loss_moves_above_entry() {
        let target = compute_stop_loss(Side::Sell, dec!(30000), dec!(3000), dec!(30));
        assert_eq!(target, Some(dec!(30300)));
    }

    #[test]
    fn stop_loss_invalid_on_zero_notional_value() {
        assert_eq!(
            compute_stop_loss(Side::Buy, dec!(30000), Decimal::ZERO, dec!(30)),
            None
        );
    }

    #[test]
    fn stop_loss_invalid_when_loss_exceeds_entry() {
        // 200% of notional pushes the long stop below zero.
        assert_eq!(
            compute_stop_loss(Side::Buy, dec!(100), dec!(50), dec!(100)),
            None
        );
    }

    #[test]
    fn stop_loss_invalid_when_target_is_exactly_zero() {
        // Loss equal to the full notional lands exactly on zero.
        assert_eq!(
            compute_stop_loss(Side::Buy, dec!(100), dec!(100), dec!(100)),
            None
        );
    }

    #[test]
    fn zero_amount_stop_loss_sits_at_entry() {
        let target = compute_stop_loss(Side::Buy, dec!(30000), dec!(3000), Decimal::ZERO);
        assert_eq!(target, Some(dec!(30000)));
    }

    #[test]
    fn long_take_profit_moves_above_entry() {
        let target = compute_take_profit(Side::Buy, dec!(30000), dec!(2));
        assert_eq!(target, Some(dec!(30600)));
    }

    #[test]
    fn short_take_profit_moves_below_entry() {
        let target = compute_take_profit(Side::Sell, dec!(2000), dec!(2));
        assert_eq!(target, Some(dec!(1960)));
    }

    #[test]
    fn take_profit_invalid_when_target_not_positive() {
        // A 100% short take-profit lands exactly on zero.
        assert_eq!(compute_take_profit(Side::Sell, dec!(2000), dec!(100)), None);
        assert_eq!(compute_take_profit(Side::Sell, dec!(2000), dec!(150)), None);
        assert_eq!(compute_take_profit(Side::Buy, Decimal::ZERO, dec!(2)), None);
    }

    #[test]
    fn computation_is_exact_for_awkward_decimals() {
        // 0.1% of 0.3 must not pick up binary float noise.
        let target = compute_take_profit(Side::Buy, dec!(0.3), dec!(0.1));
        assert_eq!(target, Some(dec!(0.3003)));
    }
}
