//! Fixed-point helpers for BDT amounts.

use rust_decimal::{Decimal, RoundingStrategy};

/// Places kept on player-facing amounts
pub const MONEY_SCALE: u32 = 2;

/// Places kept on commission maths before display rounding
pub const COMMISSION_SCALE: u32 = 4;

/// Round an inbound monetary amount to two places
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a commission amount to four places
pub fn round_commission(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(COMMISSION_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `value * percent / 100`, kept at commission precision
pub fn percent_of(value: Decimal, percent: Decimal) -> Decimal {
    round_commission(value * percent / Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_money_midpoint() {
        assert_eq!(round_money(Decimal::new(10005, 3)), Decimal::new(1001, 2));
        assert_eq!(round_money(Decimal::new(-10005, 3)), Decimal::new(-1001, 2));
    }

    #[test]
    fn test_percent_of_has_no_binary_drift() {
        // 0.1 + 0.2 style inputs stay exact
        let v = Decimal::new(1, 1) + Decimal::new(2, 1);
        assert_eq!(percent_of(v, Decimal::new(10, 0)), Decimal::new(3, 2));
        assert_eq!(percent_of(Decimal::new(80, 0), Decimal::new(10, 0)), Decimal::new(8, 0));
        assert_eq!(percent_of(Decimal::new(3333, 2), Decimal::new(7, 0)), Decimal::new(23331, 4));
    }
}
