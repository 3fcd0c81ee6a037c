//! # Redemption Math
//!
//! A redemption swaps bUSD 1:1 (at the oracle price) for collateral, starting at the weakest
//! trove that is still above the MCR. The gas reserve of a trove is never redeemed: a trove left
//! with only its reserve is closed instead.

use scrypto::prelude::*;

/// The part of a single trove consumed by a redemption.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq)]
pub struct RedemptionLot {
    pub debt_lot: Decimal,
    pub collateral_lot: Decimal,
    pub new_debt: Decimal,
    pub new_collateral: Decimal,
}

impl RedemptionLot {
    /// Whether the trove is left with nothing but its gas reserve.
    pub fn is_full(&self, gas_compensation: Decimal) -> bool {
        self.new_debt <= gas_compensation
    }
}

/// Redeems up to `remaining` bUSD from a trove with `entire_debt` and `entire_collateral`.
pub fn redemption_lot(
    remaining: Decimal,
    entire_debt: Decimal,
    entire_collateral: Decimal,
    gas_compensation: Decimal,
    price: Decimal,
) -> RedemptionLot {
    let redeemable = (entire_debt - gas_compensation).max(Decimal::ZERO);
    let debt_lot = remaining.min(redeemable);
    let collateral_lot = (debt_lot / price).min(entire_collateral);

    RedemptionLot {
        debt_lot,
        collateral_lot,
        new_debt: entire_debt - debt_lot,
        new_collateral: entire_collateral - collateral_lot,
    }
}

/// Asserts that the user's maximum fee lies between the fee floor and 100%.
pub fn require_valid_max_fee(max_fee_percentage: Decimal, redemption_fee_floor: Decimal) {
    assert!(
        max_fee_percentage >= redemption_fee_floor && max_fee_percentage <= Decimal::ONE,
        "Max fee percentage must be between 0.5% and 100%"
    );
}

/// The collateral fee for a redemption drawing `collateral_drawn`.
///
/// # Panics
/// * If the fee would take all of the drawn collateral.
pub fn redemption_fee(redemption_rate: Decimal, collateral_drawn: Decimal) -> Decimal {
    let fee = redemption_rate * collateral_drawn;
    assert!(fee < collateral_drawn, "Fee would eat up all returned collateral");
    fee
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_lot_keeps_trove_open() {
        let lot = redemption_lot(dec!(1000), dec!(3000), dec!(40), dec!(200), dec!(100));
        assert_eq!(lot.debt_lot, dec!(1000));
        assert_eq!(lot.collateral_lot, dec!(10));
        assert_eq!(lot.new_debt, dec!(2000));
        assert_eq!(lot.new_collateral, dec!(30));
        assert!(!lot.is_full(dec!(200)));
    }

    #[test]
    fn gas_reserve_is_never_redeemed() {
        let lot = redemption_lot(dec!(5000), dec!(3000), dec!(40), dec!(200), dec!(100));
        assert_eq!(lot.debt_lot, dec!(2800));
        assert_eq!(lot.new_debt, dec!(200));
        assert_eq!(lot.new_collateral, dec!(12));
        assert!(lot.is_full(dec!(200)));
    }

    #[test]
    #[should_panic(expected = "Max fee percentage must be between 0.5% and 100%")]
    fn max_fee_below_floor_panics() {
        require_valid_max_fee(dec!("0.004"), dec!("0.005"));
    }

    #[test]
    #[should_panic(expected = "Fee would eat up all returned collateral")]
    fn fee_of_all_collateral_panics() {
        redemption_fee(Decimal::ONE, dec!(10));
    }

    #[test]
    fn fee_is_rate_times_collateral() {
        assert_eq!(redemption_fee(dec!("0.01"), dec!(50)), dec!("0.5"));
    }
}
