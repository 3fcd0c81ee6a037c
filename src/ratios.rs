//! # Collateral Ratios
//!
//! Collateral ratio helpers shared by the ledger, the sorted list, the liquidation logic and the
//! redemption walk.
//!
//! Two ratios are kept strictly apart:
//! - **NICR** (nominal collateral ratio) is price independent and only used to order troves.
//! - **ICR** (individual collateral ratio) uses the oracle price and decides liquidations,
//!   redemptions and recovery mode. The system wide variant of the ICR is the **TCR**.

use scrypto::prelude::*;

/// Returns the nominal collateral ratio `collateral * 100 / debt`.
///
/// A trove without debt ranks above everything else, so `Decimal::MAX` is returned.
pub fn nominal_ratio(collateral: Decimal, debt: Decimal) -> Decimal {
    if debt > Decimal::ZERO {
        collateral * dec!(100) / debt
    } else {
        Decimal::MAX
    }
}

/// Returns the collateral ratio `collateral * price / debt`.
///
/// A price of zero yields a ratio of zero. Zero debt yields `Decimal::MAX`.
pub fn collateral_ratio(collateral: Decimal, debt: Decimal, price: Decimal) -> Decimal {
    if debt > Decimal::ZERO {
        collateral * price / debt
    } else {
        Decimal::MAX
    }
}

/// Collateral ratio of the system after a hypothetical change of its collateral and debt.
///
/// # Arguments
/// * `total_collateral`: Collateral currently held by the system (active and pending redistribution).
/// * `total_debt`: Debt currently owed to the system.
/// * `collateral_change`: Absolute collateral change.
/// * `is_collateral_increase`: Direction of the collateral change.
/// * `debt_change`: Absolute debt change.
/// * `is_debt_increase`: Direction of the debt change.
/// * `price`: Oracle price of the collateral.
pub fn new_total_ratio(
    total_collateral: Decimal,
    total_debt: Decimal,
    collateral_change: Decimal,
    is_collateral_increase: bool,
    debt_change: Decimal,
    is_debt_increase: bool,
    price: Decimal,
) -> Decimal {
    let collateral = if is_collateral_increase {
        total_collateral + collateral_change
    } else {
        total_collateral - collateral_change
    };
    let debt = if is_debt_increase {
        total_debt + debt_change
    } else {
        total_debt - debt_change
    };

    collateral_ratio(collateral, debt, price)
}

/// The smallest positive `PreciseDecimal`, used to bias rounding in the protocol's favor.
pub fn precision_unit() -> PreciseDecimal {
    pdec!("0.000000000000000000000000000000000001")
}

/// Truncates a `PreciseDecimal` toward zero into a `Decimal`.
///
/// # Panics
/// * If the value does not fit into a `Decimal`.
pub fn to_decimal(value: PreciseDecimal) -> Decimal {
    value
        .checked_truncate(RoundingMode::ToZero)
        .expect("Value does not fit into a Decimal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_ratio_ignores_price() {
        assert_eq!(nominal_ratio(dec!(10), dec!(2000)), dec!("0.5"));
        assert_eq!(nominal_ratio(dec!(10), Decimal::ZERO), Decimal::MAX);
    }

    #[test]
    fn collateral_ratio_uses_price() {
        assert_eq!(collateral_ratio(dec!(10), dec!(500), dec!(100)), dec!(2));
        assert_eq!(collateral_ratio(dec!(10), dec!(500), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(collateral_ratio(dec!(10), Decimal::ZERO, dec!(100)), Decimal::MAX);
    }

    #[test]
    fn new_total_ratio_applies_both_changes() {
        let tcr = new_total_ratio(dec!(100), dec!(5000), dec!(10), false, dec!(1000), true, dec!(100));
        assert_eq!(tcr, dec!(1.5));
    }

    #[test]
    fn to_decimal_truncates() {
        let value = PreciseDecimal::from(dec!("1.5")) + precision_unit();
        assert_eq!(to_decimal(value), dec!("1.5"));
    }
}
