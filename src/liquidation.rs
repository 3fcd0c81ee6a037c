//! # Liquidation Math
//!
//! Decides how a liquidated trove's debt and collateral are split between the stability pool,
//! redistribution to other troves, the liquidator and the trove owner.
//!
//! The liquidator always receives the trove's bUSD gas reserve, and a percentage of the
//! collateral being liquidated unless the trove is under water in recovery mode. The stability pool
//! absorbs as much debt as it holds; the rest is redistributed.

use scrypto::prelude::*;

/// Outcome of liquidating a single trove.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct LiquidationValues {
    pub entire_debt: Decimal,
    pub entire_collateral: Decimal,
    pub collateral_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
    pub debt_to_offset: Decimal,
    pub collateral_to_send_to_pool: Decimal,
    pub debt_to_redistribute: Decimal,
    pub collateral_to_redistribute: Decimal,
    /// Collateral returned to the trove owner after a capped liquidation.
    pub collateral_surplus: Decimal,
}

impl LiquidationValues {
    pub fn zero() -> Self {
        Self {
            entire_debt: Decimal::ZERO,
            entire_collateral: Decimal::ZERO,
            collateral_gas_compensation: Decimal::ZERO,
            debt_gas_compensation: Decimal::ZERO,
            debt_to_offset: Decimal::ZERO,
            collateral_to_send_to_pool: Decimal::ZERO,
            debt_to_redistribute: Decimal::ZERO,
            collateral_to_redistribute: Decimal::ZERO,
            collateral_surplus: Decimal::ZERO,
        }
    }
}

/// Sum of the values of every trove liquidated in one call.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct LiquidationTotals {
    pub troves_liquidated: u64,
    pub values: LiquidationValues,
}

impl LiquidationTotals {
    pub fn new() -> Self {
        Self {
            troves_liquidated: 0,
            values: LiquidationValues::zero(),
        }
    }

    pub fn add(&mut self, single: &LiquidationValues) {
        let totals = &mut self.values;
        totals.entire_debt += single.entire_debt;
        totals.entire_collateral += single.entire_collateral;
        totals.collateral_gas_compensation += single.collateral_gas_compensation;
        totals.debt_gas_compensation += single.debt_gas_compensation;
        totals.debt_to_offset += single.debt_to_offset;
        totals.collateral_to_send_to_pool += single.collateral_to_send_to_pool;
        totals.debt_to_redistribute += single.debt_to_redistribute;
        totals.collateral_to_redistribute += single.collateral_to_redistribute;
        totals.collateral_surplus += single.collateral_surplus;
        self.troves_liquidated += 1;
    }
}

impl Default for LiquidationTotals {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits debt and collateral into the part the stability pool absorbs and the part that gets
/// redistributed.
///
/// # Returns
/// * `(debt_to_offset, collateral_to_send_to_pool, debt_to_redistribute, collateral_to_redistribute)`
pub fn offset_and_redistribution(
    debt: Decimal,
    collateral: Decimal,
    pool_deposits: Decimal,
) -> (Decimal, Decimal, Decimal, Decimal) {
    if pool_deposits > Decimal::ZERO && debt > Decimal::ZERO {
        let debt_to_offset = debt.min(pool_deposits);
        let collateral_to_send_to_pool = collateral * debt_to_offset / debt;
        (
            debt_to_offset,
            collateral_to_send_to_pool,
            debt - debt_to_offset,
            collateral - collateral_to_send_to_pool,
        )
    } else {
        (Decimal::ZERO, Decimal::ZERO, debt, collateral)
    }
}

/// Liquidation of a trove with `ICR < MCR`, and of any eligible trove outside recovery mode.
pub fn normal_mode_values(
    entire_debt: Decimal,
    entire_collateral: Decimal,
    pool_deposits: Decimal,
    gas_compensation: Decimal,
    collateral_reward: Decimal,
) -> LiquidationValues {
    let collateral_gas_compensation = entire_collateral * collateral_reward;
    let (debt_to_offset, collateral_to_send_to_pool, debt_to_redistribute, collateral_to_redistribute) =
        offset_and_redistribution(
            entire_debt,
            entire_collateral - collateral_gas_compensation,
            pool_deposits,
        );

    LiquidationValues {
        entire_debt,
        entire_collateral,
        collateral_gas_compensation,
        debt_gas_compensation: gas_compensation,
        debt_to_offset,
        collateral_to_send_to_pool,
        debt_to_redistribute,
        collateral_to_redistribute,
        collateral_surplus: Decimal::ZERO,
    }
}

/// Liquidation while the system is in recovery mode.
///
/// # Logic
/// - `ICR < 100%`: everything is redistributed; the pool would only make a loss. The liquidator
///   gets the gas reserve but no share of the collateral.
/// - `100% <= ICR < MCR`: as in normal mode.
/// - `MCR <= ICR < TCR` with enough bUSD in the pool: the pool absorbs the whole debt for
///   collateral worth `debt * MCR`. The rest is left to the owner as surplus.
///
/// # Returns
/// * `None` if the trove cannot be liquidated.
#[allow(clippy::too_many_arguments)]
pub fn recovery_mode_values(
    entire_debt: Decimal,
    entire_collateral: Decimal,
    icr: Decimal,
    tcr: Decimal,
    mcr: Decimal,
    price: Decimal,
    pool_deposits: Decimal,
    gas_compensation: Decimal,
    collateral_reward: Decimal,
) -> Option<LiquidationValues> {
    if icr < Decimal::ONE {
        return Some(LiquidationValues {
            entire_debt,
            entire_collateral,
            collateral_gas_compensation: Decimal::ZERO,
            debt_gas_compensation: gas_compensation,
            debt_to_offset: Decimal::ZERO,
            collateral_to_send_to_pool: Decimal::ZERO,
            debt_to_redistribute: entire_debt,
            collateral_to_redistribute: entire_collateral,
            collateral_surplus: Decimal::ZERO,
        });
    }

    if icr < mcr {
        return Some(normal_mode_values(
            entire_debt,
            entire_collateral,
            pool_deposits,
            gas_compensation,
            collateral_reward,
        ));
    }

    if icr < tcr && entire_debt <= pool_deposits {
        let capped_collateral = (entire_debt * mcr / price).min(entire_collateral);
        let collateral_gas_compensation = capped_collateral * collateral_reward;
        return Some(LiquidationValues {
            entire_debt,
            entire_collateral,
            collateral_gas_compensation,
            debt_gas_compensation: gas_compensation,
            debt_to_offset: entire_debt,
            collateral_to_send_to_pool: capped_collateral - collateral_gas_compensation,
            debt_to_redistribute: Decimal::ZERO,
            collateral_to_redistribute: Decimal::ZERO,
            collateral_surplus: entire_collateral - capped_collateral,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reward() -> Decimal {
        dec!("0.005")
    }

    #[test]
    fn pool_large_enough_absorbs_everything() {
        let values = normal_mode_values(dec!(6000), dec!(50), dec!(10000), dec!(200), reward());
        assert_eq!(values.collateral_gas_compensation, dec!("0.25"));
        assert_eq!(values.debt_to_offset, dec!(6000));
        assert_eq!(values.collateral_to_send_to_pool, dec!("49.75"));
        assert_eq!(values.debt_to_redistribute, Decimal::ZERO);
        assert_eq!(values.collateral_to_redistribute, Decimal::ZERO);
    }

    #[test]
    fn pool_shortfall_is_redistributed_pro_rata() {
        let values = normal_mode_values(dec!(6000), dec!(50), dec!(1500), dec!(200), reward());
        assert_eq!(values.debt_to_offset, dec!(1500));
        assert_eq!(values.debt_to_redistribute, dec!(4500));
        assert_eq!(
            values.collateral_to_send_to_pool + values.collateral_to_redistribute,
            dec!("49.75")
        );
        assert_eq!(values.collateral_to_send_to_pool, dec!("12.4375"));
    }

    #[test]
    fn empty_pool_redistributes_all() {
        assert_eq!(
            offset_and_redistribution(dec!(100), dec!(1), Decimal::ZERO),
            (Decimal::ZERO, Decimal::ZERO, dec!(100), dec!(1))
        );
    }

    #[test]
    fn recovery_mode_below_hundred_percent_skips_pool() {
        let values = recovery_mode_values(
            dec!(2000), dec!(19), dec!("0.95"), dec!("1.3"), dec!("1.1"), dec!(100), dec!(10000),
            dec!(200), reward(),
        )
        .unwrap();
        assert_eq!(values.debt_to_offset, Decimal::ZERO);
        assert_eq!(values.debt_to_redistribute, dec!(2000));
        assert_eq!(values.collateral_gas_compensation, Decimal::ZERO);
        assert_eq!(values.debt_gas_compensation, dec!(200));
        assert_eq!(values.collateral_to_redistribute, dec!(19));
    }

    #[test]
    fn recovery_mode_at_exactly_hundred_percent_uses_the_pool() {
        let values = recovery_mode_values(
            dec!(2000), dec!(20), Decimal::ONE, dec!("1.3"), dec!("1.1"), dec!(100), dec!(10000),
            dec!(200), reward(),
        )
        .unwrap();
        assert_eq!(values.debt_to_offset, dec!(2000));
        assert_eq!(values.collateral_gas_compensation, dec!("0.1"));
        assert_eq!(values.collateral_to_send_to_pool, dec!("19.9"));
    }

    #[test]
    fn recovery_mode_caps_collateral_at_mcr() {
        // ICR 125%, TCR 130%
        let values = recovery_mode_values(
            dec!(2000), dec!(25), dec!("1.25"), dec!("1.3"), dec!("1.1"), dec!(100), dec!(10000),
            dec!(200), reward(),
        )
        .unwrap();
        assert_eq!(values.debt_to_offset, dec!(2000));
        assert_eq!(values.collateral_gas_compensation, dec!("0.11"));
        assert_eq!(values.collateral_to_send_to_pool, dec!("21.89"));
        assert_eq!(values.collateral_surplus, dec!(3));
    }

    #[test]
    fn recovery_mode_skips_healthy_or_unbacked_troves() {
        // above TCR
        assert!(recovery_mode_values(
            dec!(2000), dec!(30), dec!("1.5"), dec!("1.3"), dec!("1.1"), dec!(100), dec!(10000),
            dec!(200), reward(),
        )
        .is_none());
        // pool cannot cover the whole debt
        assert!(recovery_mode_values(
            dec!(2000), dec!(25), dec!("1.25"), dec!("1.3"), dec!("1.1"), dec!(100), dec!(1000),
            dec!(200), reward(),
        )
        .is_none());
    }

    #[test]
    fn totals_accumulate() {
        let mut totals = LiquidationTotals::new();
        let values = normal_mode_values(dec!(6000), dec!(50), dec!(10000), dec!(200), reward());
        totals.add(&values);
        totals.add(&values);
        assert_eq!(totals.troves_liquidated, 2);
        assert_eq!(totals.values.debt_to_offset, dec!(12000));
        assert_eq!(totals.values.debt_gas_compensation, dec!(400));
    }
}
