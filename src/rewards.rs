//! # Redistribution Rewards
//!
//! Debt and collateral that the stability pool cannot absorb are spread over all active troves in
//! proportion to their stake. Nothing is iterated: every redistribution raises the cumulative
//! rewards per unit staked (`l_collateral`, `l_debt`), and a trove collects
//! `stake * (l_now - l_snapshot)` the next time it is touched.
//!
//! The per-unit values are `PreciseDecimal`, and the part of a redistribution lost to the division
//! is carried into the next one.
//!
//! Pending debt earns interest at the recipient's rate from the moment it is redistributed.
//! `l_debt_time` sums every debt increment weighted by its time, so
//! `now * (l_debt - snapshot) - (l_debt_time - snapshot_time)` is the pending debt of one unit of
//! stake integrated over time.

use crate::interest::{BASIS_POINTS, SECONDS_PER_YEAR};
use crate::ratios::to_decimal;
use scrypto::prelude::*;

/// Global redistribution accumulators and stake bookkeeping.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct Redistribution {
    /// Cumulative collateral reward per unit staked.
    pub l_collateral: PreciseDecimal,
    /// Cumulative debt reward per unit staked.
    pub l_debt: PreciseDecimal,
    /// Sum of every `l_debt` increment times the unix second it happened at.
    pub l_debt_time: PreciseDecimal,
    pub last_collateral_error: PreciseDecimal,
    pub last_debt_error: PreciseDecimal,
    pub total_stakes: Decimal,
    /// `total_stakes` right after the last liquidation.
    pub total_stakes_snapshot: Decimal,
    /// System collateral right after the last liquidation.
    pub total_collateral_snapshot: Decimal,
}

impl Redistribution {
    pub fn new() -> Self {
        Self {
            l_collateral: PreciseDecimal::ZERO,
            l_debt: PreciseDecimal::ZERO,
            l_debt_time: PreciseDecimal::ZERO,
            last_collateral_error: PreciseDecimal::ZERO,
            last_debt_error: PreciseDecimal::ZERO,
            total_stakes: Decimal::ZERO,
            total_stakes_snapshot: Decimal::ZERO,
            total_collateral_snapshot: Decimal::ZERO,
        }
    }

    /// Stake for a trove holding `collateral`.
    ///
    /// Collateral that arrived through redistribution never gets a stake of its own, so new stakes
    /// are scaled down by `total_stakes_snapshot / total_collateral_snapshot`.
    pub fn compute_stake(&self, collateral: Decimal) -> Decimal {
        if self.total_collateral_snapshot.is_zero() {
            collateral
        } else {
            collateral * self.total_stakes_snapshot / self.total_collateral_snapshot
        }
    }

    /// Replaces a trove's stake and returns the new one.
    pub fn update_stake(&mut self, old_stake: Decimal, collateral: Decimal) -> Decimal {
        let new_stake = self.compute_stake(collateral);
        self.total_stakes = self.total_stakes - old_stake + new_stake;
        new_stake
    }

    /// Drops a closed trove's stake from the total.
    pub fn remove_stake(&mut self, stake: Decimal) {
        self.total_stakes = (self.total_stakes - stake).max(Decimal::ZERO);
    }

    /// Spreads `debt` and `collateral` over the current stakes at unix second `now`.
    ///
    /// # Returns
    /// * The debt added per unit staked.
    ///
    /// # Panics
    /// * If there is something to redistribute but no stake to carry it.
    pub fn redistribute(&mut self, debt: Decimal, collateral: Decimal, now: i64) -> PreciseDecimal {
        if debt.is_zero() {
            return PreciseDecimal::ZERO;
        }
        assert!(
            self.total_stakes > Decimal::ZERO,
            "No stakes left to redistribute to"
        );

        let total_stakes = PreciseDecimal::from(self.total_stakes);

        let collateral_numerator = PreciseDecimal::from(collateral) + self.last_collateral_error;
        let debt_numerator = PreciseDecimal::from(debt) + self.last_debt_error;

        let collateral_per_stake = collateral_numerator / total_stakes;
        let debt_per_stake = debt_numerator / total_stakes;

        self.last_collateral_error = collateral_numerator - collateral_per_stake * total_stakes;
        self.last_debt_error = debt_numerator - debt_per_stake * total_stakes;

        self.l_collateral += collateral_per_stake;
        self.l_debt += debt_per_stake;
        self.l_debt_time += debt_per_stake * PreciseDecimal::from(now);

        debt_per_stake
    }

    /// Collateral and debt a trove has earned since its snapshot. Both are truncated, so the
    /// default pool can always cover them.
    ///
    /// # Returns
    /// * `(pending_collateral, pending_debt)`
    pub fn pending_rewards(
        &self,
        stake: Decimal,
        snapshot_collateral: PreciseDecimal,
        snapshot_debt: PreciseDecimal,
    ) -> (Decimal, Decimal) {
        if stake.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let stake = PreciseDecimal::from(stake);
        (
            to_decimal(stake * (self.l_collateral - snapshot_collateral)),
            to_decimal(stake * (self.l_debt - snapshot_debt)),
        )
    }

    /// Interest a trove's pending debt has earned at `rate` basis points since each redistribution
    /// added it. Truncated like the rewards themselves.
    pub fn pending_reward_interest(
        &self,
        stake: Decimal,
        rate: u16,
        snapshot_debt: PreciseDecimal,
        snapshot_debt_time: PreciseDecimal,
        now: i64,
    ) -> Decimal {
        if stake.is_zero() || rate == 0 {
            return Decimal::ZERO;
        }
        let debt_seconds = PreciseDecimal::from(now) * (self.l_debt - snapshot_debt)
            - (self.l_debt_time - snapshot_debt_time);
        if debt_seconds <= PreciseDecimal::ZERO {
            return Decimal::ZERO;
        }
        to_decimal(
            PreciseDecimal::from(stake) * debt_seconds * PreciseDecimal::from(rate)
                / PreciseDecimal::from(BASIS_POINTS * SECONDS_PER_YEAR),
        )
    }

    /// Records the stake and collateral totals after a liquidation.
    ///
    /// `total_collateral` is the collateral left in the system, active and pending alike, after
    /// the liquidated collateral and the gas compensation have left it.
    pub fn update_system_snapshots(&mut self, total_collateral: Decimal) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = total_collateral;
    }
}

impl Default for Redistribution {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stakes_equal_collateral() {
        let mut redistribution = Redistribution::new();
        assert_eq!(redistribution.update_stake(Decimal::ZERO, dec!(10)), dec!(10));
        assert_eq!(redistribution.update_stake(Decimal::ZERO, dec!(30)), dec!(30));
        assert_eq!(redistribution.total_stakes, dec!(40));
    }

    #[test]
    fn redistribution_is_proportional_to_stake() {
        let mut redistribution = Redistribution::new();
        let small = redistribution.update_stake(Decimal::ZERO, dec!(10));
        let large = redistribution.update_stake(Decimal::ZERO, dec!(30));

        redistribution.redistribute(dec!(2000), dec!(8), 0);

        let (small_coll, small_debt) =
            redistribution.pending_rewards(small, PreciseDecimal::ZERO, PreciseDecimal::ZERO);
        let (large_coll, large_debt) =
            redistribution.pending_rewards(large, PreciseDecimal::ZERO, PreciseDecimal::ZERO);

        assert_eq!(small_debt, dec!(500));
        assert_eq!(large_debt, dec!(1500));
        assert_eq!(small_coll, dec!(2));
        assert_eq!(large_coll, dec!(6));
    }

    #[test]
    fn snapshots_exclude_earlier_rewards() {
        let mut redistribution = Redistribution::new();
        let stake = redistribution.update_stake(Decimal::ZERO, dec!(10));
        redistribution.redistribute(dec!(100), dec!(1), 0);

        let snapshot_collateral = redistribution.l_collateral;
        let snapshot_debt = redistribution.l_debt;
        assert_eq!(
            redistribution.pending_rewards(stake, snapshot_collateral, snapshot_debt),
            (Decimal::ZERO, Decimal::ZERO)
        );
    }

    #[test]
    fn pending_rewards_never_exceed_redistributed_amounts() {
        let mut redistribution = Redistribution::new();
        let stakes: Vec<Decimal> = [dec!(3), dec!(7), dec!(11)]
            .iter()
            .map(|collateral| redistribution.update_stake(Decimal::ZERO, *collateral))
            .collect();

        redistribution.redistribute(dec!(1000), dec!(10), 0);
        redistribution.redistribute(dec!(333), dec!(1), 0);

        let (collateral, debt) = stakes.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(collateral, debt), stake| {
                let (c, d) = redistribution.pending_rewards(
                    *stake,
                    PreciseDecimal::ZERO,
                    PreciseDecimal::ZERO,
                );
                (collateral + c, debt + d)
            },
        );

        assert!(debt <= dec!(1333));
        assert!(dec!(1333) - debt < dec!("0.000000000000001"));
        assert!(collateral <= dec!(11));
        assert!(dec!(11) - collateral < dec!("0.000000000000001"));
    }

    #[test]
    fn pending_debt_earns_interest_from_each_redistribution() {
        let mut redistribution = Redistribution::new();
        let stake = redistribution.update_stake(Decimal::ZERO, dec!(10));
        let year = SECONDS_PER_YEAR;

        redistribution.redistribute(dec!(1000), dec!(1), 0);
        redistribution.redistribute(dec!(2000), dec!(1), year / 2);

        // 1000 for a full year and 2000 for half a year, at 10%
        let interest = redistribution.pending_reward_interest(
            stake,
            1000,
            PreciseDecimal::ZERO,
            PreciseDecimal::ZERO,
            year,
        );
        assert_eq!(interest, dec!(200));

        // a snapshot taken after the first redistribution only sees the second
        let interest = redistribution.pending_reward_interest(
            stake,
            1000,
            pdec!(100),
            PreciseDecimal::ZERO,
            year,
        );
        assert_eq!(interest, dec!(100));

        assert_eq!(
            redistribution.pending_reward_interest(stake, 0, PreciseDecimal::ZERO, PreciseDecimal::ZERO, year),
            Decimal::ZERO
        );
    }

    #[test]
    fn stakes_shrink_after_liquidations() {
        let mut redistribution = Redistribution::new();
        redistribution.update_stake(Decimal::ZERO, dec!(10));
        redistribution.update_stake(Decimal::ZERO, dec!(10));
        // one trove liquidated and redistributed, the other now backs 20 collateral
        redistribution.remove_stake(dec!(10));
        redistribution.update_system_snapshots(dec!(20));

        assert_eq!(redistribution.compute_stake(dec!(20)), dec!(10));
    }
}
