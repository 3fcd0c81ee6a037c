//! # Stability Pool Math
//!
//! Every liquidation offset shrinks all deposits by the same factor and pays out the same
//! collateral per unit deposited. Instead of touching deposits, the pool keeps
//! - a running product `p` of all shrink factors, and
//! - a running sum `S` of collateral gained per unit deposited, weighted by `p`,
//!
//! and every deposit remembers the values at the time it was made. A deposit is then worth
//! `initial * p / p_snapshot` and has earned `initial * (S - S_snapshot) / p_snapshot`.
//!
//! `p` only decreases. To keep precision it is multiplied by 1e9 whenever it would drop below
//! 1e-9, which starts a new `scale`; a single offset that empties the pool starts a new `epoch`.
//! Deposits older than the current epoch are worth nothing, and deposits more than one scale old
//! are rounded down to nothing.

use crate::ratios::{precision_unit, to_decimal};
use scrypto::prelude::*;

pub fn scale_factor() -> PreciseDecimal {
    pdec!(1_000_000_000)
}

/// Key of a running sum `S`.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpochScale {
    pub epoch: u64,
    pub scale: u64,
}

/// Storage of the running sums per epoch and scale. Missing sums are zero.
pub trait EpochScaleSums {
    fn sum(&self, key: EpochScale) -> PreciseDecimal;
    fn set_sum(&mut self, key: EpochScale, sum: PreciseDecimal);
}

impl EpochScaleSums for KeyValueStore<EpochScale, PreciseDecimal> {
    fn sum(&self, key: EpochScale) -> PreciseDecimal {
        self.get(&key).map(|sum| *sum).unwrap_or(PreciseDecimal::ZERO)
    }

    fn set_sum(&mut self, key: EpochScale, sum: PreciseDecimal) {
        self.insert(key, sum);
    }
}

/// Pool state a deposit is measured against.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
    pub p: PreciseDecimal,
    pub s: PreciseDecimal,
    pub scale: u64,
    pub epoch: u64,
}

/// Running product, scale, epoch and the rounding errors carried between offsets.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct ProductSum {
    pub p: PreciseDecimal,
    pub current_scale: u64,
    pub current_epoch: u64,
    pub last_collateral_error: PreciseDecimal,
    pub last_debt_loss_error: PreciseDecimal,
}

impl ProductSum {
    pub fn new() -> Self {
        Self {
            p: PreciseDecimal::ONE,
            current_scale: 0,
            current_epoch: 0,
            last_collateral_error: PreciseDecimal::ZERO,
            last_debt_loss_error: PreciseDecimal::ZERO,
        }
    }

    fn current_key(&self) -> EpochScale {
        EpochScale {
            epoch: self.current_epoch,
            scale: self.current_scale,
        }
    }

    /// Snapshot for a deposit made or settled now.
    pub fn snapshot(&self, sums: &impl EpochScaleSums) -> PoolSnapshot {
        PoolSnapshot {
            p: self.p,
            s: sums.sum(self.current_key()),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    /// Registers an offset of `debt` against `total_deposits`, paying out `collateral`.
    ///
    /// The loss per unit is rounded up and the gain per unit rounded down, so depositors never
    /// get credited more than the pool holds. What the rounding withholds is carried into the
    /// next offset.
    ///
    /// # Panics
    /// * If `debt` exceeds `total_deposits` or `total_deposits` is zero.
    pub fn offset(
        &mut self,
        sums: &mut impl EpochScaleSums,
        total_deposits: Decimal,
        debt: Decimal,
        collateral: Decimal,
    ) {
        assert!(total_deposits > Decimal::ZERO, "Stability pool is empty");
        assert!(debt <= total_deposits, "Debt to offset exceeds the stability pool");

        let total = PreciseDecimal::from(total_deposits);

        let collateral_numerator = PreciseDecimal::from(collateral) + self.last_collateral_error;

        let loss_per_unit = if debt == total_deposits {
            self.last_debt_loss_error = PreciseDecimal::ZERO;
            PreciseDecimal::ONE
        } else {
            let loss_numerator =
                (PreciseDecimal::from(debt) - self.last_debt_loss_error).max(PreciseDecimal::ZERO);
            let loss_per_unit = loss_numerator / total + precision_unit();
            self.last_debt_loss_error = loss_per_unit * total - loss_numerator;
            loss_per_unit
        };

        let gain_per_unit = collateral_numerator / total;
        self.last_collateral_error = collateral_numerator - gain_per_unit * total;

        let key = self.current_key();
        let marginal_gain = gain_per_unit * self.p;
        sums.set_sum(key, sums.sum(key) + marginal_gain);

        let product_factor = (PreciseDecimal::ONE - loss_per_unit).max(PreciseDecimal::ZERO);

        if product_factor.is_zero() {
            self.current_epoch += 1;
            self.current_scale = 0;
            self.p = PreciseDecimal::ONE;
        } else if self.p * product_factor < PreciseDecimal::ONE / scale_factor() {
            self.p = self.p * product_factor * scale_factor();
            self.current_scale += 1;
        } else {
            self.p = self.p * product_factor;
        }

        assert!(self.p > PreciseDecimal::ZERO, "Running product reached zero");
    }

    /// Current value of a deposit of `initial` made at `snapshot`.
    pub fn compounded_deposit(&self, initial: Decimal, snapshot: &PoolSnapshot) -> Decimal {
        if initial.is_zero() || snapshot.epoch < self.current_epoch {
            return Decimal::ZERO;
        }

        let initial_precise = PreciseDecimal::from(initial);
        let compounded = match self.current_scale - snapshot.scale {
            0 => initial_precise * self.p / snapshot.p,
            1 => initial_precise * self.p / snapshot.p / scale_factor(),
            _ => PreciseDecimal::ZERO,
        };

        if compounded < initial_precise / scale_factor() {
            return Decimal::ZERO;
        }

        to_decimal(compounded)
    }

    /// Collateral earned by a deposit of `initial` since `snapshot`.
    ///
    /// Gains can only come from the snapshot's scale and the one after it: past that, the deposit
    /// is rounded down to nothing.
    pub fn collateral_gain(
        &self,
        sums: &impl EpochScaleSums,
        initial: Decimal,
        snapshot: &PoolSnapshot,
    ) -> Decimal {
        if initial.is_zero() {
            return Decimal::ZERO;
        }

        let first_portion = sums.sum(EpochScale {
            epoch: snapshot.epoch,
            scale: snapshot.scale,
        }) - snapshot.s;
        let second_portion = sums.sum(EpochScale {
            epoch: snapshot.epoch,
            scale: snapshot.scale + 1,
        }) / scale_factor();

        let gain =
            PreciseDecimal::from(initial) * (first_portion + second_portion) / snapshot.p;

        to_decimal(gain.max(PreciseDecimal::ZERO))
    }
}

impl Default for ProductSum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemorySums(BTreeMap<EpochScale, PreciseDecimal>);

    impl EpochScaleSums for MemorySums {
        fn sum(&self, key: EpochScale) -> PreciseDecimal {
            self.0.get(&key).copied().unwrap_or(PreciseDecimal::ZERO)
        }

        fn set_sum(&mut self, key: EpochScale, sum: PreciseDecimal) {
            self.0.insert(key, sum);
        }
    }

    fn close_to(value: Decimal, expected: Decimal) -> bool {
        let difference = if value > expected { value - expected } else { expected - value };
        difference <= dec!("0.000000000001")
    }

    #[test]
    fn partial_offset_shrinks_deposit_and_pays_gain() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();
        let snapshot = pool.snapshot(&sums);

        pool.offset(&mut sums, dec!(10000), dec!(6000), dec!("49.75"));

        let deposit = pool.compounded_deposit(dec!(10000), &snapshot);
        assert!(close_to(deposit, dec!(4000)));
        assert!(deposit <= dec!(4000));
        assert_eq!(pool.collateral_gain(&sums, dec!(10000), &snapshot), dec!("49.75"));
    }

    #[test]
    fn gains_split_between_depositors_by_size() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();
        let snapshot = pool.snapshot(&sums);

        pool.offset(&mut sums, dec!(4000), dec!(1000), dec!(10));

        let small_gain = pool.collateral_gain(&sums, dec!(1000), &snapshot);
        let large_gain = pool.collateral_gain(&sums, dec!(3000), &snapshot);
        assert_eq!(small_gain, dec!("2.5"));
        assert_eq!(large_gain, dec!("7.5"));

        let small = pool.compounded_deposit(dec!(1000), &snapshot);
        let large = pool.compounded_deposit(dec!(3000), &snapshot);
        assert!(small + large <= dec!(3000));
        assert!(close_to(small + large, dec!(3000)));
    }

    #[test]
    fn emptying_the_pool_starts_a_new_epoch() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();
        let old = pool.snapshot(&sums);

        pool.offset(&mut sums, dec!(5000), dec!(5000), dec!(50));

        assert_eq!(pool.current_epoch, 1);
        assert_eq!(pool.current_scale, 0);
        assert_eq!(pool.p, PreciseDecimal::ONE);
        assert_eq!(pool.compounded_deposit(dec!(5000), &old), Decimal::ZERO);
        assert_eq!(pool.collateral_gain(&sums, dec!(5000), &old), dec!(50));

        let fresh = pool.snapshot(&sums);
        assert_eq!(pool.compounded_deposit(dec!(100), &fresh), dec!(100));
    }

    #[test]
    fn tiny_product_moves_to_next_scale() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();
        let snapshot = pool.snapshot(&sums);

        // leaves a ten billionth of the pool
        pool.offset(&mut sums, dec!(10000000000), dec!(9999999999), dec!(1));

        assert_eq!(pool.current_scale, 1);
        assert!(pool.p > PreciseDecimal::ONE / scale_factor());
        // the deposit shrank below a billionth of its size and rounds down to nothing
        assert_eq!(pool.compounded_deposit(dec!(10000000000), &snapshot), Decimal::ZERO);

        let later = pool.snapshot(&sums);
        pool.offset(&mut sums, dec!(100), dec!(50), dec!(2));
        assert!(close_to(pool.collateral_gain(&sums, dec!(100), &later), dec!(2)));
        assert!(close_to(pool.compounded_deposit(dec!(100), &later), dec!(50)));
    }

    #[test]
    fn gain_spanning_a_scale_change_is_counted() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();

        pool.offset(&mut sums, dec!(1000), dec!(999), dec!(1));
        let snapshot = pool.snapshot(&sums);
        // pool holds 1; leave a hundred millionth of it, which crosses 1e-9 in p
        pool.offset(&mut sums, dec!(1), dec!("0.99999999"), dec!(1));

        assert_eq!(pool.current_scale, 1);
        let gain = pool.collateral_gain(&sums, dec!(1), &snapshot);
        assert!(close_to(gain, dec!(1)));
    }

    #[test]
    #[should_panic(expected = "Debt to offset exceeds the stability pool")]
    fn offset_above_deposits_panics() {
        let mut sums = MemorySums::default();
        let mut pool = ProductSum::new();
        pool.offset(&mut sums, dec!(10), dec!(11), dec!(1));
    }
}
