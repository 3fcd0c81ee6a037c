//! # Fee Math
//!
//! The base rate is shared by borrowing and redemption fees. It decays exponentially with the
//! time since the last fee operation (`fee_halflife_k` per second) and spikes with the fraction of
//! the bUSD supply that gets redeemed.

use scrypto::prelude::*;

/// Decaying base rate and the time it was last written.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct BaseRate {
    pub rate: Decimal,
    /// Unix seconds of the last fee operation.
    pub last_fee_operation: i64,
}

impl BaseRate {
    pub fn new(now: i64) -> Self {
        Self {
            rate: Decimal::ZERO,
            last_fee_operation: now,
        }
    }

    /// The base rate decayed up to `now`, without writing it.
    pub fn decayed(&self, now: i64, halflife_k: Decimal) -> Decimal {
        let seconds = (now - self.last_fee_operation).max(0);
        if seconds == 0 {
            return self.rate;
        }
        self.rate * halflife_k.checked_powi(seconds).unwrap_or(Decimal::ZERO)
    }

    /// Decays the base rate and records `now` as the last fee operation.
    /// Used on borrowing, which only ever lowers the base rate.
    pub fn decay(&mut self, now: i64, halflife_k: Decimal) -> Decimal {
        self.rate = self.decayed(now, halflife_k);
        self.last_fee_operation = now;
        self.rate
    }

    /// Decays the base rate and adds the redemption spike.
    ///
    /// # Arguments
    /// * `now`: Current unix time in seconds.
    /// * `halflife_k`: Per second decay factor.
    /// * `spike_k`: Multiplier applied to the redeemed fraction of the supply.
    /// * `collateral_drawn`: Collateral paid out by the redemption, before fees.
    /// * `price`: Oracle price of the collateral.
    /// * `total_supply`: bUSD supply before the redeemed tokens are burnt.
    ///
    /// # Returns
    /// * The new base rate, capped at 100%.
    ///
    /// # Panics
    /// * If the resulting base rate is zero.
    pub fn update_from_redemption(
        &mut self,
        now: i64,
        halflife_k: Decimal,
        spike_k: Decimal,
        collateral_drawn: Decimal,
        price: Decimal,
        total_supply: Decimal,
    ) -> Decimal {
        let decayed = self.decayed(now, halflife_k);
        let redeemed_fraction = if total_supply > Decimal::ZERO {
            collateral_drawn * price / total_supply
        } else {
            Decimal::ZERO
        };
        let new_rate = (decayed + spike_k * redeemed_fraction).min(Decimal::ONE);
        assert!(new_rate > Decimal::ZERO, "Base rate must be positive after a redemption");

        self.rate = new_rate;
        self.last_fee_operation = now;
        new_rate
    }
}

/// Redemption fee rate: floor plus base rate, capped at 100%.
pub fn redemption_rate(floor: Decimal, base_rate: Decimal) -> Decimal {
    (floor + base_rate).min(Decimal::ONE)
}

/// Borrowing fee rate: floor plus base rate, capped at `max_borrowing_fee`.
pub fn borrowing_rate(floor: Decimal, base_rate: Decimal, max_borrowing_fee: Decimal) -> Decimal {
    (floor + base_rate).min(max_borrowing_fee)
}

/// Asserts that a fee stays within the percentage the user accepted.
pub fn require_user_accepts_fee(fee: Decimal, amount: Decimal, max_fee_percentage: Decimal) {
    if amount.is_zero() {
        return;
    }
    assert!(
        fee / amount <= max_fee_percentage,
        "Fee exceeded provided maximum"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halflife_k() -> Decimal {
        dec!("0.999983955055097")
    }

    #[test]
    fn base_rate_halves_after_twelve_hours() {
        let base = BaseRate {
            rate: dec!("0.1"),
            last_fee_operation: 0,
        };
        let decayed = base.decayed(43_200, halflife_k());
        assert!(decayed > dec!("0.0499") && decayed < dec!("0.0501"));
    }

    #[test]
    fn decay_without_elapsed_time_keeps_rate() {
        let base = BaseRate {
            rate: dec!("0.02"),
            last_fee_operation: 100,
        };
        assert_eq!(base.decayed(100, halflife_k()), dec!("0.02"));
        assert_eq!(base.decayed(50, halflife_k()), dec!("0.02"));
    }

    #[test]
    fn redemption_spike_is_proportional_to_redeemed_fraction() {
        let mut base = BaseRate::new(0);
        let rate = base.update_from_redemption(0, halflife_k(), dec!("0.5"), dec!(10), dec!(100), dec!(10000));
        assert_eq!(rate, dec!("0.05"));
        assert_eq!(redemption_rate(dec!("0.005"), rate), dec!("0.055"));
    }

    #[test]
    fn rates_are_capped() {
        let mut base = BaseRate::new(0);
        let rate = base.update_from_redemption(0, halflife_k(), dec!("0.5"), dec!(1000), dec!(100), dec!(10000));
        assert_eq!(rate, Decimal::ONE);
        assert_eq!(redemption_rate(dec!("0.005"), rate), Decimal::ONE);
        assert_eq!(borrowing_rate(dec!("0.005"), rate, dec!("0.05")), dec!("0.05"));
    }

    #[test]
    #[should_panic(expected = "Fee exceeded provided maximum")]
    fn fee_above_user_maximum_panics() {
        require_user_accepts_fee(dec!(2), dec!(100), dec!("0.01"));
    }
}
