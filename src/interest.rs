//! # Interest Accrual
//!
//! Interest is simple and non-compounding, quoted in basis points per year. Every distinct rate
//! owns a `RateBucket` holding the summed principal and the summed accrued interest of all troves
//! at that rate, so the system debt is computable in O(number of rates).
//!
//! A bucket accrues `principal_sum * rate * elapsed` whenever it is touched, which must happen
//! before its principal changes. A trove settles lazily: it realises the interest its bucket
//! already counted, so settling never changes a bucket.
//!
//! Redistributed debt joins the buckets as soon as it is redistributed, split by the summed stake
//! at each rate. It earns interest from then on, although no trove has collected it yet.

use scrypto::prelude::*;

pub const SECONDS_PER_YEAR: i64 = 31_536_000;
pub const BASIS_POINTS: i64 = 10_000;

/// Simple interest owed on `principal` at `rate` basis points per year over `elapsed` seconds.
pub fn simple_interest(principal: Decimal, rate: u16, elapsed: i64) -> Decimal {
    if elapsed <= 0 || rate == 0 || principal.is_zero() {
        return Decimal::ZERO;
    }
    principal * Decimal::from(rate) * Decimal::from(elapsed)
        / Decimal::from(BASIS_POINTS * SECONDS_PER_YEAR)
}

/// Aggregated debt of every trove sharing one interest rate.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct RateBucket {
    pub interest_rate: u16,
    pub principal_sum: Decimal,
    pub interest_sum: Decimal,
    /// Summed stake of the active troves at this rate.
    pub stake_sum: Decimal,
    /// Unix seconds up to which `interest_sum` is accrued.
    pub last_updated: i64,
}

impl RateBucket {
    pub fn new(interest_rate: u16, now: i64) -> Self {
        Self {
            interest_rate,
            principal_sum: Decimal::ZERO,
            interest_sum: Decimal::ZERO,
            stake_sum: Decimal::ZERO,
            last_updated: now,
        }
    }

    /// Interest accrued since `last_updated` that is not yet part of `interest_sum`.
    pub fn pending_interest(&self, now: i64) -> Decimal {
        simple_interest(self.principal_sum, self.interest_rate, now - self.last_updated)
    }

    /// Accrues interest up to `now` and returns the accrued amount.
    pub fn accrue(&mut self, now: i64) -> Decimal {
        let accrued = self.pending_interest(now);
        self.interest_sum += accrued;
        if now > self.last_updated {
            self.last_updated = now;
        }
        accrued
    }

    /// Principal plus interest, including interest accrued since the last write.
    pub fn total_debt(&self, now: i64) -> Decimal {
        self.principal_sum + self.interest_sum + self.pending_interest(now)
    }

    pub fn add_principal(&mut self, amount: Decimal) {
        self.principal_sum += amount;
    }

    /// Removes principal, saturating at zero against rounding dust.
    pub fn remove_principal(&mut self, amount: Decimal) {
        self.principal_sum = (self.principal_sum - amount).max(Decimal::ZERO);
    }

    /// Swaps a trove's old stake for its new one.
    pub fn replace_stake(&mut self, old_stake: Decimal, new_stake: Decimal) {
        self.stake_sum = (self.stake_sum - old_stake + new_stake).max(Decimal::ZERO);
    }

    /// Removes repaid or cancelled interest, saturating at zero against rounding dust.
    pub fn remove_interest(&mut self, amount: Decimal) {
        self.interest_sum = (self.interest_sum - amount).max(Decimal::ZERO);
    }
}

/// Principal and interest of a single trove after lazy settlement.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq)]
pub struct SettledDebt {
    pub principal: Decimal,
    pub interest_owed: Decimal,
    /// Interest realised by this settlement.
    pub accrued: Decimal,
}

/// Settles a trove's interest from `last_update` up to `now`.
pub fn settle(
    principal: Decimal,
    interest_owed: Decimal,
    rate: u16,
    last_update: i64,
    now: i64,
) -> SettledDebt {
    let accrued = simple_interest(principal, rate, now - last_update);
    SettledDebt {
        principal,
        interest_owed: interest_owed + accrued,
        accrued,
    }
}

/// Splits a debt reduction into its interest and principal parts. Interest is paid first.
///
/// # Returns
/// * `(interest_paid, principal_paid)`
pub fn split_repayment(amount: Decimal, interest_owed: Decimal) -> (Decimal, Decimal) {
    let interest_paid = amount.min(interest_owed);
    (interest_paid, amount - interest_paid)
}
