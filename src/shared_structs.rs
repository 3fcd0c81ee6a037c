//! # Ballast shared structs
//! Structs used by the TroveManager, StabilityPool and Proxy components

use crate::interest::RateBucket;
use scrypto::prelude::*;

/// Data struct of a trove NFT, gained when opening a trove
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct Trove {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// Collateral held by the trove, excluding pending redistribution rewards.
    #[mutable]
    pub collateral: Decimal,
    /// Debt excluding interest, including the borrowing fee and the gas reserve.
    #[mutable]
    pub principal: Decimal,
    /// Interest settled but not yet repaid.
    #[mutable]
    pub interest_owed: Decimal,
    /// Annual interest rate in basis points.
    #[mutable]
    pub interest_rate: u16,
    #[mutable]
    pub status: TroveStatus,
    /// Share of the redistribution rewards, fixed at the last touch.
    #[mutable]
    pub stake: Decimal,
    /// Unix seconds up to which `interest_owed` is settled.
    #[mutable]
    pub last_interest_update: i64,
    /// Position in the TroveManager's index of active troves, used by the hint sampler.
    #[mutable]
    pub list_index: u64,
    #[mutable]
    pub reward_snapshot_collateral: PreciseDecimal,
    #[mutable]
    pub reward_snapshot_debt: PreciseDecimal,
    #[mutable]
    pub reward_snapshot_debt_time: PreciseDecimal,
    /// Collateral left to the owner after a capped liquidation or a full redemption.
    #[mutable]
    pub claimable_collateral: Decimal,
}

/// Lifecycle of a trove.
#[derive(ScryptoSbor, PartialEq, Eq, Clone, Copy, Debug)]
pub enum TroveStatus {
    Nonexistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

/// Data struct of a stability pool deposit receipt
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct DepositReceipt {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// Unix seconds of the first deposit.
    pub opened_at: i64,
}

/// Protocol wide parameters of the TroveManager, settable by the owner.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct ProtocolParameters {
    /// Minimum collateral ratio of a single trove.
    pub mcr: Decimal,
    /// Critical system collateral ratio, below which the system is in recovery mode.
    pub ccr: Decimal,
    /// bUSD reserved per trove to compensate its liquidator.
    pub gas_compensation: Decimal,
    /// Minimum debt of a trove, excluding the gas reserve.
    pub min_net_debt: Decimal,
    /// Share of the liquidated collateral paid to the liquidator.
    pub liquidation_collateral_reward: Decimal,
    pub borrowing_fee_floor: Decimal,
    pub max_borrowing_fee: Decimal,
    pub redemption_fee_floor: Decimal,
    /// Per second decay factor of the base rate.
    pub fee_halflife_k: Decimal,
    /// How strongly a redemption raises the base rate.
    pub redemption_spike_k: Decimal,
    /// Interest rate in basis points given to new troves.
    pub interest_rate: u16,
    pub max_interest_rate: u16,
    pub max_list_size: u64,
}

/// A trove's entire position, including everything not yet settled.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct TroveInfo {
    pub trove_id: NonFungibleLocalId,
    pub status: TroveStatus,
    pub collateral: Decimal,
    pub debt: Decimal,
    pub principal: Decimal,
    pub interest_owed: Decimal,
    pub pending_interest: Decimal,
    pub pending_collateral_reward: Decimal,
    pub pending_debt_reward: Decimal,
    pub interest_rate: u16,
    pub stake: Decimal,
    /// NICR the trove is ranked by.
    pub nicr: Decimal,
    pub claimable_collateral: Decimal,
}

/// System wide totals.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct SystemInfo {
    pub total_collateral: Decimal,
    pub total_debt: Decimal,
    pub active_collateral: Decimal,
    pub default_pool_collateral: Decimal,
    pub default_pool_debt: Decimal,
    pub tcr: Decimal,
    pub recovery_mode: bool,
    pub base_rate: Decimal,
    pub borrowing_rate: Decimal,
    pub redemption_rate: Decimal,
    pub trove_count: u64,
    pub circulating_busd: Decimal,
    pub rate_buckets: Vec<RateBucket>,
}

/// Hints to pass to a redemption.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct RedemptionHints {
    /// First trove the redemption will touch.
    pub first_hint: Option<u64>,
    /// NICR of the partially redeemed trove after the redemption, or zero if none.
    pub partial_nicr: Decimal,
    /// The amount that can actually be redeemed.
    pub truncated_amount: Decimal,
}

/// A stability pool deposit as of now.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct DepositInfo {
    pub receipt_id: NonFungibleLocalId,
    pub initial_value: Decimal,
    pub compounded_deposit: Decimal,
    pub collateral_gain: Decimal,
}

/// Stability pool totals.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct StabilityPoolInfo {
    pub total_deposits: Decimal,
    pub collateral: Decimal,
    pub p: PreciseDecimal,
    pub current_scale: u64,
    pub current_epoch: u64,
}

/// Converts an integer `NonFungibleLocalId` into its number.
///
/// # Panics
/// * If the id is not an integer id.
pub fn local_id_to_u64(id: &NonFungibleLocalId) -> u64 {
    match id {
        NonFungibleLocalId::Integer(integer) => integer.value(),
        _ => panic!("Invalid NonFungibleLocalId type"),
    }
}
