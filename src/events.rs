//! Defines events emitted by the Ballast protocol components.

use crate::liquidation::LiquidationValues;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// Event emitted when a new trove is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventOpenTrove {
    /// The `NonFungibleLocalId` identifying the new trove NFT.
    pub trove_id: NonFungibleLocalId,
    /// The data of the new trove.
    pub trove: Trove,
    /// The bUSD borrowing fee added to the trove's debt.
    pub borrowing_fee: Decimal,
}

/// Event emitted when an existing trove is adjusted by its owner, or receives a collateral gain
/// from the stability pool.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventAdjustTrove {
    pub trove_id: NonFungibleLocalId,
    /// The updated data of the trove.
    pub trove: Trove,
    pub borrowing_fee: Decimal,
}

/// Event emitted when a trove is closed by its owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCloseTrove {
    pub trove_id: NonFungibleLocalId,
    /// Debt repaid, including the burnt gas reserve.
    pub debt_repaid: Decimal,
    pub collateral_returned: Decimal,
}

/// Event emitted for every single liquidated trove.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidateTrove {
    pub trove_id: NonFungibleLocalId,
    pub values: LiquidationValues,
    /// Whether the system was in recovery mode when the trove was liquidated.
    pub recovery_mode: bool,
}

/// Event emitted once per liquidation call, summarizing all liquidated troves.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidation {
    pub troves_liquidated: u64,
    pub liquidated_debt: Decimal,
    pub liquidated_collateral: Decimal,
    pub collateral_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
}

/// Event emitted once per redemption call.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedemption {
    /// The bUSD amount the redeemer asked to redeem.
    pub attempted_amount: Decimal,
    /// The bUSD amount actually redeemed and burnt.
    pub actual_amount: Decimal,
    /// Collateral drawn from troves, including the fee.
    pub collateral_drawn: Decimal,
    pub collateral_fee: Decimal,
}

/// Event emitted for every trove touched by a redemption.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedeemTrove {
    pub trove_id: NonFungibleLocalId,
    pub debt_redeemed: Decimal,
    pub collateral_redeemed: Decimal,
    /// Fully redeemed troves are closed.
    pub fully_redeemed: bool,
}

/// Event emitted whenever the base rate changes through a redemption.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventBaseRateUpdate {
    pub base_rate: Decimal,
    pub last_fee_operation: i64,
}

/// Event emitted when an owner claims surplus collateral of a closed trove.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventClaimCollateral {
    pub trove_id: NonFungibleLocalId,
    pub amount: Decimal,
}

/// Event emitted when the protocol parameters are replaced.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventParametersChange {
    pub parameters: ProtocolParameters,
}

/// Event emitted when a stability pool deposit changes.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDepositChange {
    pub receipt_id: NonFungibleLocalId,
    /// Compounded deposit after the change.
    pub new_deposit: Decimal,
    /// Deposit loss to liquidations since the last change.
    pub deposit_loss: Decimal,
}

/// Event emitted when a depositor receives their collateral gain.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCollateralGainWithdrawn {
    pub receipt_id: NonFungibleLocalId,
    pub collateral_gain: Decimal,
}

/// Event emitted when the stability pool absorbs liquidated debt.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventOffset {
    pub debt_offset: Decimal,
    pub collateral_added: Decimal,
    pub p: PreciseDecimal,
    pub scale: u64,
    pub epoch: u64,
}
