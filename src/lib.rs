//! # Ballast Protocol Crate
//!
//! This crate contains the Scrypto blueprints of the Ballast protocol, a decentralized borrowing
//! protocol that lets users mint bUSD stablecoins against a single collateral held in troves.
//!
//! ## Modules
//!
//! - `trove_manager`: The `TroveManager` component. Holds all troves, the sorted trove list, the
//!   interest rate buckets and the redistribution state, and performs borrowing, liquidations and
//!   redemptions.
//! - `stability_pool`: The `StabilityPool` component. bUSD deposits that absorb liquidated debt in
//!   exchange for the liquidated collateral.
//! - `proxy`: The `Proxy` component, the entry point for users. Fetches prices from the oracle,
//!   checks NFT proofs and authorizes calls to the other components.
//! - `sorted_troves`: Doubly linked list of troves ordered by nominal collateral ratio, with hint
//!   based insertion.
//! - `interest`: Interest rate buckets and per trove interest settlement.
//! - `rewards`: Redistribution of liquidated debt and collateral over all active troves.
//! - `liquidation`: Pure liquidation math for normal and recovery mode.
//! - `redemption`: Pure redemption math.
//! - `stability_math`: The product-sum bookkeeping of the stability pool.
//! - `fees`: The decaying base rate and the borrowing and redemption fees.
//! - `ratios`: Collateral ratio helpers.
//! - `events`: Events emitted by the protocol components.
//! - `shared_structs`: Data structures shared across the components.

pub mod events;
pub mod fees;
pub mod interest;
pub mod liquidation;
pub mod proxy;
pub mod ratios;
pub mod redemption;
pub mod rewards;
pub mod shared_structs;
pub mod sorted_troves;
pub mod stability_math;
pub mod stability_pool;
pub mod trove_manager;
