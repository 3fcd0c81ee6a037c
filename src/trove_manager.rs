#![allow(deprecated)]

//! # The Trove Manager Blueprint
//!
//! The core component of the Ballast protocol. It owns every trove, mints and burns bUSD and
//! holds all collateral that is not in the stability pool.
//!
//! ## Overview
//! - **Borrowing:** Troves are opened, adjusted and closed here. Each trove is an NFT (`Trove`
//!   struct) carrying its collateral, principal and settled interest.
//! - **Interest:** Troves pay simple interest at the rate they were opened with. Troves sharing a
//!   rate are summed in a `RateBucket`, so the system debt is known without touching any trove.
//!   A trove settles its own interest whenever it is touched.
//! - **Ordering:** Active troves are kept in a list sorted by their nominal collateral ratio
//!   (NICR). The weakest trove sits at the tail.
//! - **Liquidation:** Troves below the MCR (or below the TCR in recovery mode) are liquidated. Their
//!   debt is offset against the `StabilityPool` as far as it reaches, the rest is redistributed
//!   over all other troves in proportion to their stake. Redistributed debt joins the rate buckets
//!   right away and earns interest before any trove collects it.
//! - **Redemption:** bUSD is swapped for collateral at the oracle price, starting at the weakest
//!   trove above the MCR.
//!
//! ## Accounting
//! - `collateral_vault`: collateral of active troves.
//! - `default_vault` / `default_pool_debt`: redistributed collateral and debt that troves have
//!   not yet collected.
//! - `surplus_vault`: collateral claimable by owners of troves closed by liquidation or redemption.
//! - `treasury_vault`: redemption fees.
//! - `gas_pool`: the bUSD reserve of every active trove, paid to its liquidator.
//! - `fee_vault`: borrowing fees and realised interest.
//!
//! ## Interaction with Other Components
//! - **`Proxy`:** The entry point for users. Fetches oracle prices and holds the controller badges
//!   this component's methods require.
//! - **`StabilityPool`:** Absorbs liquidated debt through `offset`, authorized with the badge this
//!   component keeps for itself.

use crate::events::*;
use crate::fees::*;
use crate::interest::{settle, simple_interest, split_repayment, RateBucket};
use crate::liquidation::*;
use crate::ratios::*;
use crate::redemption::*;
use crate::rewards::Redistribution;
use crate::shared_structs::*;
use crate::sorted_troves::*;
use crate::stability_pool::stability_pool::StabilityPool;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

/// A trove's collateral and debt including everything it has not settled yet.
struct TrovePosition {
    collateral: Decimal,
    debt: Decimal,
    pending_interest: Decimal,
    pending_collateral_reward: Decimal,
    pending_debt_reward: Decimal,
}

/// Running state of a liquidation call.
struct LiquidationRun {
    now: i64,
    pool_remaining: Decimal,
    system_debt: Decimal,
    system_collateral: Decimal,
    recovery_mode: bool,
    totals: LiquidationTotals,
}

fn now() -> i64 {
    Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch
}

/// NICR a listed trove is ranked by, read from its NFT.
fn stored_nicr(trove_resource: ResourceAddress, trove_id: u64) -> Decimal {
    let trove: Trove = ResourceManager::from(trove_resource)
        .get_non_fungible_data(&NonFungibleLocalId::integer(trove_id));
    nominal_ratio(trove.collateral, trove.principal + trove.interest_owed)
}

#[blueprint]
#[types(u64, u16, Decimal, ListNode, RateBucket, Trove, TroveStatus)]
#[events(
    EventOpenTrove,
    EventAdjustTrove,
    EventCloseTrove,
    EventLiquidateTrove,
    EventLiquidation,
    EventRedemption,
    EventRedeemTrove,
    EventBaseRateUpdate,
    EventClaimCollateral,
    EventParametersChange,
)]
mod trove_manager {
    use crate::ratios::to_decimal;

    enable_method_auth! {
        methods {
            open_trove => restrict_to: [OWNER];
            adjust_trove => restrict_to: [OWNER];
            close_trove => restrict_to: [OWNER];
            claim_collateral => restrict_to: [OWNER];
            move_collateral_gain_to_trove => restrict_to: [OWNER];
            liquidate => restrict_to: [OWNER];
            liquidate_sequence => restrict_to: [OWNER];
            batch_liquidate => restrict_to: [OWNER];
            redeem_collateral => restrict_to: [OWNER];
            set_stability_pool => restrict_to: [OWNER];
            set_parameters => restrict_to: [OWNER];
            take_fees => restrict_to: [OWNER];
            get_trove => PUBLIC;
            get_entire_debt_and_collateral => PUBLIC;
            get_system_info => PUBLIC;
            get_rate_buckets => PUBLIC;
            get_sorted_troves => PUBLIC;
            get_nicr => PUBLIC;
            get_current_icr => PUBLIC;
            get_tcr => PUBLIC;
            check_recovery_mode => PUBLIC;
            has_undercollateralized_troves => PUBLIC;
            get_redemption_hints => PUBLIC;
            get_approx_hint => PUBLIC;
            find_insert_position => PUBLIC;
            get_parameters => PUBLIC;
            get_busd_address => PUBLIC;
        }
    }
    struct TroveManager {
        /// Collateral backing active troves.
        collateral_vault: Vault,
        /// Redistributed collateral that troves have not collected yet.
        default_vault: Vault,
        /// Redistributed debt that troves have not collected yet. Already part of the rate buckets.
        default_pool_debt: Decimal,
        /// Collateral claimable by owners of troves closed by liquidation or redemption.
        surplus_vault: Vault,
        /// Redemption fees, in collateral.
        treasury_vault: Vault,
        /// The bUSD gas reserve of every active trove.
        gas_pool: Vault,
        /// Borrowing fees and realised interest, in bUSD.
        fee_vault: Vault,
        /// Controller badge used to authorize calls to the `StabilityPool`.
        badge_vault: FungibleVault,
        busd_manager: ResourceManager,
        trove_nft_manager: ResourceManager,
        stability_pool: Option<Global<StabilityPool>>,
        /// Id of the last opened trove.
        trove_counter: u64,
        sorted_troves: SortedTroves,
        trove_nodes: KeyValueStore<u64, ListNode>,
        /// Active trove ids by `list_index`, sampled by the approximate hint search.
        trove_index: KeyValueStore<u64, u64>,
        rate_buckets: AvlTree<u16, RateBucket>,
        redistribution: Redistribution,
        base_rate: BaseRate,
        /// Total bUSD minted and not burnt.
        circulating_busd: Decimal,
        parameters: ProtocolParameters,
    }

    impl TroveManager {
        /// Instantiates the `TroveManager` component and its resources.
        ///
        /// # Arguments
        /// * `collateral_address`: The `ResourceAddress` of the only accepted collateral.
        /// * `dapp_def_address`: The `GlobalAddress` of the DApp Definition account.
        ///
        /// # Returns
        /// * `Global<TroveManager>`: The new component.
        /// * `Bucket`: The controller badges, minus the one this component keeps.
        /// * `ResourceAddress`: The bUSD resource.
        /// * `ResourceAddress`: The trove NFT resource.
        ///
        /// # Logic
        /// 1. **Initialize Parameters:** Sets default `ProtocolParameters`.
        /// 2. **Allocate Address:** Reserves the component address so resource roles can refer to it.
        /// 3. **Create Controller Badge:** Mints 30 badges. Methods of this component and of the
        ///    `StabilityPool` require 0.75 of them.
        /// 4. **Create bUSD:** Mintable and burnable by this component or by 0.75 controller badges.
        /// 5. **Create Trove NFT:** Mintable, burnable and updatable the same way.
        /// 6. **Instantiate State:** Empty list and buckets, fresh accumulators, a zero base rate.
        /// 7. **Globalize:** Owner role is 0.75 controller badges.
        pub fn instantiate(
            collateral_address: ResourceAddress,
            dapp_def_address: GlobalAddress,
        ) -> (Global<TroveManager>, Bucket, ResourceAddress, ResourceAddress) {
            let parameters = ProtocolParameters {
                mcr: dec!("1.1"),
                ccr: dec!("1.5"),
                gas_compensation: dec!(200),
                min_net_debt: dec!(1800),
                liquidation_collateral_reward: dec!("0.005"),
                borrowing_fee_floor: dec!("0.005"),
                max_borrowing_fee: dec!("0.05"),
                redemption_fee_floor: dec!("0.005"),
                fee_halflife_k: dec!("0.999983955055097"),
                redemption_spike_k: dec!("0.5"),
                interest_rate: 100,
                max_interest_rate: 10_000,
                max_list_size: 1_000_000,
            };

            let (address_reservation, component_address) =
                Runtime::allocate_component_address(TroveManager::blueprint_id());

            let mut controller_role: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(global_caller(component_address))),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "controller badge ballast", locked;
                    "symbol" => "bCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(30)
            .into();

            let badge_address = controller_role.resource_address();

            let busd_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(badge_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "Ballast USD", updatable;
                    "symbol" => "bUSD", updatable;
                    "tags" => vec!["stablecoin", "defi", "usd"], updatable;
                    "dapp_definitions" => vec![dapp_def_address], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), badge_address));
                minter_updater => rule!(require_amount(dec!("0.75"), badge_address));
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), badge_address));
                burner_updater => rule!(require_amount(dec!("0.75"), badge_address));
            ))
            .create_with_no_initial_supply()
            .into();

            let trove_nft_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<Trove>(
                    OwnerRole::Fixed(rule!(require_amount(dec!("0.75"), badge_address))),
                )
                .metadata(metadata!(
                    init {
                        "name" => "Ballast Trove", locked;
                        "symbol" => "bTROVE", locked;
                        "description" => "A receipt for your bUSD trove.", locked;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), badge_address));
                    non_fungible_data_updater_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address))
                    || require_amount(dec!("0.75"), badge_address));
                    minter_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require(global_caller(component_address))
                    || require_amount(dec!("0.75"), badge_address));
                    burner_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            let own_badge = controller_role.take(1);
            let now = now();

            let component = Self {
                collateral_vault: Vault::new(collateral_address),
                default_vault: Vault::new(collateral_address),
                default_pool_debt: Decimal::ZERO,
                surplus_vault: Vault::new(collateral_address),
                treasury_vault: Vault::new(collateral_address),
                gas_pool: Vault::new(busd_manager.address()),
                fee_vault: Vault::new(busd_manager.address()),
                badge_vault: FungibleVault::with_bucket(own_badge.as_fungible()),
                busd_manager,
                trove_nft_manager,
                stability_pool: None,
                trove_counter: 0,
                sorted_troves: SortedTroves::new(parameters.max_list_size),
                trove_nodes: KeyValueStore::new_with_registered_type(),
                trove_index: KeyValueStore::new_with_registered_type(),
                rate_buckets: AvlTree::new(),
                redistribution: Redistribution::new(),
                base_rate: BaseRate::new(now),
                circulating_busd: Decimal::ZERO,
                parameters,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Ballast Trove Manager".to_string(), updatable;
                    "description" => "The core logic component for the Ballast Protocol".to_string(), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (
                component,
                controller_role,
                busd_manager.address(),
                trove_nft_manager.address(),
            )
        }

        /// Opens a new trove, minting bUSD against the deposited collateral.
        ///
        /// # Arguments
        /// * `collateral`: A `Bucket` of the accepted collateral.
        /// * `busd_amount`: The bUSD the user receives.
        /// * `max_fee_percentage`: The highest borrowing fee rate the user accepts.
        /// * `upper_hint`: A trove expected to rank directly above the new one.
        /// * `lower_hint`: A trove expected to rank directly below the new one.
        /// * `price`: Oracle price of the collateral.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed bUSD and the trove NFT.
        ///
        /// # Panics
        /// * If the collateral resource is wrong.
        /// * If the fee exceeds `max_fee_percentage`, or the net debt is below the minimum.
        /// * If the trove (or, outside recovery mode, the system) ends up under-collateralized.
        ///
        /// # Logic
        /// 1. **Fee:** Outside recovery mode, decays the base rate and charges the borrowing fee.
        /// 2. **Debt:** Net debt is the amount plus the fee. The trove's debt adds the gas reserve.
        /// 3. **Checks:** Recovery mode requires `ICR >= CCR`. Otherwise `ICR >= MCR` and the new
        ///    TCR must stay at or above the CCR.
        /// 4. **Bookkeeping:** Adds the debt to the rate bucket, computes the stake, mints the NFT
        ///    and inserts the trove into the sorted list and the trove index.
        /// 5. **Mint:** The amount goes to the user, the fee to the fee vault and the reserve to the
        ///    gas pool.
        pub fn open_trove(
            &mut self,
            collateral: Bucket,
            busd_amount: Decimal,
            max_fee_percentage: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            assert!(
                collateral.resource_address() == self.collateral_vault.resource_address(),
                "Invalid collateral"
            );
            assert!(busd_amount > Decimal::ZERO, "Amount must be larger than 0");

            let now = now();
            let recovery_mode = self.is_recovery_mode(price, now);
            let borrowing_fee =
                self.trigger_borrowing_fee(busd_amount, max_fee_percentage, recovery_mode, now);

            let net_debt = busd_amount + borrowing_fee;
            assert!(
                net_debt >= self.parameters.min_net_debt,
                "Net debt must be at least the minimum"
            );
            let debt = net_debt + self.parameters.gas_compensation;
            let collateral_amount = collateral.amount();

            let icr = collateral_ratio(collateral_amount, debt, price);
            if recovery_mode {
                assert!(
                    icr >= self.parameters.ccr,
                    "Operation must leave trove with ICR >= CCR"
                );
            } else {
                assert!(
                    icr >= self.parameters.mcr,
                    "An operation that would result in ICR < MCR is not permitted"
                );
                let new_tcr = new_total_ratio(
                    self.total_collateral(),
                    self.total_debt(now),
                    collateral_amount,
                    true,
                    debt,
                    true,
                    price,
                );
                assert!(
                    new_tcr >= self.parameters.ccr,
                    "An operation that would result in TCR < CCR is not permitted"
                );
            }

            let interest_rate = self.parameters.interest_rate;
            let stake = self.redistribution.update_stake(Decimal::ZERO, collateral_amount);
            self.update_bucket(interest_rate, now, |bucket| {
                bucket.add_principal(debt);
                bucket.replace_stake(Decimal::ZERO, stake);
            });

            self.trove_counter += 1;
            let trove_id = self.trove_counter;
            let list_index = self.sorted_troves.size;

            let trove = Trove {
                key_image_url: Url::of("https://ballast.finance/trove.png"),
                collateral: collateral_amount,
                principal: debt,
                interest_owed: Decimal::ZERO,
                interest_rate,
                status: TroveStatus::Active,
                stake,
                last_interest_update: now,
                list_index,
                reward_snapshot_collateral: self.redistribution.l_collateral,
                reward_snapshot_debt: self.redistribution.l_debt,
                reward_snapshot_debt_time: self.redistribution.l_debt_time,
                claimable_collateral: Decimal::ZERO,
            };

            let trove_nft = self
                .trove_nft_manager
                .mint_non_fungible(&NonFungibleLocalId::integer(trove_id), trove.clone());

            self.trove_index.insert(list_index, trove_id);
            self.insert_into_list(
                trove_id,
                nominal_ratio(collateral_amount, debt),
                upper_hint,
                lower_hint,
            );

            self.collateral_vault.put(collateral);
            self.gas_pool
                .put(self.busd_manager.mint(self.parameters.gas_compensation));
            if borrowing_fee > Decimal::ZERO {
                self.fee_vault.put(self.busd_manager.mint(borrowing_fee));
            }
            self.circulating_busd += debt;

            Runtime::emit_event(EventOpenTrove {
                trove_id: NonFungibleLocalId::integer(trove_id),
                trove,
                borrowing_fee,
            });

            (self.busd_manager.mint(busd_amount), trove_nft)
        }

        /// Adjusts a trove's collateral and/or debt.
        ///
        /// # Arguments
        /// * `trove_id`: The trove to adjust.
        /// * `collateral_deposit`: Collateral to add, if any.
        /// * `collateral_withdrawal`: Collateral to remove. Cannot be combined with a deposit.
        /// * `debt_change`: Absolute change of the debt.
        /// * `is_debt_increase`: Whether `debt_change` is borrowed or repaid.
        /// * `repayment`: bUSD paying for a debt decrease.
        /// * `max_fee_percentage`: The highest borrowing fee rate the user accepts.
        /// * `upper_hint` / `lower_hint`: Expected neighbours after the adjustment.
        /// * `price`: Oracle price of the collateral.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: Withdrawn collateral, and borrowed bUSD or the unused repayment.
        #[allow(clippy::too_many_arguments)]
        pub fn adjust_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            collateral_deposit: Option<Bucket>,
            collateral_withdrawal: Decimal,
            debt_change: Decimal,
            is_debt_increase: bool,
            repayment: Option<Bucket>,
            max_fee_percentage: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            self.adjust(
                local_id_to_u64(&trove_id),
                collateral_deposit,
                collateral_withdrawal,
                debt_change,
                is_debt_increase,
                repayment,
                max_fee_percentage,
                upper_hint,
                lower_hint,
                price,
            )
        }

        /// Closes a trove, repaying its debt and returning its collateral.
        ///
        /// # Arguments
        /// * `trove_id`: The trove to close.
        /// * `payment`: bUSD covering the debt minus the gas reserve.
        /// * `price`: Oracle price of the collateral.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The collateral and the unused bUSD.
        ///
        /// # Logic
        /// 1. Not allowed in recovery mode, nor for the last active trove.
        /// 2. Settles interest and rewards, then checks the TCR after removing the trove.
        /// 3. Burns `debt - reserve` from the payment and the reserve from the gas pool.
        /// 4. Removes the trove from its bucket, the stakes and the sorted list.
        pub fn close_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            mut payment: Bucket,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            let id = local_id_to_u64(&trove_id);
            let mut trove = self.active_trove(id);
            let now = now();

            assert!(
                !self.is_recovery_mode(price, now),
                "Operation not permitted during Recovery Mode"
            );
            assert!(self.sorted_troves.size > 1, "Only one trove in the system");

            self.settle_trove(&mut trove, now);

            let debt = trove.principal + trove.interest_owed;
            let collateral = trove.collateral;

            let new_tcr = new_total_ratio(
                self.total_collateral(),
                self.total_debt(now),
                collateral,
                false,
                debt,
                false,
                price,
            );
            assert!(
                new_tcr >= self.parameters.ccr,
                "An operation that would result in TCR < CCR is not permitted"
            );

            let repay = debt - self.parameters.gas_compensation;
            assert!(
                payment.resource_address() == self.busd_manager.address()
                    && payment.amount() >= repay,
                "Insufficient bUSD supplied"
            );

            payment.take(repay).burn();
            self.gas_pool.take(self.parameters.gas_compensation).burn();
            self.circulating_busd -= debt;

            self.update_bucket(trove.interest_rate, now, |bucket| {
                bucket.remove_interest(trove.interest_owed);
                bucket.remove_principal(trove.principal);
            });
            self.unstake(&mut trove, now);
            self.remove_from_list(id, &trove);

            trove.status = TroveStatus::ClosedByOwner;
            trove.collateral = Decimal::ZERO;
            trove.principal = Decimal::ZERO;
            trove.interest_owed = Decimal::ZERO;
            self.save_trove(id, &trove);

            Runtime::emit_event(EventCloseTrove {
                trove_id,
                debt_repaid: debt,
                collateral_returned: collateral,
            });

            (self.collateral_vault.take(collateral), payment)
        }

        /// Withdraws the surplus collateral left to the owner of a liquidated or redeemed trove.
        pub fn claim_collateral(&mut self, trove_id: NonFungibleLocalId) -> Bucket {
            let id = local_id_to_u64(&trove_id);
            let mut trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            let amount = trove.claimable_collateral;
            assert!(amount > Decimal::ZERO, "No collateral available to claim");

            trove.claimable_collateral = Decimal::ZERO;
            self.save_trove(id, &trove);

            Runtime::emit_event(EventClaimCollateral { trove_id, amount });

            self.surplus_vault.take(amount)
        }

        /// Adds a depositor's stability pool collateral gain to their trove.
        ///
        /// # Panics
        /// * If the trove is not active.
        /// * If the trove's ICR stays below the MCR.
        pub fn move_collateral_gain_to_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            collateral_gain: Bucket,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            price: Decimal,
        ) {
            let id = local_id_to_u64(&trove_id);
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            assert!(
                trove.status == TroveStatus::Active,
                "Caller must have an active trove to withdraw collateral gain to"
            );

            let (collateral, busd) = self.adjust(
                id,
                Some(collateral_gain),
                Decimal::ZERO,
                Decimal::ZERO,
                false,
                None,
                Decimal::ONE,
                upper_hint,
                lower_hint,
                price,
            );
            collateral.drop_empty();
            busd.drop_empty();

            let trove = self.trove(id);
            assert!(
                collateral_ratio(trove.collateral, trove.principal + trove.interest_owed, price)
                    >= self.parameters.mcr,
                "An operation that would result in ICR < MCR is not permitted"
            );
        }

        /// Liquidates a single trove.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The gas compensation, in bUSD and collateral.
        ///
        /// # Panics
        /// * If the trove is not active, or not eligible for liquidation.
        pub fn liquidate(&mut self, trove_id: NonFungibleLocalId, price: Decimal) -> (Bucket, Bucket) {
            self.active_trove(local_id_to_u64(&trove_id));
            self.batch_liquidate(vec![trove_id], price)
        }

        /// Liquidates up to `count` troves starting at the tail of the sorted list.
        ///
        /// # Logic
        /// 1. Walks from the weakest trove upward and stops at the first trove that cannot be
        ///    liquidated. In recovery mode the TCR is re-evaluated after each liquidation.
        /// 2. Never liquidates the last active trove.
        /// 3. Offsets the summed debt against the stability pool, redistributes the rest and pays
        ///    the gas compensation.
        pub fn liquidate_sequence(&mut self, count: u64, price: Decimal) -> (Bucket, Bucket) {
            let mut run = self.start_liquidation_run(price);

            for _ in 0..count {
                if self.sorted_troves.size <= 1 {
                    break;
                }
                let Some(id) = self.sorted_troves.last() else {
                    break;
                };
                if !self.try_liquidate(id, price, &mut run) {
                    break;
                }
            }

            self.finish_liquidation_run(run)
        }

        /// Liquidates the given troves in order, skipping ineligible ones.
        ///
        /// # Panics
        /// * If `trove_ids` is empty or nothing gets liquidated.
        /// * If the run would liquidate the last active trove.
        pub fn batch_liquidate(
            &mut self,
            trove_ids: Vec<NonFungibleLocalId>,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            assert!(
                !trove_ids.is_empty(),
                "Calldata address array must not be empty"
            );
            let mut run = self.start_liquidation_run(price);

            for trove_id in trove_ids {
                self.try_liquidate(local_id_to_u64(&trove_id), price, &mut run);
            }

            self.finish_liquidation_run(run)
        }

        /// Redeems bUSD for collateral, drawing from the weakest troves above the MCR.
        ///
        /// # Arguments
        /// * `payment`: bUSD to redeem.
        /// * `amount`: The bUSD amount to redeem. Must not exceed the payment.
        /// * `first_hint`: The first trove expected to be redeemed from.
        /// * `upper_hint` / `lower_hint`: Expected neighbours of the partially redeemed trove.
        /// * `partial_nicr`: The NICR the partially redeemed trove is expected to end up with.
        /// * `max_iterations`: Maximum number of troves to touch. Zero means unbounded.
        /// * `max_fee_percentage`: The highest redemption fee rate the user accepts.
        /// * `price`: Oracle price of the collateral.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The collateral after the fee, and the unused bUSD.
        ///
        /// # Logic
        /// 1. **Checks:** Max fee between the floor and 100%, a positive amount covered by the
        ///    payment and `TCR >= MCR`.
        /// 2. **Start:** At `first_hint` if it is the weakest trove with `ICR >= MCR`, otherwise
        ///    walks up from the tail past every trove below the MCR.
        /// 3. **Walk:** Each trove is settled and redeemed for `min(remaining, debt - reserve)`,
        ///    interest first.
        ///    - A trove left with only its reserve is closed, its reserve burnt and its remaining
        ///      collateral made claimable.
        ///    - A partial redemption must land exactly on `partial_nicr` and leave the minimum net
        ///      debt. Otherwise the walk stops and the trove is left untouched.
        /// 4. **Fee:** Updates the base rate from the redeemed fraction of the supply and keeps the
        ///    fee in the treasury vault.
        /// 5. **Burn:** Burns the redeemed bUSD.
        #[allow(clippy::too_many_arguments)]
        pub fn redeem_collateral(
            &mut self,
            mut payment: Bucket,
            amount: Decimal,
            first_hint: Option<u64>,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            partial_nicr: Decimal,
            max_iterations: u64,
            max_fee_percentage: Decimal,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            require_valid_max_fee(max_fee_percentage, self.parameters.redemption_fee_floor);
            assert!(amount > Decimal::ZERO, "Amount must be larger than 0");
            assert!(
                payment.resource_address() == self.busd_manager.address()
                    && payment.amount() >= amount,
                "Insufficient bUSD supplied"
            );

            let now = now();
            assert!(
                self.tcr(price, now) >= self.parameters.mcr,
                "Cannot redeem when TCR < MCR"
            );

            let total_supply = self.circulating_busd;
            let gas_compensation = self.parameters.gas_compensation;
            let mut remaining = amount;
            let mut total_debt_redeemed = Decimal::ZERO;
            let mut total_collateral_drawn = Decimal::ZERO;
            let mut iterations: u64 = 0;

            let mut current = if self.is_valid_first_redemption_hint(first_hint, price, now) {
                first_hint
            } else {
                self.first_redeemable_trove(price, now)
            };

            while let Some(id) = current {
                if remaining.is_zero() || (max_iterations > 0 && iterations >= max_iterations) {
                    break;
                }
                iterations += 1;

                let next_up = self.sorted_troves.prev(&self.trove_nodes, id);
                let mut trove = self.trove(id);
                let position = self.position(&trove, now);
                let lot = redemption_lot(
                    remaining,
                    position.debt,
                    position.collateral,
                    gas_compensation,
                    price,
                );
                let fully_redeemed = lot.is_full(gas_compensation);

                if fully_redeemed {
                    if self.sorted_troves.size <= 1 {
                        break;
                    }
                } else if nominal_ratio(lot.new_collateral, lot.new_debt) != partial_nicr
                    || lot.new_debt - gas_compensation < self.parameters.min_net_debt
                {
                    break;
                }

                self.settle_trove(&mut trove, now);

                let (interest_paid, principal_paid) =
                    split_repayment(lot.debt_lot, trove.interest_owed);
                trove.interest_owed -= interest_paid;
                trove.principal -= principal_paid;
                trove.collateral -= lot.collateral_lot;
                self.update_bucket(trove.interest_rate, now, |bucket| {
                    bucket.remove_interest(interest_paid);
                    bucket.remove_principal(principal_paid);
                });

                if fully_redeemed {
                    self.gas_pool.take(gas_compensation).burn();
                    self.circulating_busd -= gas_compensation;
                    self.update_bucket(trove.interest_rate, now, |bucket| {
                        bucket.remove_interest(trove.interest_owed);
                        bucket.remove_principal(trove.principal);
                    });
                    self.unstake(&mut trove, now);
                    self.remove_from_list(id, &trove);

                    let surplus = trove.collateral;
                    self.surplus_vault.put(self.collateral_vault.take(surplus));

                    trove.status = TroveStatus::ClosedByRedemption;
                    trove.claimable_collateral += surplus;
                    trove.collateral = Decimal::ZERO;
                    trove.principal = Decimal::ZERO;
                    trove.interest_owed = Decimal::ZERO;
                    self.save_trove(id, &trove);
                } else {
                    self.restake(&mut trove, now);
                    self.save_trove(id, &trove);
                    let trove_resource = self.trove_nft_manager.address();
                    let nicr_of = move |trove_id: u64| stored_nicr(trove_resource, trove_id);
                    self.sorted_troves.re_insert(
                        &mut self.trove_nodes,
                        &nicr_of,
                        id,
                        nominal_ratio(trove.collateral, trove.principal + trove.interest_owed),
                        upper_hint,
                        lower_hint,
                    );
                }

                Runtime::emit_event(EventRedeemTrove {
                    trove_id: NonFungibleLocalId::integer(id),
                    debt_redeemed: lot.debt_lot,
                    collateral_redeemed: lot.collateral_lot,
                    fully_redeemed,
                });

                remaining -= lot.debt_lot;
                total_debt_redeemed += lot.debt_lot;
                total_collateral_drawn += lot.collateral_lot;
                current = next_up;
            }

            assert!(
                total_debt_redeemed > Decimal::ZERO,
                "Unable to redeem any amount"
            );

            let base_rate = self.base_rate.update_from_redemption(
                now,
                self.parameters.fee_halflife_k,
                self.parameters.redemption_spike_k,
                total_collateral_drawn,
                price,
                total_supply,
            );
            Runtime::emit_event(EventBaseRateUpdate {
                base_rate,
                last_fee_operation: now,
            });

            let collateral_fee = redemption_fee(
                redemption_rate(self.parameters.redemption_fee_floor, base_rate),
                total_collateral_drawn,
            );
            require_user_accepts_fee(collateral_fee, total_collateral_drawn, max_fee_percentage);

            let mut collateral = self.collateral_vault.take(total_collateral_drawn);
            self.treasury_vault.put(collateral.take(collateral_fee));

            payment.take(total_debt_redeemed).burn();
            self.circulating_busd -= total_debt_redeemed;

            Runtime::emit_event(EventRedemption {
                attempted_amount: amount,
                actual_amount: total_debt_redeemed,
                collateral_drawn: total_collateral_drawn,
                collateral_fee,
            });

            (collateral, payment)
        }

        /// Links the `StabilityPool` that absorbs liquidated debt.
        pub fn set_stability_pool(&mut self, stability_pool_address: ComponentAddress) {
            self.stability_pool = Some(Global::from(stability_pool_address));
        }

        /// Replaces the protocol parameters.
        ///
        /// # Panics
        /// * If the ratios are inconsistent, the interest rate exceeds its maximum, or the list
        ///   would already be over its new maximum size.
        pub fn set_parameters(&mut self, parameters: ProtocolParameters) {
            assert!(parameters.mcr > Decimal::ONE, "MCR must be above 100%");
            assert!(parameters.ccr > parameters.mcr, "CCR must be above MCR");
            assert!(
                parameters.interest_rate <= parameters.max_interest_rate,
                "Interest rate exceeds the maximum"
            );
            assert!(
                parameters.max_list_size >= self.sorted_troves.size,
                "Sorted list is full"
            );
            assert!(
                parameters.fee_halflife_k > Decimal::ZERO && parameters.fee_halflife_k <= Decimal::ONE,
                "Invalid fee decay factor"
            );

            self.sorted_troves.max_size = parameters.max_list_size;
            self.parameters = parameters.clone();

            Runtime::emit_event(EventParametersChange { parameters });
        }

        /// Takes the collected fees.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: bUSD borrowing fees and interest, and collateral redemption fees.
        pub fn take_fees(&mut self) -> (Bucket, Bucket) {
            (self.fee_vault.take_all(), self.treasury_vault.take_all())
        }

        /// A trove's current state. Ids that were never minted report `TroveStatus::Nonexistent`.
        pub fn get_trove(&self, trove_id: NonFungibleLocalId) -> TroveInfo {
            if !self.trove_nft_manager.non_fungible_exists(&trove_id) {
                return TroveInfo {
                    trove_id,
                    status: TroveStatus::Nonexistent,
                    collateral: Decimal::ZERO,
                    debt: Decimal::ZERO,
                    principal: Decimal::ZERO,
                    interest_owed: Decimal::ZERO,
                    pending_interest: Decimal::ZERO,
                    pending_collateral_reward: Decimal::ZERO,
                    pending_debt_reward: Decimal::ZERO,
                    interest_rate: 0,
                    stake: Decimal::ZERO,
                    nicr: Decimal::ZERO,
                    claimable_collateral: Decimal::ZERO,
                };
            }
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            let position = self.position(&trove, now());

            TroveInfo {
                trove_id,
                status: trove.status,
                collateral: position.collateral,
                debt: position.debt,
                principal: trove.principal,
                interest_owed: trove.interest_owed,
                pending_interest: position.pending_interest,
                pending_collateral_reward: position.pending_collateral_reward,
                pending_debt_reward: position.pending_debt_reward,
                interest_rate: trove.interest_rate,
                stake: trove.stake,
                nicr: nominal_ratio(trove.collateral, trove.principal + trove.interest_owed),
                claimable_collateral: trove.claimable_collateral,
            }
        }

        /// # Returns
        /// * `(debt, collateral, pending_debt_reward, pending_collateral_reward)`, where debt
        ///   includes unsettled interest.
        pub fn get_entire_debt_and_collateral(
            &self,
            trove_id: NonFungibleLocalId,
        ) -> (Decimal, Decimal, Decimal, Decimal) {
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            let position = self.position(&trove, now());
            (
                position.debt,
                position.collateral,
                position.pending_debt_reward,
                position.pending_collateral_reward,
            )
        }

        pub fn get_system_info(&self, price: Decimal) -> SystemInfo {
            let now = now();
            let total_collateral = self.total_collateral();
            let total_debt = self.total_debt(now);
            let tcr = collateral_ratio(total_collateral, total_debt, price);
            let base_rate = self.base_rate.decayed(now, self.parameters.fee_halflife_k);

            SystemInfo {
                total_collateral,
                total_debt,
                active_collateral: self.collateral_vault.amount(),
                default_pool_collateral: self.default_vault.amount(),
                default_pool_debt: self.default_pool_debt,
                tcr,
                recovery_mode: tcr < self.parameters.ccr,
                base_rate,
                borrowing_rate: borrowing_rate(
                    self.parameters.borrowing_fee_floor,
                    base_rate,
                    self.parameters.max_borrowing_fee,
                ),
                redemption_rate: redemption_rate(self.parameters.redemption_fee_floor, base_rate),
                trove_count: self.sorted_troves.size,
                circulating_busd: self.circulating_busd,
                rate_buckets: self.get_rate_buckets(),
            }
        }

        /// All rate buckets, accrued up to now.
        pub fn get_rate_buckets(&self) -> Vec<RateBucket> {
            let now = now();
            self.rate_buckets
                .range(0u16..)
                .map(|(_, mut bucket, _)| {
                    bucket.accrue(now);
                    bucket
                })
                .collect()
        }

        /// Up to `count` active troves with their ranking NICR, from `start` (or the head) toward
        /// the tail.
        pub fn get_sorted_troves(&self, start: Option<u64>, count: u64) -> Vec<(u64, Decimal)> {
            let trove_resource = self.trove_nft_manager.address();
            self.sorted_troves
                .collect(&self.trove_nodes, start, count)
                .into_iter()
                .map(|id| (id, stored_nicr(trove_resource, id)))
                .collect()
        }

        /// Current NICR, including everything the trove has not settled yet.
        pub fn get_nicr(&self, trove_id: NonFungibleLocalId) -> Decimal {
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            let position = self.position(&trove, now());
            nominal_ratio(position.collateral, position.debt)
        }

        pub fn get_current_icr(&self, trove_id: NonFungibleLocalId, price: Decimal) -> Decimal {
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&trove_id);
            let position = self.position(&trove, now());
            collateral_ratio(position.collateral, position.debt, price)
        }

        pub fn get_tcr(&self, price: Decimal) -> Decimal {
            self.tcr(price, now())
        }

        pub fn check_recovery_mode(&self, price: Decimal) -> bool {
            self.is_recovery_mode(price, now())
        }

        /// Whether the weakest active trove is below the MCR.
        pub fn has_undercollateralized_troves(&self, price: Decimal) -> bool {
            match self.sorted_troves.last() {
                Some(id) => self.current_icr(id, price, now()) < self.parameters.mcr,
                None => false,
            }
        }

        /// Simulates a redemption to find its hints.
        ///
        /// # Returns
        /// * `RedemptionHints`: The first trove to redeem from, the NICR the partially redeemed
        ///   trove ends up with (zero if none) and the amount that can actually be redeemed.
        ///
        /// # Logic
        /// Walks up from the weakest trove with `ICR >= MCR`, fully redeeming troves while the
        /// amount lasts. A trove that would only be partially redeemed is redeemed as far as it can
        /// keep the minimum net debt. The amount is truncated to what the walk can redeem.
        pub fn get_redemption_hints(
            &self,
            amount: Decimal,
            price: Decimal,
            max_iterations: u64,
        ) -> RedemptionHints {
            let now = now();
            let gas_compensation = self.parameters.gas_compensation;
            let first_hint = self.first_redeemable_trove(price, now);

            let mut remaining = amount;
            let mut partial_nicr = Decimal::ZERO;
            let mut iterations: u64 = 0;
            let mut troves_left = self.sorted_troves.size;
            let mut current = first_hint;

            while let Some(id) = current {
                if remaining.is_zero() || (max_iterations > 0 && iterations >= max_iterations) {
                    break;
                }
                iterations += 1;

                let position = self.position(&self.trove(id), now);
                let net_debt = position.debt - gas_compensation;

                if net_debt > remaining {
                    if net_debt > self.parameters.min_net_debt {
                        let redeemable = remaining.min(net_debt - self.parameters.min_net_debt);
                        let lot = redemption_lot(
                            redeemable,
                            position.debt,
                            position.collateral,
                            gas_compensation,
                            price,
                        );
                        partial_nicr = nominal_ratio(lot.new_collateral, lot.new_debt);
                        remaining -= redeemable;
                    }
                    break;
                }

                if troves_left <= 1 {
                    break;
                }
                troves_left -= 1;
                remaining -= net_debt;
                current = self.sorted_troves.prev(&self.trove_nodes, id);
            }

            RedemptionHints {
                first_hint,
                partial_nicr,
                truncated_amount: amount - remaining,
            }
        }

        /// Samples `num_trials` troves and returns the one ranked closest to `nicr`.
        ///
        /// # Returns
        /// * `(hint, distance, latest_seed)`
        pub fn get_approx_hint(
            &self,
            nicr: Decimal,
            num_trials: u64,
            seed: u64,
        ) -> (Option<u64>, Decimal, u64) {
            let trove_resource = self.trove_nft_manager.address();
            let nicr_of = move |trove_id: u64| stored_nicr(trove_resource, trove_id);
            let trove_at = |index: u64| *self.trove_index.get(&index).unwrap();

            self.sorted_troves.approx_hint(
                self.sorted_troves.size,
                trove_at,
                &nicr_of,
                nicr,
                num_trials,
                seed,
            )
        }

        /// The `(prev, next)` slot a trove with `nicr` would be inserted at.
        pub fn find_insert_position(
            &self,
            nicr: Decimal,
            prev_hint: Option<u64>,
            next_hint: Option<u64>,
        ) -> (Option<u64>, Option<u64>) {
            let trove_resource = self.trove_nft_manager.address();
            let nicr_of = move |trove_id: u64| stored_nicr(trove_resource, trove_id);
            self.sorted_troves
                .find_insert_position(&self.trove_nodes, &nicr_of, nicr, prev_hint, next_hint)
        }

        pub fn get_parameters(&self) -> ProtocolParameters {
            self.parameters.clone()
        }

        pub fn get_busd_address(&self) -> ResourceAddress {
            self.busd_manager.address()
        }

        #[allow(clippy::too_many_arguments)]
        fn adjust(
            &mut self,
            id: u64,
            collateral_deposit: Option<Bucket>,
            collateral_withdrawal: Decimal,
            debt_change: Decimal,
            is_debt_increase: bool,
            repayment: Option<Bucket>,
            max_fee_percentage: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            let mut trove = self.active_trove(id);
            let now = now();

            let deposit_amount = collateral_deposit
                .as_ref()
                .map(|bucket| bucket.amount())
                .unwrap_or(Decimal::ZERO);
            if let Some(deposit) = &collateral_deposit {
                assert!(
                    deposit.resource_address() == self.collateral_vault.resource_address(),
                    "Invalid collateral"
                );
            }

            assert!(
                deposit_amount.is_zero() || collateral_withdrawal.is_zero(),
                "Cannot withdraw and add collateral at the same time"
            );
            assert!(
                deposit_amount > Decimal::ZERO
                    || collateral_withdrawal > Decimal::ZERO
                    || debt_change > Decimal::ZERO,
                "There must be either a collateral change or a debt change"
            );

            let recovery_mode = self.is_recovery_mode(price, now);
            let borrowing_fee = if is_debt_increase {
                assert!(
                    debt_change > Decimal::ZERO,
                    "Debt increase requires non-zero debt change"
                );
                self.trigger_borrowing_fee(debt_change, max_fee_percentage, recovery_mode, now)
            } else {
                Decimal::ZERO
            };

            self.settle_trove(&mut trove, now);

            let old_debt = trove.principal + trove.interest_owed;
            let old_collateral = trove.collateral;
            assert!(
                collateral_withdrawal <= old_collateral,
                "Cannot withdraw more collateral than the trove holds"
            );

            let (collateral_change, is_collateral_increase) = if deposit_amount > Decimal::ZERO {
                (deposit_amount, true)
            } else {
                (collateral_withdrawal, false)
            };
            let net_debt_change = debt_change + borrowing_fee;

            let new_collateral = if is_collateral_increase {
                old_collateral + collateral_change
            } else {
                old_collateral - collateral_change
            };
            let new_debt = if is_debt_increase {
                old_debt + net_debt_change
            } else {
                old_debt - net_debt_change
            };

            let old_icr = collateral_ratio(old_collateral, old_debt, price);
            let new_icr = collateral_ratio(new_collateral, new_debt, price);

            if recovery_mode {
                assert!(
                    collateral_withdrawal.is_zero(),
                    "Operation not permitted during Recovery Mode"
                );
                if is_debt_increase {
                    assert!(
                        new_icr >= self.parameters.ccr,
                        "Operation must leave trove with ICR >= CCR"
                    );
                    assert!(
                        new_icr >= old_icr,
                        "Cannot decrease your Trove's ICR in Recovery Mode"
                    );
                }
            } else {
                assert!(
                    new_icr >= self.parameters.mcr,
                    "An operation that would result in ICR < MCR is not permitted"
                );
                let new_tcr = new_total_ratio(
                    self.total_collateral(),
                    self.total_debt(now),
                    collateral_change,
                    is_collateral_increase,
                    net_debt_change,
                    is_debt_increase,
                    price,
                );
                assert!(
                    new_tcr >= self.parameters.ccr,
                    "An operation that would result in TCR < CCR is not permitted"
                );
            }

            if debt_change > Decimal::ZERO {
                if !is_debt_increase {
                    assert!(
                        debt_change <= old_debt - self.parameters.gas_compensation,
                        "Amount repaid must not be larger than the Trove's debt"
                    );
                }
                assert!(
                    new_debt - self.parameters.gas_compensation >= self.parameters.min_net_debt,
                    "Net debt must be at least the minimum"
                );
            }

            let mut busd_out = Bucket::new(self.busd_manager.address());

            if is_debt_increase {
                trove.principal += net_debt_change;
                self.update_bucket(trove.interest_rate, now, |bucket| {
                    bucket.add_principal(net_debt_change)
                });
                if borrowing_fee > Decimal::ZERO {
                    self.fee_vault.put(self.busd_manager.mint(borrowing_fee));
                }
                busd_out.put(self.busd_manager.mint(debt_change));
                self.circulating_busd += net_debt_change;
            } else if debt_change > Decimal::ZERO {
                let Some(mut repayment) = repayment else {
                    panic!("Insufficient bUSD supplied");
                };
                assert!(
                    repayment.resource_address() == self.busd_manager.address()
                        && repayment.amount() >= debt_change,
                    "Insufficient bUSD supplied"
                );

                let (interest_paid, principal_paid) =
                    split_repayment(debt_change, trove.interest_owed);
                trove.interest_owed -= interest_paid;
                trove.principal -= principal_paid;
                self.update_bucket(trove.interest_rate, now, |bucket| {
                    bucket.remove_interest(interest_paid);
                    bucket.remove_principal(principal_paid);
                });

                repayment.take(debt_change).burn();
                self.circulating_busd -= debt_change;
                busd_out.put(repayment);
            } else if let Some(repayment) = repayment {
                busd_out.put(repayment);
            }

            let collateral_out = match collateral_deposit {
                Some(deposit) => {
                    self.collateral_vault.put(deposit);
                    Bucket::new(self.collateral_vault.resource_address())
                }
                None => self.collateral_vault.take(collateral_withdrawal),
            };

            trove.collateral = new_collateral;
            self.restake(&mut trove, now);
            self.save_trove(id, &trove);

            let trove_resource = self.trove_nft_manager.address();
            let nicr_of = move |trove_id: u64| stored_nicr(trove_resource, trove_id);
            self.sorted_troves.re_insert(
                &mut self.trove_nodes,
                &nicr_of,
                id,
                nominal_ratio(trove.collateral, trove.principal + trove.interest_owed),
                upper_hint,
                lower_hint,
            );

            Runtime::emit_event(EventAdjustTrove {
                trove_id: NonFungibleLocalId::integer(id),
                trove,
                borrowing_fee,
            });

            (collateral_out, busd_out)
        }

        /// Decays the base rate and mints the borrowing fee for `amount`. No fee in recovery mode.
        fn trigger_borrowing_fee(
            &mut self,
            amount: Decimal,
            max_fee_percentage: Decimal,
            recovery_mode: bool,
            now: i64,
        ) -> Decimal {
            if recovery_mode {
                assert!(
                    max_fee_percentage <= Decimal::ONE,
                    "Max fee percentage must less than or equal to 100%"
                );
                return Decimal::ZERO;
            }
            assert!(
                max_fee_percentage >= self.parameters.borrowing_fee_floor
                    && max_fee_percentage <= Decimal::ONE,
                "Max fee percentage must be between 0.5% and 100%"
            );

            let base_rate = self.base_rate.decay(now, self.parameters.fee_halflife_k);
            let fee = amount
                * borrowing_rate(
                    self.parameters.borrowing_fee_floor,
                    base_rate,
                    self.parameters.max_borrowing_fee,
                );
            require_user_accepts_fee(fee, amount, max_fee_percentage);
            fee
        }

        fn start_liquidation_run(&self, price: Decimal) -> LiquidationRun {
            let now = now();
            let system_debt = self.total_debt(now);
            let system_collateral = self.total_collateral();

            LiquidationRun {
                now,
                pool_remaining: self.pool_deposits(),
                system_debt,
                system_collateral,
                recovery_mode: collateral_ratio(system_collateral, system_debt, price)
                    < self.parameters.ccr,
                totals: LiquidationTotals::new(),
            }
        }

        /// Liquidates a trove if it is eligible under the run's current mode.
        ///
        /// # Returns
        /// * Whether the trove was liquidated.
        fn try_liquidate(&mut self, id: u64, price: Decimal, run: &mut LiquidationRun) -> bool {
            if !self.trove_nft_manager.non_fungible_exists(&NonFungibleLocalId::integer(id)) {
                return false;
            }
            let trove = self.trove(id);
            if trove.status != TroveStatus::Active {
                return false;
            }

            let position = self.position(&trove, run.now);
            let icr = collateral_ratio(position.collateral, position.debt, price);
            let mcr = self.parameters.mcr;
            let gas_compensation = self.parameters.gas_compensation;
            let collateral_reward = self.parameters.liquidation_collateral_reward;

            let values = if run.recovery_mode {
                if icr >= mcr && run.pool_remaining.is_zero() {
                    return false;
                }
                let tcr = collateral_ratio(run.system_collateral, run.system_debt, price);
                match recovery_mode_values(
                    position.debt,
                    position.collateral,
                    icr,
                    tcr,
                    mcr,
                    price,
                    run.pool_remaining,
                    gas_compensation,
                    collateral_reward,
                ) {
                    Some(values) => values,
                    None => return false,
                }
            } else if icr < mcr {
                normal_mode_values(
                    position.debt,
                    position.collateral,
                    run.pool_remaining,
                    gas_compensation,
                    collateral_reward,
                )
            } else {
                return false;
            };

            assert!(self.sorted_troves.size > 1, "Only one trove in the system");

            self.close_liquidated_trove(id, trove, &values, run.now);

            let was_recovery_mode = run.recovery_mode;
            run.pool_remaining -= values.debt_to_offset;
            run.system_debt -= values.debt_to_offset;
            run.system_collateral -= values.collateral_to_send_to_pool
                + values.collateral_gas_compensation
                + values.collateral_surplus;
            if run.recovery_mode {
                run.recovery_mode = collateral_ratio(run.system_collateral, run.system_debt, price)
                    < self.parameters.ccr;
            }
            run.totals.add(&values);

            Runtime::emit_event(EventLiquidateTrove {
                trove_id: NonFungibleLocalId::integer(id),
                values,
                recovery_mode: was_recovery_mode,
            });

            true
        }

        fn close_liquidated_trove(
            &mut self,
            id: u64,
            mut trove: Trove,
            values: &LiquidationValues,
            now: i64,
        ) {
            self.settle_trove(&mut trove, now);

            self.update_bucket(trove.interest_rate, now, |bucket| {
                bucket.remove_interest(trove.interest_owed);
                bucket.remove_principal(trove.principal);
            });
            self.unstake(&mut trove, now);
            self.remove_from_list(id, &trove);

            trove.status = TroveStatus::ClosedByLiquidation;
            trove.claimable_collateral += values.collateral_surplus;
            trove.collateral = Decimal::ZERO;
            trove.principal = Decimal::ZERO;
            trove.interest_owed = Decimal::ZERO;
            self.save_trove(id, &trove);
        }

        /// Moves the summed liquidation outcome between vaults and pays the liquidator.
        ///
        /// # Logic
        /// 1. Sends the pool's share of the collateral to the `StabilityPool` and burns the bUSD it
        ///    cancels.
        /// 2. Moves the redistributed collateral into the default pool and credits every rate
        ///    bucket its stake's share of the redistributed debt.
        /// 3. Moves capped surplus collateral to the surplus vault.
        /// 4. Snapshots the stakes and the collateral left in the system.
        fn finish_liquidation_run(&mut self, run: LiquidationRun) -> (Bucket, Bucket) {
            let totals = run.totals;
            assert!(totals.troves_liquidated > 0, "Nothing to liquidate");
            let values = totals.values;

            if values.debt_to_offset > Decimal::ZERO {
                let collateral = self
                    .collateral_vault
                    .take(values.collateral_to_send_to_pool);
                let cancelled_busd = match &self.stability_pool {
                    Some(pool) => self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                        pool.offset(values.debt_to_offset, collateral)
                    }),
                    None => panic!("No stability pool to offset against"),
                };
                self.circulating_busd -= cancelled_busd.amount();
                cancelled_busd.burn();
            }

            if values.debt_to_redistribute > Decimal::ZERO {
                let debt_per_stake = self.redistribution.redistribute(
                    values.debt_to_redistribute,
                    values.collateral_to_redistribute,
                    run.now,
                );
                let now = run.now;
                self.rate_buckets.range_mut(0u16..).for_each(
                    |(_rate, bucket, _next_rate): (&u16, &mut RateBucket, Option<u16>)| {
                        let share = to_decimal(debt_per_stake * PreciseDecimal::from(bucket.stake_sum));
                        bucket.accrue(now);
                        bucket.add_principal(share);
                        scrypto_avltree::IterMutControl::Continue
                    },
                );
                self.default_pool_debt += values.debt_to_redistribute;
                self.default_vault.put(
                    self.collateral_vault
                        .take(values.collateral_to_redistribute),
                );
            }

            if values.collateral_surplus > Decimal::ZERO {
                self.surplus_vault
                    .put(self.collateral_vault.take(values.collateral_surplus));
            }

            let busd_compensation = self.gas_pool.take(values.debt_gas_compensation);
            let collateral_compensation = self
                .collateral_vault
                .take(values.collateral_gas_compensation);

            self.redistribution
                .update_system_snapshots(self.total_collateral());

            Runtime::emit_event(EventLiquidation {
                troves_liquidated: totals.troves_liquidated,
                liquidated_debt: values.entire_debt,
                liquidated_collateral: values.entire_collateral,
                collateral_gas_compensation: values.collateral_gas_compensation,
                debt_gas_compensation: values.debt_gas_compensation,
            });

            (busd_compensation, collateral_compensation)
        }

        /// Whether `hint` is the weakest trove with `ICR >= MCR`.
        fn is_valid_first_redemption_hint(&self, hint: Option<u64>, price: Decimal, now: i64) -> bool {
            let Some(id) = hint else {
                return false;
            };
            if !self.sorted_troves.contains(&self.trove_nodes, id)
                || self.current_icr(id, price, now) < self.parameters.mcr
            {
                return false;
            }
            match self.sorted_troves.next(&self.trove_nodes, id) {
                None => true,
                Some(next) => self.current_icr(next, price, now) < self.parameters.mcr,
            }
        }

        /// The weakest trove with `ICR >= MCR`.
        fn first_redeemable_trove(&self, price: Decimal, now: i64) -> Option<u64> {
            let mut current = self.sorted_troves.last();
            while let Some(id) = current {
                if self.current_icr(id, price, now) >= self.parameters.mcr {
                    break;
                }
                current = self.sorted_troves.prev(&self.trove_nodes, id);
            }
            current
        }

        /// Realises a trove's interest and collects its redistribution rewards. The caller saves
        /// the trove.
        ///
        /// # Logic
        /// 1. Moves the interest accrued since the last touch into `interest_owed`, together with
        ///    the interest its pending debt earned since being redistributed, minting both into
        ///    the fee vault.
        /// 2. Moves pending collateral from the default vault and pending debt from the default pool
        ///    into the trove. The debt joins the trove's principal. Its bucket already counts it.
        /// 3. Refreshes the reward snapshots.
        fn settle_trove(&mut self, trove: &mut Trove, now: i64) {
            let settled = settle(
                trove.principal,
                trove.interest_owed,
                trove.interest_rate,
                trove.last_interest_update,
                now,
            );
            let reward_interest = self.redistribution.pending_reward_interest(
                trove.stake,
                trove.interest_rate,
                trove.reward_snapshot_debt,
                trove.reward_snapshot_debt_time,
                now,
            );
            let accrued = settled.accrued + reward_interest;
            trove.interest_owed = settled.interest_owed + reward_interest;
            trove.last_interest_update = now.max(trove.last_interest_update);
            if accrued > Decimal::ZERO {
                self.fee_vault.put(self.busd_manager.mint(accrued));
                self.circulating_busd += accrued;
            }

            let (pending_collateral, pending_debt) = self.redistribution.pending_rewards(
                trove.stake,
                trove.reward_snapshot_collateral,
                trove.reward_snapshot_debt,
            );
            if pending_debt > Decimal::ZERO {
                trove.principal += pending_debt;
                self.default_pool_debt = (self.default_pool_debt - pending_debt).max(Decimal::ZERO);
            }
            if pending_collateral > Decimal::ZERO {
                let moved = self.default_vault.take_advanced(
                    pending_collateral.min(self.default_vault.amount()),
                    WithdrawStrategy::Rounded(RoundingMode::ToZero),
                );
                trove.collateral += moved.amount();
                self.collateral_vault.put(moved);
            }

            trove.reward_snapshot_collateral = self.redistribution.l_collateral;
            trove.reward_snapshot_debt = self.redistribution.l_debt;
            trove.reward_snapshot_debt_time = self.redistribution.l_debt_time;
        }

        /// Recomputes a trove's stake from its collateral, in the totals and in its bucket.
        fn restake(&mut self, trove: &mut Trove, now: i64) {
            let old_stake = trove.stake;
            let new_stake = self.redistribution.update_stake(old_stake, trove.collateral);
            self.update_bucket(trove.interest_rate, now, |bucket| {
                bucket.replace_stake(old_stake, new_stake)
            });
            trove.stake = new_stake;
        }

        /// Drops a closing trove's stake from the totals and from its bucket.
        fn unstake(&mut self, trove: &mut Trove, now: i64) {
            let stake = trove.stake;
            self.redistribution.remove_stake(stake);
            self.update_bucket(trove.interest_rate, now, |bucket| {
                bucket.replace_stake(stake, Decimal::ZERO)
            });
            trove.stake = Decimal::ZERO;
        }

        /// A trove's current collateral and debt, without writing anything.
        fn position(&self, trove: &Trove, now: i64) -> TrovePosition {
            if trove.status != TroveStatus::Active {
                return TrovePosition {
                    collateral: trove.collateral,
                    debt: trove.principal + trove.interest_owed,
                    pending_interest: Decimal::ZERO,
                    pending_collateral_reward: Decimal::ZERO,
                    pending_debt_reward: Decimal::ZERO,
                };
            }

            let pending_interest = simple_interest(
                trove.principal,
                trove.interest_rate,
                now - trove.last_interest_update,
            ) + self.redistribution.pending_reward_interest(
                trove.stake,
                trove.interest_rate,
                trove.reward_snapshot_debt,
                trove.reward_snapshot_debt_time,
                now,
            );
            let (pending_collateral_reward, pending_debt_reward) =
                self.redistribution.pending_rewards(
                    trove.stake,
                    trove.reward_snapshot_collateral,
                    trove.reward_snapshot_debt,
                );

            TrovePosition {
                collateral: trove.collateral + pending_collateral_reward,
                debt: trove.principal + trove.interest_owed + pending_interest + pending_debt_reward,
                pending_interest,
                pending_collateral_reward,
                pending_debt_reward,
            }
        }

        fn current_icr(&self, id: u64, price: Decimal, now: i64) -> Decimal {
            let position = self.position(&self.trove(id), now);
            collateral_ratio(position.collateral, position.debt, price)
        }

        fn total_collateral(&self) -> Decimal {
            self.collateral_vault.amount() + self.default_vault.amount()
        }

        /// Debt of all buckets including pending accrual. Redistributed debt is already in them.
        fn total_debt(&self, now: i64) -> Decimal {
            self.rate_buckets
                .range(0u16..)
                .fold(Decimal::ZERO, |sum, (_, bucket, _)| {
                    sum + bucket.total_debt(now)
                })
        }

        fn tcr(&self, price: Decimal, now: i64) -> Decimal {
            collateral_ratio(self.total_collateral(), self.total_debt(now), price)
        }

        fn is_recovery_mode(&self, price: Decimal, now: i64) -> bool {
            self.tcr(price, now) < self.parameters.ccr
        }

        fn pool_deposits(&self) -> Decimal {
            match &self.stability_pool {
                Some(pool) => pool.get_total_deposits(),
                None => Decimal::ZERO,
            }
        }

        /// Accrues the bucket of `rate`, creating it if needed, and applies `update`.
        fn update_bucket(&mut self, rate: u16, now: i64, update: impl FnOnce(&mut RateBucket)) {
            if self.rate_buckets.get(&rate).is_none() {
                self.rate_buckets.insert(rate, RateBucket::new(rate, now));
            }
            let mut bucket = self.rate_buckets.get_mut(&rate).unwrap();
            bucket.accrue(now);
            update(&mut *bucket);
        }

        fn trove(&self, id: u64) -> Trove {
            self.trove_nft_manager
                .get_non_fungible_data(&NonFungibleLocalId::integer(id))
        }

        fn active_trove(&self, id: u64) -> Trove {
            let local_id = NonFungibleLocalId::integer(id);
            assert!(
                self.trove_nft_manager.non_fungible_exists(&local_id),
                "Trove does not exist or is closed"
            );
            let trove: Trove = self.trove_nft_manager.get_non_fungible_data(&local_id);
            assert!(
                trove.status == TroveStatus::Active,
                "Trove does not exist or is closed"
            );
            trove
        }

        fn save_trove(&self, id: u64, trove: &Trove) {
            let local_id = NonFungibleLocalId::integer(id);
            let manager = &self.trove_nft_manager;
            manager.update_non_fungible_data(&local_id, "collateral", trove.collateral);
            manager.update_non_fungible_data(&local_id, "principal", trove.principal);
            manager.update_non_fungible_data(&local_id, "interest_owed", trove.interest_owed);
            manager.update_non_fungible_data(&local_id, "status", trove.status);
            manager.update_non_fungible_data(&local_id, "stake", trove.stake);
            manager.update_non_fungible_data(
                &local_id,
                "last_interest_update",
                trove.last_interest_update,
            );
            manager.update_non_fungible_data(&local_id, "list_index", trove.list_index);
            manager.update_non_fungible_data(
                &local_id,
                "reward_snapshot_collateral",
                trove.reward_snapshot_collateral,
            );
            manager.update_non_fungible_data(
                &local_id,
                "reward_snapshot_debt",
                trove.reward_snapshot_debt,
            );
            manager.update_non_fungible_data(
                &local_id,
                "reward_snapshot_debt_time",
                trove.reward_snapshot_debt_time,
            );
            manager.update_non_fungible_data(
                &local_id,
                "claimable_collateral",
                trove.claimable_collateral,
            );
        }

        fn insert_into_list(
            &mut self,
            id: u64,
            nicr: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
        ) {
            let trove_resource = self.trove_nft_manager.address();
            let nicr_of = move |trove_id: u64| stored_nicr(trove_resource, trove_id);
            self.sorted_troves.insert(
                &mut self.trove_nodes,
                &nicr_of,
                id,
                nicr,
                upper_hint,
                lower_hint,
            );
        }

        /// Unlinks a trove and swap-removes it from the trove index.
        fn remove_from_list(&mut self, id: u64, trove: &Trove) {
            let last_index = self.sorted_troves.size - 1;
            if trove.list_index != last_index {
                let last_id = *self.trove_index.get(&last_index).unwrap();
                self.trove_index.insert(trove.list_index, last_id);
                self.trove_nft_manager.update_non_fungible_data(
                    &NonFungibleLocalId::integer(last_id),
                    "list_index",
                    trove.list_index,
                );
            }
            self.trove_index.remove(&last_index);
            self.sorted_troves.remove(&mut self.trove_nodes, id);
        }
    }
}
