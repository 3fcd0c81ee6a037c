#![allow(deprecated)]

//! # The Ballast Stability Pool Blueprint
//!
//! Holds bUSD deposited by users to absorb the debt of liquidated troves. In return depositors
//! receive the liquidated collateral, at a discount to the debt they cancel.
//!
//! ## Functionality
//! - **Deposits:** Each deposit is tracked by a receipt NFT (`DepositReceipt`). Adding to a deposit
//!   first pays out its collateral gain and compounds it.
//! - **Offsets:** The `TroveManager` cancels liquidated debt against the pool through `offset`,
//!   handing over the matching collateral. Deposits are never touched individually: the running
//!   product `P` and sums `S` (see `stability_math`) tell every deposit its share.
//! - **Withdrawals:** Withdrawing pays out the compounded deposit and the collateral gain. Non-zero
//!   withdrawals are blocked while a trove below the MCR could still be liquidated.
//!
//! ## Interaction with Other Components
//! - **`TroveManager`:** Calls `offset`, and is asked whether any trove is under-collateralized
//!   before a withdrawal.
//! - **`Proxy`:** Checks receipt ownership and supplies oracle prices.

use crate::events::*;
use crate::shared_structs::*;
use crate::stability_math::*;
use crate::trove_manager::trove_manager::TroveManager;
use scrypto::prelude::*;

/// A deposit's value at its last change, and the pool state it is measured against.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct DepositRecord {
    pub initial_value: Decimal,
    pub snapshot: PoolSnapshot,
}

#[blueprint]
#[types(u64, DepositRecord, EpochScale, PreciseDecimal, DepositReceipt)]
#[events(EventDepositChange, EventCollateralGainWithdrawn, EventOffset)]
mod stability_pool {
    enable_method_auth! {
        methods {
            provide => restrict_to: [OWNER];
            withdraw => restrict_to: [OWNER];
            withdraw_collateral_gain => restrict_to: [OWNER];
            offset => restrict_to: [OWNER];
            get_total_deposits => PUBLIC;
            get_compounded_deposit => PUBLIC;
            get_collateral_gain => PUBLIC;
            get_deposit_info => PUBLIC;
            get_pool_info => PUBLIC;
        }
    }
    struct StabilityPool {
        /// Deposited bUSD not yet used to offset debt.
        deposits: Vault,
        /// Collateral gained from offsets, owed to depositors.
        collateral_vault: Vault,
        product_sum: ProductSum,
        /// Running sums `S` per epoch and scale.
        epoch_scale_sums: KeyValueStore<EpochScale, PreciseDecimal>,
        deposit_records: KeyValueStore<u64, DepositRecord>,
        receipt_manager: ResourceManager,
        receipt_counter: u64,
        trove_manager: Global<TroveManager>,
    }

    impl StabilityPool {
        /// Instantiates the `StabilityPool` and its deposit receipt resource.
        ///
        /// # Arguments
        /// * `busd_address`: The bUSD resource.
        /// * `collateral_address`: The collateral received from offsets.
        /// * `trove_manager_address`: The `TroveManager` asked before withdrawals.
        /// * `badge_address`: The controller badge. 0.75 of it is the owner role.
        /// * `dapp_def_address`: The DApp Definition account.
        ///
        /// # Returns
        /// * `Global<StabilityPool>`: The new component.
        /// * `ResourceAddress`: The deposit receipt resource.
        pub fn instantiate(
            busd_address: ResourceAddress,
            collateral_address: ResourceAddress,
            trove_manager_address: ComponentAddress,
            badge_address: ResourceAddress,
            dapp_def_address: GlobalAddress,
        ) -> (Global<StabilityPool>, ResourceAddress) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(StabilityPool::blueprint_id());

            let owner_role = OwnerRole::Fixed(rule!(require_amount(dec!("0.75"), badge_address)));

            let receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<DepositReceipt>(
                    owner_role.clone(),
                )
                .metadata(metadata!(
                    init {
                        "name" => "Ballast Stability Deposit", locked;
                        "symbol" => "bSTAB", locked;
                        "description" => "A receipt for your bUSD stability pool deposit.", locked;
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

            let component = Self {
                deposits: Vault::new(busd_address),
                collateral_vault: Vault::new(collateral_address),
                product_sum: ProductSum::new(),
                epoch_scale_sums: KeyValueStore::new_with_registered_type(),
                deposit_records: KeyValueStore::new_with_registered_type(),
                receipt_manager,
                receipt_counter: 0,
                trove_manager: Global::from(trove_manager_address),
            }
            .instantiate()
            .prepare_to_globalize(owner_role)
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Ballast Stability Pool".to_string(), updatable;
                    "description" => "The stability pool of the Ballast Protocol".to_string(), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (component, receipt_manager.address())
        }

        /// Deposits bUSD, creating a new deposit if no receipt is given.
        ///
        /// # Arguments
        /// * `receipt_id`: The depositor's receipt, already checked by the caller. `None` opens a
        ///   new deposit.
        /// * `busd`: The bUSD to deposit.
        ///
        /// # Returns
        /// * `Option<Bucket>`: The receipt of a new deposit.
        /// * `Bucket`: The collateral gain of an existing deposit.
        ///
        /// # Logic
        /// 1. Compounds the existing deposit and pays out its collateral gain.
        /// 2. Adds the new bUSD and snapshots the pool state for the whole deposit.
        pub fn provide(
            &mut self,
            receipt_id: Option<NonFungibleLocalId>,
            busd: Bucket,
        ) -> (Option<Bucket>, Bucket) {
            assert!(
                busd.resource_address() == self.deposits.resource_address(),
                "Invalid bUSD"
            );
            let amount = busd.amount();
            assert!(amount > Decimal::ZERO, "Amount must be larger than 0");

            let (id, receipt) = match receipt_id {
                Some(receipt_id) => (local_id_to_u64(&receipt_id), None),
                None => {
                    self.receipt_counter += 1;
                    let receipt = self.receipt_manager.mint_non_fungible(
                        &NonFungibleLocalId::integer(self.receipt_counter),
                        DepositReceipt {
                            key_image_url: Url::of("https://ballast.finance/deposit.png"),
                            opened_at: Clock::current_time_rounded_to_seconds()
                                .seconds_since_unix_epoch,
                        },
                    );
                    (self.receipt_counter, Some(receipt))
                }
            };

            let (initial_value, compounded, gain) = self.deposit_state(id);
            let gain = self.pay_gain(id, gain);

            self.deposits.put(busd);
            let new_deposit = compounded + amount;
            self.update_record(id, new_deposit);

            Runtime::emit_event(EventDepositChange {
                receipt_id: NonFungibleLocalId::integer(id),
                new_deposit,
                deposit_loss: initial_value - compounded,
            });

            (receipt, gain)
        }

        /// Withdraws up to `amount` of a deposit, together with its collateral gain.
        ///
        /// # Arguments
        /// * `receipt_id`: The depositor's receipt.
        /// * `amount`: bUSD to withdraw, capped at the compounded deposit. Zero only claims the gain.
        /// * `price`: Oracle price of the collateral.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The withdrawn bUSD and the collateral gain.
        ///
        /// # Panics
        /// * If the receipt has no deposit.
        /// * If `amount` is non-zero while a trove is below the MCR.
        pub fn withdraw(
            &mut self,
            receipt_id: NonFungibleLocalId,
            amount: Decimal,
            price: Decimal,
        ) -> (Bucket, Bucket) {
            let id = local_id_to_u64(&receipt_id);
            let (initial_value, compounded, gain) = self.deposit_state(id);
            assert!(initial_value > Decimal::ZERO, "User must have a non-zero deposit");

            if amount > Decimal::ZERO {
                assert!(
                    !self.trove_manager.has_undercollateralized_troves(price),
                    "Cannot withdraw while there are troves with ICR < MCR"
                );
            }

            let gain = self.pay_gain(id, gain);

            let to_withdraw = amount.min(compounded);
            let new_deposit = compounded - to_withdraw;
            let busd = self.deposits.take_advanced(
                to_withdraw.min(self.deposits.amount()),
                WithdrawStrategy::Rounded(RoundingMode::ToZero),
            );
            self.update_record(id, new_deposit);

            Runtime::emit_event(EventDepositChange {
                receipt_id,
                new_deposit,
                deposit_loss: initial_value - compounded,
            });

            (busd, gain)
        }

        /// Withdraws only the collateral gain of a deposit, compounding the deposit.
        ///
        /// # Panics
        /// * If the receipt has no deposit or no gain.
        pub fn withdraw_collateral_gain(&mut self, receipt_id: NonFungibleLocalId) -> Bucket {
            let id = local_id_to_u64(&receipt_id);
            let (initial_value, compounded, gain) = self.deposit_state(id);
            assert!(initial_value > Decimal::ZERO, "User must have a non-zero deposit");
            assert!(
                gain > Decimal::ZERO,
                "Depositor must have a non-zero collateral gain"
            );

            let gain = self.pay_gain(id, gain);
            self.update_record(id, compounded);

            Runtime::emit_event(EventDepositChange {
                receipt_id,
                new_deposit: compounded,
                deposit_loss: initial_value - compounded,
            });

            gain
        }

        /// Cancels `debt` against the deposits and takes in the liquidated collateral.
        ///
        /// # Arguments
        /// * `debt`: Debt to cancel, capped at the total deposits.
        /// * `collateral`: Collateral paid to the depositors for the cancelled debt.
        ///
        /// # Returns
        /// * `Bucket`: The cancelled bUSD, to be burnt by the caller.
        pub fn offset(&mut self, debt: Decimal, collateral: Bucket) -> Bucket {
            let total_deposits = self.deposits.amount();
            if total_deposits.is_zero() || debt.is_zero() {
                assert!(collateral.is_empty(), "Stability pool is empty");
                collateral.drop_empty();
                return Bucket::new(self.deposits.resource_address());
            }

            let debt = debt.min(total_deposits);
            let collateral_added = collateral.amount();

            self.product_sum.offset(
                &mut self.epoch_scale_sums,
                total_deposits,
                debt,
                collateral_added,
            );
            self.collateral_vault.put(collateral);

            Runtime::emit_event(EventOffset {
                debt_offset: debt,
                collateral_added,
                p: self.product_sum.p,
                scale: self.product_sum.current_scale,
                epoch: self.product_sum.current_epoch,
            });

            self.deposits.take(debt)
        }

        pub fn get_total_deposits(&self) -> Decimal {
            self.deposits.amount()
        }

        pub fn get_compounded_deposit(&self, receipt_id: NonFungibleLocalId) -> Decimal {
            self.deposit_state(local_id_to_u64(&receipt_id)).1
        }

        pub fn get_collateral_gain(&self, receipt_id: NonFungibleLocalId) -> Decimal {
            self.deposit_state(local_id_to_u64(&receipt_id)).2
        }

        pub fn get_deposit_info(&self, receipt_id: NonFungibleLocalId) -> DepositInfo {
            let (initial_value, compounded_deposit, collateral_gain) =
                self.deposit_state(local_id_to_u64(&receipt_id));
            DepositInfo {
                receipt_id,
                initial_value,
                compounded_deposit,
                collateral_gain,
            }
        }

        pub fn get_pool_info(&self) -> StabilityPoolInfo {
            StabilityPoolInfo {
                total_deposits: self.deposits.amount(),
                collateral: self.collateral_vault.amount(),
                p: self.product_sum.p,
                current_scale: self.product_sum.current_scale,
                current_epoch: self.product_sum.current_epoch,
            }
        }

        /// # Returns
        /// * `(initial_value, compounded_deposit, collateral_gain)`, all zero without a record.
        fn deposit_state(&self, id: u64) -> (Decimal, Decimal, Decimal) {
            match self.deposit_records.get(&id) {
                Some(record) => (
                    record.initial_value,
                    self.product_sum
                        .compounded_deposit(record.initial_value, &record.snapshot),
                    self.product_sum.collateral_gain(
                        &self.epoch_scale_sums,
                        record.initial_value,
                        &record.snapshot,
                    ),
                ),
                None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            }
        }

        fn pay_gain(&mut self, id: u64, gain: Decimal) -> Bucket {
            let gain = self.collateral_vault.take_advanced(
                gain.min(self.collateral_vault.amount()),
                WithdrawStrategy::Rounded(RoundingMode::ToZero),
            );
            if !gain.is_empty() {
                Runtime::emit_event(EventCollateralGainWithdrawn {
                    receipt_id: NonFungibleLocalId::integer(id),
                    collateral_gain: gain.amount(),
                });
            }
            gain
        }

        /// Stores the new deposit value against the current pool state. Empty deposits lose their
        /// record.
        fn update_record(&mut self, id: u64, new_deposit: Decimal) {
            if new_deposit.is_zero() {
                self.deposit_records.remove(&id);
            } else {
                self.deposit_records.insert(
                    id,
                    DepositRecord {
                        initial_value: new_deposit,
                        snapshot: self.product_sum.snapshot(&self.epoch_scale_sums),
                    },
                );
            }
        }
    }
}
