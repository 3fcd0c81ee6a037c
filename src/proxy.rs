#![allow(deprecated)]

//! # Ballast Protocol Proxy Blueprint
//!
//! The user-facing entry point of the Ballast protocol.
//!
//! ## Responsibilities
//! - **Routing:** Forwards user calls to the `TroveManager` and the `StabilityPool`.
//! - **Authorization:** Holds the controller badges and uses them to authorize the restricted
//!   methods of both components.
//! - **Oracle Interaction:** Fetches the collateral price from the configured oracle for every
//!   operation that needs one.
//! - **Proof Handling:** Checks trove NFT and deposit receipt proofs before acting on a trove or a
//!   deposit.
//! - **Admin Functions:** Protocol parameters, the oracle, fee collection and badge management.
//! - **DApp Definition Management:** Creates the DApp Definition account of the protocol.

use crate::shared_structs::*;
use crate::stability_pool::stability_pool::*;
use crate::trove_manager::trove_manager::*;
use scrypto::prelude::*;

#[blueprint]
mod proxy {
    enable_method_auth! {
        methods {
            // Borrower operations
            open_trove => PUBLIC;
            adjust_trove => PUBLIC;
            close_trove => PUBLIC;
            claim_collateral => PUBLIC;

            // Liquidations and redemptions
            liquidate => PUBLIC;
            liquidate_sequence => PUBLIC;
            batch_liquidate => PUBLIC;
            redeem_collateral => PUBLIC;

            // Stability pool
            provide_to_sp => PUBLIC;
            withdraw_from_sp => PUBLIC;
            withdraw_collateral_gain_to_trove => PUBLIC;

            // Views
            get_price => PUBLIC;
            get_system_info => PUBLIC;
            get_current_icr => PUBLIC;
            get_redemption_hints => PUBLIC;
            get_approx_hint => PUBLIC;
            find_insert_position => PUBLIC;
            get_trove => PUBLIC;
            get_deposit_info => PUBLIC;
            get_resource_addresses => PUBLIC;

            // Admin
            receive_badges => restrict_to: [OWNER];
            send_badges => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            set_parameters => restrict_to: [OWNER];
            take_fees => restrict_to: [OWNER];
        }
    }

    struct Proxy {
        /// Controller badges used to authorize calls to the other protocol components.
        badge_vault: FungibleVault,
        oracle: Global<AnyComponent>,
        /// Method the oracle is asked for a price.
        oracle_method_name: String,
        trove_manager: Global<TroveManager>,
        stability_pool: Global<StabilityPool>,
        collateral_address: ResourceAddress,
        busd_address: ResourceAddress,
        trove_nft_manager: ResourceManager,
        deposit_receipt_manager: ResourceManager,
        dapp_def_account: Global<Account>,
    }

    impl Proxy {
        /// Instantiates the whole Ballast protocol: the Proxy, the `TroveManager` and the
        /// `StabilityPool`, with their resources and the DApp Definition account.
        ///
        /// # Arguments
        /// * `dao_owner_role_address`: The badge allowed to perform OWNER actions on the Proxy.
        /// * `oracle_address`: The price oracle.
        /// * `collateral_address`: The only accepted collateral.
        ///
        /// # Returns
        /// * `Global<Proxy>`, `Global<TroveManager>`, `Global<StabilityPool>`: The new components.
        /// * `Bucket`: One controller badge for the instantiator.
        ///
        /// # Logic
        /// 1. Allocates the Proxy address and creates the DApp Definition account.
        /// 2. Instantiates the `TroveManager`, receiving the controller badges and resources.
        /// 3. Instantiates the `StabilityPool` and links it to the `TroveManager`.
        /// 4. Sets the DApp Definition metadata and locks its owner role.
        /// 5. Globalizes the Proxy with the remaining badges in its vault.
        pub fn new(
            dao_owner_role_address: ResourceAddress,
            oracle_address: ComponentAddress,
            collateral_address: ResourceAddress,
        ) -> (Global<Proxy>, Global<TroveManager>, Global<StabilityPool>, Bucket) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Proxy::blueprint_id());

            let dapp_def_account =
                Blueprint::<Account>::create_advanced(OwnerRole::Updatable(rule!(allow_all)), None);
            let dapp_def_address = GlobalAddress::from(dapp_def_account.address());

            let (trove_manager, mut controller_badge, busd_address, trove_nft_address) =
                TroveManager::instantiate(collateral_address, dapp_def_address);
            let controller_badge_address = controller_badge.resource_address();
            let controller_badge_to_return = controller_badge.take(Decimal::ONE);

            let owner_role_access_rule = rule!(
                require_amount(dec!("0.75"), dao_owner_role_address)
                    || require_amount(dec!("0.75"), controller_badge_address)
            );
            let owner_role = OwnerRole::Fixed(owner_role_access_rule.clone());

            let (stability_pool, deposit_receipt_address) = StabilityPool::instantiate(
                busd_address,
                collateral_address,
                trove_manager.address(),
                controller_badge_address,
                dapp_def_address,
            );

            controller_badge.authorize_with_all(|| {
                trove_manager.set_stability_pool(stability_pool.address());
            });

            dapp_def_account.set_metadata("account_type", String::from("dapp definition"));
            dapp_def_account.set_metadata("name", "Ballast Protocol".to_string());
            dapp_def_account.set_metadata(
                "description",
                "Ballast lets you borrow bUSD against your collateral.".to_string(),
            );
            dapp_def_account.set_metadata(
                "tags",
                vec![
                    String::from("defi"),
                    String::from("stablecoin"),
                    String::from("borrowing"),
                ],
            );
            dapp_def_account.set_metadata("dapp_category", String::from("defi"));
            dapp_def_account.set_metadata(
                "claimed_entities",
                vec![
                    GlobalAddress::from(component_address),
                    GlobalAddress::from(trove_manager.address()),
                    GlobalAddress::from(stability_pool.address()),
                    GlobalAddress::from(busd_address),
                    GlobalAddress::from(trove_nft_address),
                    GlobalAddress::from(deposit_receipt_address),
                ],
            );
            dapp_def_account.set_owner_role(owner_role_access_rule);

            let proxy = Self {
                badge_vault: FungibleVault::with_bucket(controller_badge.as_fungible()),
                oracle: Global::from(oracle_address),
                oracle_method_name: "check_price_input".to_string(),
                trove_manager,
                stability_pool,
                collateral_address,
                busd_address,
                trove_nft_manager: ResourceManager::from_address(trove_nft_address),
                deposit_receipt_manager: ResourceManager::from_address(deposit_receipt_address),
                dapp_def_account,
            }
            .instantiate()
            .prepare_to_globalize(owner_role)
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Ballast Protocol Proxy".to_string(), updatable;
                    "description" => "A proxy component for the Ballast Protocol".to_string(), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (proxy, trove_manager, stability_pool, controller_badge_to_return)
        }

        //==================================================================
        //                         ADMIN METHODS
        //==================================================================

        pub fn receive_badges(&mut self, badge_bucket: Bucket) {
            self.badge_vault.put(badge_bucket.as_fungible());
        }

        /// Sends controller badges to a component with a `receive_badges` method.
        pub fn send_badges(&mut self, amount: Decimal, receiver_address: ComponentAddress) {
            let receiver: Global<AnyComponent> = Global::from(receiver_address);
            let badge_bucket: Bucket = self.badge_vault.take(amount).into();
            receiver.call_raw("receive_badges", scrypto_args!(badge_bucket))
        }

        /// Points the Proxy at a new oracle.
        ///
        /// # Arguments
        /// * `oracle_address`: The new oracle component.
        /// * `method_name`: Its method taking `(ResourceAddress, String, String)` and returning the
        ///   price as a `Decimal`.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, method_name: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = method_name;
        }

        pub fn set_parameters(&mut self, parameters: ProtocolParameters) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_parameters(parameters)
            })
        }

        /// Takes the collected bUSD fees and collateral redemption fees.
        pub fn take_fees(&mut self) -> (Bucket, Bucket) {
            self.badge_vault
                .authorize_with_amount(dec!("0.75"), || self.trove_manager.take_fees())
        }

        //==================================================================
        //                       BORROWER OPERATIONS
        //==================================================================

        /// Opens a trove. See `TroveManager::open_trove`.
        ///
        /// # Arguments
        /// * `message` / `signature`: Signed price data passed on to the oracle.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed bUSD and the trove NFT.
        pub fn open_trove(
            &mut self,
            collateral: Bucket,
            busd_amount: Decimal,
            max_fee_percentage: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.open_trove(
                    collateral,
                    busd_amount,
                    max_fee_percentage,
                    upper_hint,
                    lower_hint,
                    price,
                )
            })
        }

        /// Adjusts the trove the proof belongs to. See `TroveManager::adjust_trove`.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: Withdrawn collateral, and borrowed bUSD or the unused repayment.
        #[allow(clippy::too_many_arguments)]
        pub fn adjust_trove(
            &mut self,
            trove_proof: NonFungibleProof,
            collateral_deposit: Option<Bucket>,
            collateral_withdrawal: Decimal,
            debt_change: Decimal,
            is_debt_increase: bool,
            repayment: Option<Bucket>,
            max_fee_percentage: Decimal,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let trove_id = self.check_trove_proof(trove_proof);
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.adjust_trove(
                    trove_id,
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
            })
        }

        /// Closes the trove the proof belongs to.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The collateral and the unused bUSD.
        pub fn close_trove(
            &mut self,
            trove_proof: NonFungibleProof,
            payment: Bucket,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let trove_id = self.check_trove_proof(trove_proof);
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.close_trove(trove_id, payment, price)
            })
        }

        /// Claims the surplus collateral of a liquidated or redeemed trove.
        pub fn claim_collateral(&mut self, trove_proof: NonFungibleProof) -> Bucket {
            let trove_id = self.check_trove_proof(trove_proof);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.claim_collateral(trove_id)
            })
        }

        //==================================================================
        //                  LIQUIDATIONS AND REDEMPTIONS
        //==================================================================

        /// Liquidates a single trove. The caller receives the gas compensation.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The bUSD reserve and the collateral share of the compensation.
        pub fn liquidate(
            &mut self,
            trove_id: NonFungibleLocalId,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.liquidate(trove_id, price)
            })
        }

        /// Liquidates up to `count` troves from the weakest upward.
        pub fn liquidate_sequence(
            &mut self,
            count: u64,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.liquidate_sequence(count, price)
            })
        }

        /// Liquidates the given troves, skipping ineligible ones.
        pub fn batch_liquidate(
            &mut self,
            trove_ids: Vec<NonFungibleLocalId>,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.batch_liquidate(trove_ids, price)
            })
        }

        /// Redeems bUSD for collateral. See `TroveManager::redeem_collateral`.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The collateral after the fee, and the unused bUSD.
        #[allow(clippy::too_many_arguments)]
        pub fn redeem_collateral(
            &mut self,
            payment: Bucket,
            amount: Decimal,
            first_hint: Option<u64>,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            partial_nicr: Decimal,
            max_iterations: u64,
            max_fee_percentage: Decimal,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.redeem_collateral(
                    payment,
                    amount,
                    first_hint,
                    upper_hint,
                    lower_hint,
                    partial_nicr,
                    max_iterations,
                    max_fee_percentage,
                    price,
                )
            })
        }

        //==================================================================
        //                         STABILITY POOL
        //==================================================================

        /// Deposits bUSD into the stability pool.
        ///
        /// # Arguments
        /// * `receipt_proof`: Proof of an existing deposit receipt, or `None` for a new deposit.
        /// * `busd`: The bUSD to deposit.
        ///
        /// # Returns
        /// * `Option<Bucket>`: The receipt of a new deposit.
        /// * `Bucket`: The collateral gain of an existing deposit.
        pub fn provide_to_sp(
            &mut self,
            receipt_proof: Option<NonFungibleProof>,
            busd: Bucket,
        ) -> (Option<Bucket>, Bucket) {
            let receipt_id = receipt_proof.map(|proof| self.check_receipt_proof(proof));

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.provide(receipt_id, busd)
            })
        }

        /// Withdraws up to `amount` from a deposit, together with its collateral gain.
        pub fn withdraw_from_sp(
            &mut self,
            receipt_proof: NonFungibleProof,
            amount: Decimal,
            message: String,
            signature: String,
        ) -> (Bucket, Bucket) {
            let receipt_id = self.check_receipt_proof(receipt_proof);
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.withdraw(receipt_id, amount, price)
            })
        }

        /// Moves a deposit's collateral gain into the depositor's trove.
        ///
        /// # Panics
        /// * If the deposit has no gain, or the trove is not active.
        /// * If the trove ends up below the MCR.
        pub fn withdraw_collateral_gain_to_trove(
            &mut self,
            receipt_proof: NonFungibleProof,
            trove_proof: NonFungibleProof,
            upper_hint: Option<u64>,
            lower_hint: Option<u64>,
            message: String,
            signature: String,
        ) {
            let receipt_id = self.check_receipt_proof(receipt_proof);
            let trove_id = self.check_trove_proof(trove_proof);
            let price = self.get_price(message, signature);

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                let collateral_gain = self.stability_pool.withdraw_collateral_gain(receipt_id);
                self.trove_manager.move_collateral_gain_to_trove(
                    trove_id,
                    collateral_gain,
                    upper_hint,
                    lower_hint,
                    price,
                )
            })
        }

        //==================================================================
        //                              VIEWS
        //==================================================================

        /// The oracle price of the collateral.
        pub fn get_price(&self, message: String, signature: String) -> Decimal {
            self.oracle.call_raw(
                &self.oracle_method_name,
                scrypto_args!(self.collateral_address, message, signature),
            )
        }

        pub fn get_system_info(&self, message: String, signature: String) -> SystemInfo {
            let price = self.get_price(message, signature);
            self.trove_manager.get_system_info(price)
        }

        pub fn get_current_icr(
            &self,
            trove_id: NonFungibleLocalId,
            message: String,
            signature: String,
        ) -> Decimal {
            let price = self.get_price(message, signature);
            self.trove_manager.get_current_icr(trove_id, price)
        }

        pub fn get_redemption_hints(
            &self,
            amount: Decimal,
            max_iterations: u64,
            message: String,
            signature: String,
        ) -> RedemptionHints {
            let price = self.get_price(message, signature);
            self.trove_manager
                .get_redemption_hints(amount, price, max_iterations)
        }

        /// Samples the sorted list for a trove close to `nicr`. See `TroveManager::get_approx_hint`.
        pub fn get_approx_hint(
            &self,
            nicr: Decimal,
            num_trials: u64,
            seed: u64,
        ) -> (Option<u64>, Decimal, u64) {
            self.trove_manager.get_approx_hint(nicr, num_trials, seed)
        }

        pub fn find_insert_position(
            &self,
            nicr: Decimal,
            prev_hint: Option<u64>,
            next_hint: Option<u64>,
        ) -> (Option<u64>, Option<u64>) {
            self.trove_manager
                .find_insert_position(nicr, prev_hint, next_hint)
        }

        pub fn get_trove(&self, trove_id: NonFungibleLocalId) -> TroveInfo {
            self.trove_manager.get_trove(trove_id)
        }

        pub fn get_deposit_info(&self, receipt_id: NonFungibleLocalId) -> DepositInfo {
            self.stability_pool.get_deposit_info(receipt_id)
        }

        /// # Returns
        /// * `(bUSD, trove NFT, deposit receipt)` resource addresses.
        pub fn get_resource_addresses(&self) -> (ResourceAddress, ResourceAddress, ResourceAddress) {
            (
                self.busd_address,
                self.trove_nft_manager.address(),
                self.deposit_receipt_manager.address(),
            )
        }

        fn check_trove_proof(&self, trove_proof: NonFungibleProof) -> NonFungibleLocalId {
            let trove_proof = trove_proof.check_with_message(
                self.trove_nft_manager.address(),
                "Incorrect proof! Are you sure this trove is yours?",
            );
            trove_proof.non_fungible::<Trove>().local_id().clone()
        }

        fn check_receipt_proof(&self, receipt_proof: NonFungibleProof) -> NonFungibleLocalId {
            let receipt_proof = receipt_proof.check_with_message(
                self.deposit_receipt_manager.address(),
                "Incorrect proof! Are you sure this deposit is yours?",
            );
            receipt_proof
                .non_fungible::<DepositReceipt>()
                .local_id()
                .clone()
        }
    }
}
