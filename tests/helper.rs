#![allow(dead_code)]

use ballast_protocol::proxy::proxy_test::*;
use ballast_protocol::shared_structs::*;
use ballast_protocol::stability_pool::stability_pool_test::*;
use ballast_protocol::trove_manager::trove_manager_test::*;
use dummy_oracle_component::oracle_test::*;
use scrypto_test::prelude::*;

pub struct Helper {
    pub env: TestEnvironment<InMemorySubstateDatabase>,
    pub package_address: PackageAddress,
    pub admin: Bucket,
    pub admin_address: ResourceAddress,
    pub collateral: Bucket,
    pub collateral_address: ResourceAddress,
    pub busd_address: ResourceAddress,
    pub trove_address: ResourceAddress,
    pub receipt_address: ResourceAddress,
    pub controller_badge: Bucket,
    pub proxy: Proxy,
    pub trove_manager: TroveManager,
    pub stability_pool: StabilityPool,
    pub dummy_oracle: Oracle,
}

impl Helper {
    pub fn new() -> Result<Self, RuntimeError> {
        let mut env = TestEnvironmentBuilder::new().build();

        let collateral = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;
        let admin = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;

        let collateral_address = collateral.resource_address(&mut env)?;
        let admin_address = admin.resource_address(&mut env)?;

        let dummy_oracle_package_address = PackageFactory::compile_and_publish(
            "./dummy_oracle_component",
            &mut env,
            CompileProfile::Standard,
        )?;

        let dummy_oracle = Oracle::instantiate_oracle(
            collateral_address,
            dec!(1000),
            dummy_oracle_package_address,
            &mut env,
        )?;

        let package_address = PackageFactory::compile_and_publish(
            this_package!(),
            &mut env,
            CompileProfile::Standard,
        )?;

        let (mut proxy, trove_manager, stability_pool, controller_badge) = Proxy::new(
            admin_address,
            ComponentAddress::try_from(dummy_oracle.0.clone()).unwrap(),
            collateral_address,
            package_address,
            &mut env,
        )?;

        let (busd_address, trove_address, receipt_address) =
            proxy.get_resource_addresses(&mut env)?;

        Ok(Self {
            env,
            package_address,
            admin: admin.into(),
            admin_address,
            collateral: collateral.into(),
            collateral_address,
            busd_address,
            trove_address,
            receipt_address,
            controller_badge,
            proxy,
            trove_manager: TroveManager(*trove_manager.as_node_id()),
            stability_pool: StabilityPool(*stability_pool.as_node_id()),
            dummy_oracle: Oracle(dummy_oracle.0),
        })
    }

    /////////////////////////////////////////////////
    //////////////////// PROXY///////////////////////
    /////////////////////////////////////////////////

    /// Opens a trove with `collateral_amount` collateral, accepting up to a 5% fee.
    pub fn open_trove(
        &mut self,
        collateral_amount: Decimal,
        busd_amount: Decimal,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let collateral = self.collateral.take(collateral_amount, &mut self.env)?;

        self.proxy.open_trove(
            collateral,
            busd_amount,
            dec!("0.05"),
            None,
            None,
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    pub fn close_trove(
        &mut self,
        trove_nft: &Bucket,
        payment: Bucket,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let trove_proof = NonFungibleProof(trove_nft.create_proof_of_all(&mut self.env)?);
        self.proxy.close_trove(
            trove_proof,
            payment,
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    pub fn claim_collateral(&mut self, trove_nft: &Bucket) -> Result<Bucket, RuntimeError> {
        let trove_proof = NonFungibleProof(trove_nft.create_proof_of_all(&mut self.env)?);
        self.proxy.claim_collateral(trove_proof, &mut self.env)
    }

    pub fn liquidate(&mut self, trove_id: u64) -> Result<(Bucket, Bucket), RuntimeError> {
        self.proxy.liquidate(
            NonFungibleLocalId::integer(trove_id),
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    /// Deposits into the stability pool, topping up `receipt` if given.
    pub fn provide(
        &mut self,
        receipt: Option<&Bucket>,
        busd: Bucket,
    ) -> Result<(Option<Bucket>, Bucket), RuntimeError> {
        let receipt_proof = match receipt {
            Some(receipt) => Some(NonFungibleProof(
                receipt.create_proof_of_all(&mut self.env)?,
            )),
            None => None,
        };
        self.proxy.provide_to_sp(receipt_proof, busd, &mut self.env)
    }

    pub fn withdraw_from_sp(
        &mut self,
        receipt: &Bucket,
        amount: Decimal,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let receipt_proof = NonFungibleProof(receipt.create_proof_of_all(&mut self.env)?);
        self.proxy.withdraw_from_sp(
            receipt_proof,
            amount,
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    /// Redeems `amount` using the hints the protocol computes itself.
    pub fn redeem(
        &mut self,
        payment: Bucket,
        amount: Decimal,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let hints = self.get_redemption_hints(amount)?;
        self.proxy.redeem_collateral(
            payment,
            hints.truncated_amount,
            hints.first_hint,
            None,
            None,
            hints.partial_nicr,
            0,
            Decimal::ONE,
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    /////////////////////////////////////////////////
    ///////////////// BALLAST GETTERS ///////////////
    /////////////////////////////////////////////////

    pub fn get_trove(&mut self, trove_id: u64) -> Result<TroveInfo, RuntimeError> {
        self.trove_manager
            .get_trove(NonFungibleLocalId::integer(trove_id), &mut self.env)
    }

    pub fn get_system_info(&mut self) -> Result<SystemInfo, RuntimeError> {
        self.proxy
            .get_system_info("".to_string(), "".to_string(), &mut self.env)
    }

    pub fn get_redemption_hints(&mut self, amount: Decimal) -> Result<RedemptionHints, RuntimeError> {
        self.proxy.get_redemption_hints(
            amount,
            0,
            "".to_string(),
            "".to_string(),
            &mut self.env,
        )
    }

    pub fn get_deposit_info(&mut self, receipt_id: u64) -> Result<DepositInfo, RuntimeError> {
        self.stability_pool
            .get_deposit_info(NonFungibleLocalId::integer(receipt_id), &mut self.env)
    }

    /// Trove ids from the strongest trove down to the weakest.
    pub fn get_sorted_ids(&mut self) -> Result<Vec<u64>, RuntimeError> {
        let troves = self
            .trove_manager
            .get_sorted_troves(None, 100, &mut self.env)?;
        Ok(troves.into_iter().map(|(id, _)| id).collect())
    }

    /////////////////////////////////////////////////
    //////////////////// TEST HELPERS ///////////////
    /////////////////////////////////////////////////

    pub fn change_collateral_price(&mut self, price: Decimal) -> Result<(), RuntimeError> {
        self.env.disable_auth_module();
        self.dummy_oracle
            .set_price(self.collateral_address, price, &mut self.env)?;
        self.env.enable_auth_module();

        Ok(())
    }

    pub fn advance_days(&mut self, days: i64) {
        let new_time = self.env.get_current_time().add_days(days).unwrap();
        self.env.set_current_time(new_time);
    }

    pub fn assert_bucket_eq(
        &mut self,
        bucket: &Bucket,
        address: ResourceAddress,
        amount: Decimal,
    ) -> Result<(), RuntimeError> {
        assert_eq!(bucket.resource_address(&mut self.env)?, address);
        assert_eq!(bucket.amount(&mut self.env)?, amount);

        Ok(())
    }
}

/// Asserts that two amounts differ by less than `1e-12`.
pub fn assert_close(actual: Decimal, expected: Decimal) {
    let difference = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        difference < dec!("0.000000000001"),
        "Expected {}, got {}",
        expected,
        actual
    );
}
