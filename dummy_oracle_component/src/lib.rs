//! # Dummy Oracle Blueprint
//! Price feed for tests. Ignores the signed message and returns whatever price was set last.

use scrypto::prelude::*;

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            check_price_input => PUBLIC;
            set_price => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        prices: HashMap<ResourceAddress, Decimal>,
    }

    impl Oracle {
        pub fn instantiate_oracle(
            collateral_address: ResourceAddress,
            initial_price: Decimal,
        ) -> Global<Oracle> {
            let mut prices: HashMap<ResourceAddress, Decimal> = HashMap::new();
            prices.insert(collateral_address, initial_price);

            Self { prices }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Ballast Dummy Oracle".to_string(), updatable;
                        "description" => "A dummy oracle used for testing Ballast".to_string(), updatable;
                    }
                })
                .globalize()
        }

        pub fn check_price_input(
            &self,
            collateral: ResourceAddress,
            _message: String,
            _signature: String,
        ) -> Decimal {
            *self
                .prices
                .get(&collateral)
                .expect("Price not set for this collateral")
        }

        pub fn set_price(&mut self, collateral: ResourceAddress, price: Decimal) {
            self.prices.insert(collateral, price);
        }
    }
}
