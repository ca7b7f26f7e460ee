//! Dynamic factory registry for escrow implementations.
//!
//! Collects the factory of every storage, ledger and mobile-money
//! implementation once, then hands the builder only the factories the
//! configuration actually names.

use escrow_config::Config;
use escrow_core::{EscrowBuilder, EscrowEngine, EscrowFactories};
use escrow_ledger::LedgerFactory;
use escrow_mobile_money::MobileMoneyFactory;
use escrow_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub ledger: HashMap<String, LedgerFactory>,
	pub mobile_money: HashMap<String, MobileMoneyFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			ledger: HashMap::new(),
			mobile_money: HashMap::new(),
		}
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Get the global factory registry, filling it on first use
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in escrow_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.storage.insert(name.to_string(), factory);
		}

		for (name, factory) in escrow_ledger::get_all_implementations() {
			tracing::debug!("Registering ledger implementation: {}", name);
			registry.ledger.insert(name.to_string(), factory);
		}

		for (name, factory) in escrow_mobile_money::get_all_implementations() {
			tracing::debug!("Registering mobile-money implementation: {}", name);
			registry.mobile_money.insert(name.to_string(), factory);
		}

		registry
	})
}

/// Picks the registered factories for the given implementation names,
/// failing on the first unknown name.
macro_rules! build_factories {
	($registry:expr, $names:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $names {
			let name: &str = name.as_ref();
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.to_string(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Build the engine using the registry and config
pub async fn build_engine_from_config(
	config: Config,
) -> Result<EscrowEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations.keys(), storage, "storage");
	let ledger_factories = build_factories!(
		registry,
		config
			.ledger
			.networks
			.keys()
			.filter_map(|network| config.ledger.implementation_for(network)),
		ledger,
		"ledger"
	);
	let mobile_money_factories = build_factories!(
		registry,
		config.mobile_money.implementations.keys(),
		mobile_money,
		"mobile-money"
	);

	let factories = EscrowFactories {
		storage_factories,
		ledger_factories,
		mobile_money_factories,
	};

	Ok(EscrowBuilder::new(config).build(factories).await?)
}
