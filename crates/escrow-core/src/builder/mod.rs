//! Builder for constructing escrow engines.
//!
//! Composes an [`EscrowEngine`] from the storage, ledger and mobile-money
//! implementations named in the configuration, using one factory function
//! per implementation name.

use crate::engine::{event_bus::EventBus, EscrowEngine};
use escrow_config::Config;
use escrow_ledger::{LedgerError, LedgerFactory, LedgerInterface, LedgerService};
use escrow_mobile_money::{
	MobileMoneyError, MobileMoneyFactory, MobileMoneyInterface, MobileMoneyService,
};
use escrow_storage::{StorageError, StorageFactory, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Capacity of the engine's event bus.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct EscrowFactories<SF, LF, MF> {
	pub storage_factories: HashMap<String, SF>,
	pub ledger_factories: HashMap<String, LF>,
	pub mobile_money_factories: HashMap<String, MF>,
}

/// Factories for every implementation shipped with the workspace.
pub fn default_factories() -> EscrowFactories<StorageFactory, LedgerFactory, MobileMoneyFactory> {
	EscrowFactories {
		storage_factories: escrow_storage::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
		ledger_factories: escrow_ledger::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
		mobile_money_factories: escrow_mobile_money::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
	}
}

/// Builder for constructing an EscrowEngine with pluggable implementations.
pub struct EscrowBuilder {
	config: Config,
}

impl EscrowBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine and seeds the directory from `[directory]`.
	pub async fn build<SF, LF, MF>(
		self,
		factories: EscrowFactories<SF, LF, MF>,
	) -> Result<EscrowEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		LF: Fn(&toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError>,
		MF: Fn(&toml::Value) -> Result<Box<dyn MobileMoneyInterface>, MobileMoneyError>,
	{
		// Storage: only the primary backend is instantiated
		let primary_storage = &self.config.storage.primary;
		let storage_config = self
			.config
			.storage
			.implementations
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' has no configuration",
					primary_storage
				))
			})?;
		let storage_factory = factories
			.storage_factories
			.get(primary_storage)
			.ok_or_else(|| BuilderError::MissingComponent(format!("storage '{}'", primary_storage)))?;
		let storage_backend = match storage_factory(storage_config) {
			Ok(backend) => {
				tracing::info!(component = "storage", implementation = %primary_storage, enabled = true, "Loaded");
				backend
			},
			Err(e) => {
				tracing::error!(
					component = "storage",
					implementation = %primary_storage,
					error = %e,
					"Failed to create storage implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create storage implementation '{}': {}",
					primary_storage, e
				)));
			},
		};
		let storage = Arc::new(StorageService::new(storage_backend));

		// Ledger: one backend per configured network
		let mut ledger_backends = HashMap::new();
		for (network, network_config) in &self.config.ledger.networks {
			let implementation = self.config.ledger.implementation_for(network).ok_or_else(|| {
				BuilderError::Config(format!("Ledger network '{}' names no implementation", network))
			})?;
			let factory = factories.ledger_factories.get(implementation).ok_or_else(|| {
				BuilderError::MissingComponent(format!("ledger '{}'", implementation))
			})?;
			match factory(network_config) {
				Ok(backend) => {
					tracing::info!(component = "ledger", network = %network, implementation = %implementation, "Loaded");
					ledger_backends.insert(network.to_lowercase(), backend);
				},
				Err(e) => {
					tracing::error!(
						component = "ledger",
						network = %network,
						error = %e,
						"Failed to create ledger implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create ledger for network '{}': {}",
						network, e
					)));
				},
			}
		}
		if ledger_backends.is_empty() {
			return Err(BuilderError::Config(
				"No ledger networks configured".to_string(),
			));
		}
		let ledger = Arc::new(LedgerService::new(ledger_backends));

		// Mobile money: the primary gateway
		let primary_gateway = &self.config.mobile_money.primary;
		let gateway_config = self
			.config
			.mobile_money
			.implementations
			.get(primary_gateway)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary mobile-money gateway '{}' has no configuration",
					primary_gateway
				))
			})?;
		let gateway_factory = factories
			.mobile_money_factories
			.get(primary_gateway)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!("mobile money '{}'", primary_gateway))
			})?;
		let gateway = gateway_factory(gateway_config).map_err(|e| {
			tracing::error!(
				component = "mobile_money",
				implementation = %primary_gateway,
				error = %e,
				"Failed to create mobile-money implementation"
			);
			BuilderError::Config(format!(
				"Failed to create mobile-money implementation '{}': {}",
				primary_gateway, e
			))
		})?;
		tracing::info!(component = "mobile_money", implementation = %primary_gateway, enabled = true, "Loaded");
		let mobile_money = Arc::new(MobileMoneyService::new(gateway));

		let engine = EscrowEngine::new(
			self.config.clone(),
			storage,
			ledger,
			mobile_money,
			EventBus::new(EVENT_BUS_CAPACITY),
		);

		engine
			.directory()
			.seed(&self.config.directory.users, &self.config.directory.products)
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to seed directory: {}", e)))?;
		tracing::info!(
			users = self.config.directory.users.len(),
			products = self.config.directory.products.len(),
			"Directory seeded"
		);

		Ok(engine)
	}
}
