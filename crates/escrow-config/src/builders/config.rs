//! Configuration builder for tests and local development.
//!
//! Produces a [`Config`] wired to the in-memory storage, the mock ledger and
//! the mock mobile-money gateway, so engines can be built without network
//! access or files on disk.

use crate::{
	ApiConfig, Config, DirectoryConfig, LedgerConfig, MobileMoneyConfig, PaymentConfig,
	ServiceConfig, StorageConfig,
};
use escrow_types::{Product, User};
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	ledger_networks: HashMap<String, toml::Value>,
	ledger_timeout_seconds: u64,
	mobile_money: toml::Value,
	mobile_money_timeout_seconds: u64,
	payment: PaymentConfig,
	api: Option<ApiConfig>,
	users: Vec<User>,
	products: Vec<Product>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

fn mock_network() -> toml::Value {
	let mut table = toml::map::Map::new();
	table.insert("implementation".into(), toml::Value::String("mock".into()));
	toml::Value::Table(table)
}

impl ConfigBuilder {
	/// Defaults: memory storage, a mock `bsc` ledger, mock mobile money.
	pub fn new() -> Self {
		Self {
			service_id: "escrow-test".to_string(),
			ledger_networks: HashMap::from([("bsc".to_string(), mock_network())]),
			ledger_timeout_seconds: 10,
			mobile_money: empty_table(),
			mobile_money_timeout_seconds: 10,
			payment: PaymentConfig::default(),
			api: None,
			users: Vec::new(),
			products: Vec::new(),
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Replaces the table for one ledger network.
	pub fn ledger_network(mut self, network: impl Into<String>, table: toml::Value) -> Self {
		self.ledger_networks.insert(network.into(), table);
		self
	}

	pub fn ledger_timeout_seconds(mut self, seconds: u64) -> Self {
		self.ledger_timeout_seconds = seconds;
		self
	}

	/// Sets the table for the mock mobile-money gateway.
	pub fn mobile_money(mut self, table: toml::Value) -> Self {
		self.mobile_money = table;
		self
	}

	pub fn mobile_money_timeout_seconds(mut self, seconds: u64) -> Self {
		self.mobile_money_timeout_seconds = seconds;
		self
	}

	pub fn payment(mut self, payment: PaymentConfig) -> Self {
		self.payment = payment;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn user(mut self, user: User) -> Self {
		self.users.push(user);
		self
	}

	pub fn product(mut self, product: Product) -> Self {
		self.products.push(product);
		self
	}

	/// Builds the `Config` with the configured values.
	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
			},
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: HashMap::from([("memory".to_string(), empty_table())]),
				cleanup_interval_seconds: 60,
			},
			ledger: LedgerConfig {
				request_timeout_seconds: self.ledger_timeout_seconds,
				networks: self.ledger_networks,
			},
			mobile_money: MobileMoneyConfig {
				primary: "mock".to_string(),
				implementations: HashMap::from([("mock".to_string(), self.mobile_money)]),
				request_timeout_seconds: self.mobile_money_timeout_seconds,
			},
			payment: self.payment,
			api: self.api,
			directory: DirectoryConfig {
				users: self.users,
				products: self.products,
			},
		}
	}
}
