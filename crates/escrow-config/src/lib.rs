//! Configuration module for the escrow settlement service.
//!
//! Configuration is read from TOML. `${VAR}` and `${VAR:-default}` references
//! are resolved from the environment before parsing, and the parsed
//! [`Config`] is validated as a whole before the service is built.
//!
//! ## Modular Configuration Support
//!
//! A file may list `include = ["ledger.toml", "directory.toml"]`. Every
//! top-level section must appear in exactly one of the files.

#[cfg(any(test, feature = "testing"))]
pub mod builders {
	pub mod config;
}
mod loader;

use escrow_types::{Product, User};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use loader::ConfigLoader;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Upper bound for outbound ledger and gateway timeouts.
const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Main configuration structure for the escrow service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Persistence backend.
	pub storage: StorageConfig,
	/// Ledger lookups per network.
	pub ledger: LedgerConfig,
	/// Mobile-money gateway.
	pub mobile_money: MobileMoneyConfig,
	/// Settlement currency and conversion rules.
	#[serde(default)]
	pub payment: PaymentConfig,
	/// HTTP API server.
	pub api: Option<ApiConfig>,
	/// Seed records for the user directory and product catalog.
	#[serde(default)]
	pub directory: DirectoryConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	#[serde(default = "default_cleanup_interval")]
	pub cleanup_interval_seconds: u64,
}

fn default_cleanup_interval() -> u64 {
	3600
}

/// Ledger lookups, one implementation per network.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
	/// Timeout for a single lookup. An expired lookup is reported as a
	/// retryable error, never as a failed payment.
	#[serde(default = "default_request_timeout")]
	pub request_timeout_seconds: u64,
	/// Network name (as used on wallets) to implementation table. Each table
	/// names its backend with `implementation = "explorer" | "rpc" | "mock"`.
	pub networks: HashMap<String, toml::Value>,
}

impl LedgerConfig {
	/// Implementation name configured for a network.
	pub fn implementation_for(&self, network: &str) -> Option<&str> {
		self.networks
			.get(network)
			.and_then(|table| table.get("implementation"))
			.and_then(|value| value.as_str())
	}
}

/// Mobile-money gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MobileMoneyConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of gateway implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	#[serde(default = "default_request_timeout")]
	pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
	10
}

/// Currency rules applied when computing payment amounts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentConfig {
	/// Currency buyers are asked to pay in on the crypto rail.
	#[serde(default = "default_settlement_currency")]
	pub settlement_currency: String,
	/// Stablecoins accepted at par with the pegged fiat currencies.
	#[serde(default = "default_stablecoins")]
	pub stablecoins: Vec<String>,
	/// Fiat currencies the stablecoins are pegged to.
	#[serde(default = "default_price_pegs")]
	pub price_pegs: Vec<String>,
}

impl Default for PaymentConfig {
	fn default() -> Self {
		Self {
			settlement_currency: default_settlement_currency(),
			stablecoins: default_stablecoins(),
			price_pegs: default_price_pegs(),
		}
	}
}

fn default_settlement_currency() -> String {
	"USDT".to_string()
}

fn default_stablecoins() -> Vec<String> {
	["USDT", "USDC", "DAI", "BUSD"]
		.into_iter()
		.map(String::from)
		.collect()
}

fn default_price_pegs() -> Vec<String> {
	vec!["USD".to_string()]
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Shared secret the mobile-money provider sends with webhook calls.
	/// Webhooks are rejected when unset.
	pub webhook_secret: Option<String>,
	/// Allowed CORS origins. Any origin when empty.
	#[serde(default)]
	pub cors_origins: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

/// Records loaded into the directory collaborators at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DirectoryConfig {
	#[serde(default)]
	pub users: Vec<User>,
	#[serde(default)]
	pub products: Vec<Product>,
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of VAR_NAME and supports
/// `${VAR_NAME:-default_value}`. Input is limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = None;
	let resolved = re.replace_all(input, |caps: &regex::Captures| {
		let var_name = &caps[1];
		match (std::env::var(var_name), caps.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.get_or_insert_with(|| var_name.to_string());
				String::new()
			},
		}
	});

	match missing {
		Some(var_name) => Err(ConfigError::Validation(format!(
			"Environment variable '{}' not found",
			var_name
		))),
		None => Ok(resolved.into_owned()),
	}
}

fn check_timeout(section: &str, seconds: u64) -> Result<(), ConfigError> {
	if seconds == 0 || seconds > MAX_REQUEST_TIMEOUT_SECONDS {
		return Err(ConfigError::Validation(format!(
			"{}.request_timeout_seconds must be between 1 and {}",
			section, MAX_REQUEST_TIMEOUT_SECONDS
		)));
	}
	Ok(())
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates cross-field rules that serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		// Storage
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0
			|| self.storage.cleanup_interval_seconds > 86400
		{
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		// Ledger
		check_timeout("ledger", self.ledger.request_timeout_seconds)?;
		if self.ledger.networks.is_empty() {
			return Err(ConfigError::Validation(
				"At least one ledger network must be configured".into(),
			));
		}
		for network in self.ledger.networks.keys() {
			if self.ledger.implementation_for(network).is_none() {
				return Err(ConfigError::Validation(format!(
					"Ledger network '{}' must name an implementation",
					network
				)));
			}
		}

		// Mobile money
		check_timeout("mobile_money", self.mobile_money.request_timeout_seconds)?;
		if !self
			.mobile_money
			.implementations
			.contains_key(&self.mobile_money.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary mobile money gateway '{}' not found in implementations",
				self.mobile_money.primary
			)));
		}

		// Payment
		let payment = &self.payment;
		if !payment
			.stablecoins
			.iter()
			.any(|coin| coin.eq_ignore_ascii_case(&payment.settlement_currency))
		{
			return Err(ConfigError::Validation(format!(
				"Settlement currency '{}' must be one of the configured stablecoins",
				payment.settlement_currency
			)));
		}

		// Directory
		for product in &self.directory.products {
			if product.price < Decimal::ZERO {
				return Err(ConfigError::Validation(format!(
					"Product '{}' has a negative price",
					product.id
				)));
			}
			if !self.directory.users.is_empty()
				&& !self.directory.users.iter().any(|u| u.id == product.seller_id)
			{
				return Err(ConfigError::Validation(format!(
					"Product '{}' references unknown seller '{}'",
					product.id, product.seller_id
				)));
			}
		}

		Ok(())
	}
}

/// Parses TOML, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: &str = r#"
[service]
id = "escrow-test"

[storage]
primary = "memory"
[storage.implementations.memory]

[ledger]
[ledger.networks.bsc]
implementation = "mock"

[mobile_money]
primary = "mock"
[mobile_money.implementations.mock]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ESCROW_TEST_HOST", "localhost");
		std::env::set_var("ESCROW_TEST_PORT", "5432");

		let input = "host = \"${ESCROW_TEST_HOST}:${ESCROW_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("ESCROW_TEST_HOST");
		std::env::remove_var("ESCROW_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${ESCROW_MISSING_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${ESCROW_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("ESCROW_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = BASE.parse().unwrap();
		assert_eq!(config.service.id, "escrow-test");
		assert_eq!(config.ledger.request_timeout_seconds, 10);
		assert_eq!(config.storage.cleanup_interval_seconds, 3600);
		assert_eq!(config.payment.settlement_currency, "USDT");
		assert!(config.payment.stablecoins.contains(&"BUSD".to_string()));
		assert_eq!(config.ledger.implementation_for("bsc"), Some("mock"));
		assert!(config.api.is_none());
	}

	#[test]
	fn test_directory_seed_parsed() {
		let config_str = format!(
			"{}{}",
			BASE,
			r#"
[[directory.users]]
id = "seller-1"
role = "vendor"

[[directory.products]]
id = "phone-1"
seller_id = "seller-1"
price = "250.00"
"#
		);
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.directory.products[0].currency, "USD");
		assert_eq!(config.directory.products[0].price, Decimal::new(25000, 2));
	}

	#[test]
	fn test_rejects_invalid_sections() {
		let cases = [
			(BASE.replace("escrow-test", ""), "Service ID"),
			(
				BASE.replace("[ledger]", "[ledger]\nrequest_timeout_seconds = 0"),
				"ledger.request_timeout_seconds",
			),
			(
				BASE.replace("primary = \"mock\"", "primary = \"lumicash\""),
				"lumicash",
			),
			(
				BASE.replace("implementation = \"mock\"", ""),
				"must name an implementation",
			),
			(
				format!("{}\n[payment]\nsettlement_currency = \"BTC\"\n", BASE),
				"BTC",
			),
			(
				format!(
					"{}\n[[directory.users]]\nid = \"a\"\nrole = \"vendor\"\n[[directory.products]]\nid = \"p\"\nseller_id = \"b\"\nprice = \"1\"\n",
					BASE
				),
				"unknown seller",
			),
		];

		for (config_str, expected) in cases {
			let error = config_str.parse::<Config>().unwrap_err().to_string();
			assert!(error.contains(expected), "{} should mention {}", error, expected);
		}
	}
}
