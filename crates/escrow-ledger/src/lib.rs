//! Ledger lookup module for the escrow system.
//!
//! Crypto payments are confirmed by looking up the buyer's transaction on the
//! network the payee wallet lives on. Each network is served by one backend:
//! a block-explorer HTTP API, a JSON-RPC node, or a deterministic mock.
//! Backends only report what the ledger says; timeouts and the mapping of
//! transport failures to retryable outcomes happen in the caller.

use async_trait::async_trait;
use escrow_types::{ConfigSchema, ImplementationRegistry, VerificationResult};
use std::collections::HashMap;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod explorer;
	pub mod mock;
	pub mod rpc;
}

/// Errors that can occur during ledger lookups.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// Transport failure talking to the ledger.
	#[error("Network error: {0}")]
	Network(String),
	/// The ledger answered with something we could not interpret.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	/// No backend is configured for the requested network.
	#[error("No ledger configured for network '{0}'")]
	UnsupportedNetwork(String),
	/// Invalid backend configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Interface for ledger backends.
#[async_trait]
pub trait LedgerInterface: Send + Sync {
	/// Returns the configuration schema for this backend.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Looks up a transaction by hash.
	///
	/// A transaction that is unknown or not yet mined is reported as a
	/// `Pending` result, not as an error. A mined transaction yields
	/// `Confirmed` or `Failed` according to its receipt status.
	async fn lookup(&self, tx_hash: &str) -> Result<VerificationResult, LedgerError>;
}

/// Type alias for ledger factory functions.
pub type LedgerFactory = fn(&toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError>;

/// Registry trait for ledger implementations.
pub trait LedgerRegistry: ImplementationRegistry<Factory = LedgerFactory> {}

/// Get all registered ledger implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, LedgerFactory)> {
	use implementations::{explorer, mock, rpc};

	vec![
		(explorer::Registry::NAME, explorer::Registry::factory()),
		(rpc::Registry::NAME, rpc::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}

/// Routes lookups to the backend configured for each network.
pub struct LedgerService {
	backends: HashMap<String, Box<dyn LedgerInterface>>,
}

impl LedgerService {
	/// Creates a new LedgerService keyed by network name.
	pub fn new(backends: HashMap<String, Box<dyn LedgerInterface>>) -> Self {
		Self { backends }
	}

	/// Whether a backend exists for the network.
	pub fn supports(&self, network: &str) -> bool {
		self.backends.contains_key(network)
	}

	pub fn networks(&self) -> impl Iterator<Item = &str> {
		self.backends.keys().map(String::as_str)
	}

	/// Looks up a transaction on the given network.
	pub async fn lookup(
		&self,
		network: &str,
		tx_hash: &str,
	) -> Result<VerificationResult, LedgerError> {
		let backend = self
			.backends
			.get(network)
			.ok_or_else(|| LedgerError::UnsupportedNetwork(network.to_string()))?;
		backend.lookup(tx_hash).await
	}
}
