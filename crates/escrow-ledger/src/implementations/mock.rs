//! Deterministic in-process ledger.
//!
//! Answers lookups from a table of scripted results and counts how many
//! lookups were made. Clones share state, so a test can keep a handle while
//! the engine owns the boxed backend.

use crate::{LedgerError, LedgerFactory, LedgerInterface, LedgerRegistry};
use async_trait::async_trait;
use escrow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
	VerificationOutcome, VerificationResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const MOCK_CONFIRMATIONS: u64 = 12;

#[derive(Default)]
struct MockState {
	results: HashMap<String, Result<VerificationResult, String>>,
	delay: Option<Duration>,
}

/// Scripted ledger backend for tests and local runs.
#[derive(Clone, Default)]
pub struct MockLedger {
	state: Arc<RwLock<MockState>>,
	calls: Arc<AtomicUsize>,
}

impl MockLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Scripts the result returned for a hash.
	pub fn set_outcome(&self, tx_hash: &str, result: VerificationResult) {
		if let Ok(mut state) = self.state.write() {
			state.results.insert(tx_hash.to_lowercase(), Ok(result));
		}
	}

	/// Scripts a confirmed transfer between two addresses.
	pub fn confirm(&self, tx_hash: &str, from: &str, to: &str, block_number: u64) {
		self.set_outcome(
			tx_hash,
			VerificationResult {
				outcome: VerificationOutcome::Confirmed,
				from_address: Some(from.to_string()),
				to_address: Some(to.to_string()),
				block_number: Some(block_number),
				confirmations: Some(MOCK_CONFIRMATIONS),
				error_message: None,
			},
		);
	}

	/// Scripts a transport failure for a hash.
	pub fn set_unavailable(&self, tx_hash: &str, message: &str) {
		if let Ok(mut state) = self.state.write() {
			state
				.results
				.insert(tx_hash.to_lowercase(), Err(message.to_string()));
		}
	}

	/// Delays every lookup, for exercising caller timeouts.
	pub fn set_delay(&self, delay: Option<Duration>) {
		if let Ok(mut state) = self.state.write() {
			state.delay = delay;
		}
	}

	/// Number of lookups served so far.
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl LedgerInterface for MockLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockLedgerSchema)
	}

	async fn lookup(&self, tx_hash: &str) -> Result<VerificationResult, LedgerError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let (scripted, delay) = {
			let state = self
				.state
				.read()
				.map_err(|_| LedgerError::Network("mock state poisoned".into()))?;
			(state.results.get(&tx_hash.to_lowercase()).cloned(), state.delay)
		};

		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		match scripted {
			Some(Ok(result)) => Ok(result),
			Some(Err(message)) => Err(LedgerError::Network(message)),
			None => Ok(VerificationResult::pending()),
		}
	}
}

/// Configuration schema for the mock backend.
pub struct MockLedgerSchema;

impl ConfigSchema for MockLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("confirmed", FieldType::Array(Box::new(FieldType::String))),
				Field::new("failed", FieldType::Array(Box::new(FieldType::String))),
			],
		);
		schema.validate(config)
	}
}

fn hashes<'a>(config: &'a toml::Value, key: &str) -> impl Iterator<Item = &'a str> {
	config
		.get(key)
		.and_then(|v| v.as_array())
		.into_iter()
		.flatten()
		.filter_map(|v| v.as_str())
}

/// Factory function to create a mock ledger.
///
/// Configuration parameters:
/// - `confirmed`: hashes reported as confirmed
/// - `failed`: hashes reported as failed
///
/// Any other hash is reported as pending.
pub fn create_ledger(config: &toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	MockLedgerSchema
		.validate(config)
		.map_err(|e| LedgerError::Configuration(e.to_string()))?;

	let ledger = MockLedger::new();
	for hash in hashes(config, "confirmed") {
		ledger.set_outcome(
			hash,
			VerificationResult {
				confirmations: Some(MOCK_CONFIRMATIONS),
				..VerificationResult::outcome(VerificationOutcome::Confirmed)
			},
		);
	}
	for hash in hashes(config, "failed") {
		ledger.set_outcome(hash, VerificationResult::failed("Transaction reverted on-chain"));
	}
	Ok(Box::new(ledger))
}

/// Registry for the mock implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_unknown_hash_is_pending() {
		let ledger = MockLedger::new();
		let result = ledger.lookup("0xunknown").await.unwrap();
		assert_eq!(result.outcome, VerificationOutcome::Pending);
		assert_eq!(ledger.calls(), 1);
	}

	#[tokio::test]
	async fn test_scripted_results_shared_between_clones() {
		let ledger = MockLedger::new();
		let handle = ledger.clone();
		handle.confirm("0xAB", "0xfrom", "0xto", 9);
		handle.set_unavailable("0xcd", "explorer down");

		let confirmed = ledger.lookup("0xab").await.unwrap();
		assert_eq!(confirmed.outcome, VerificationOutcome::Confirmed);
		assert_eq!(confirmed.block_number, Some(9));

		assert!(matches!(
			ledger.lookup("0xcd").await,
			Err(LedgerError::Network(message)) if message == "explorer down"
		));
		assert_eq!(handle.calls(), 2);
	}

	#[tokio::test]
	async fn test_factory_reads_scripted_hashes() {
		let config: toml::Value =
			toml::from_str("confirmed = [\"0x01\"]\nfailed = [\"0x02\"]").unwrap();
		let ledger = create_ledger(&config).unwrap();

		assert_eq!(
			ledger.lookup("0x01").await.unwrap().outcome,
			VerificationOutcome::Confirmed
		);
		assert_eq!(
			ledger.lookup("0x02").await.unwrap().outcome,
			VerificationOutcome::Failed
		);
	}
}
