//! JSON-RPC node backed ledger lookups.
//!
//! Reads the transaction receipt straight from a node. Confirmation depth is
//! computed as `latest_block - receipt_block + 1`.

use crate::{LedgerError, LedgerFactory, LedgerInterface, LedgerRegistry};
use alloy_primitives::B256;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::TransactionReceipt;
use alloy_transport_http::Http;
use async_trait::async_trait;
use escrow_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError, VerificationOutcome, VerificationResult,
};
use std::str::FromStr;

/// Node RPC ledger backend.
pub struct RpcLedger {
	provider: RootProvider<Http<reqwest::Client>>,
}

impl RpcLedger {
	pub fn new(rpc_url: &str) -> Result<Self, LedgerError> {
		let url = rpc_url
			.parse()
			.map_err(|e| LedgerError::Configuration(format!("Invalid RPC URL: {}", e)))?;
		Ok(Self {
			provider: RootProvider::new_http(url),
		})
	}
}

/// Confirmation depth of a receipt mined at `receipt_block`.
fn confirmations(latest_block: u64, receipt_block: Option<u64>) -> Option<u64> {
	receipt_block.map(|block| latest_block.saturating_sub(block).saturating_add(1))
}

fn receipt_to_result(receipt: &TransactionReceipt, latest_block: u64) -> VerificationResult {
	let success = receipt.status();
	VerificationResult {
		outcome: if success {
			VerificationOutcome::Confirmed
		} else {
			VerificationOutcome::Failed
		},
		from_address: Some(receipt.from.to_string()),
		to_address: receipt.to.map(|to| to.to_string()),
		block_number: receipt.block_number,
		confirmations: if success {
			confirmations(latest_block, receipt.block_number)
		} else {
			None
		},
		error_message: (!success).then(|| "Transaction reverted on-chain".to_string()),
	}
}

#[async_trait]
impl LedgerInterface for RpcLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(RpcLedgerSchema)
	}

	async fn lookup(&self, tx_hash: &str) -> Result<VerificationResult, LedgerError> {
		let hash = B256::from_str(tx_hash)
			.map_err(|e| LedgerError::MalformedResponse(format!("Invalid hash: {}", e)))?;

		let receipt = match self.provider.get_transaction_receipt(hash).await {
			Ok(Some(receipt)) => receipt,
			Ok(None) => {
				tracing::debug!(tx_hash = %truncate_id(tx_hash), "No receipt yet");
				return Ok(VerificationResult::pending());
			},
			Err(e) => return Err(LedgerError::Network(format!("Failed to get receipt: {}", e))),
		};

		let latest_block = self
			.provider
			.get_block_number()
			.await
			.map_err(|e| LedgerError::Network(format!("Failed to get block number: {}", e)))?;

		Ok(receipt_to_result(&receipt, latest_block))
	}
}

/// Configuration schema for the RPC backend.
pub struct RpcLedgerSchema;

impl ConfigSchema for RpcLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("rpc_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						_ => Err("rpc_url must be an http(s) URL".to_string()),
					}
				}),
			],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create an RPC ledger backend.
///
/// Configuration parameters:
/// - `rpc_url`: HTTP JSON-RPC endpoint of a node on the network
pub fn create_ledger(config: &toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	RpcLedgerSchema
		.validate(config)
		.map_err(|e| LedgerError::Configuration(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| LedgerError::Configuration("rpc_url is required".into()))?;

	Ok(Box::new(RpcLedger::new(rpc_url)?))
}

/// Registry for the RPC implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "rpc";
	type Factory = LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}
