//! Block-explorer backed ledger lookups.
//!
//! Talks to Etherscan-family APIs (BscScan by default). Receipt status comes
//! from `module=transaction&action=gettxreceiptstatus`; sender, recipient and
//! block come from the `eth_getTransactionByHash` proxy call. The explorer
//! does not report confirmation depth, so a fixed per-network count is
//! attached to confirmed transactions.

use crate::{LedgerError, LedgerFactory, LedgerInterface, LedgerRegistry};
use async_trait::async_trait;
use escrow_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError, VerificationOutcome, VerificationResult,
};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.bscscan.com/api";
const DEFAULT_CONFIRMATIONS: u64 = 12;
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Receipt status as reported by the explorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiptStatus {
	/// Unknown or not yet mined.
	Pending,
	Success,
	Failure,
}

/// Transaction fields read from the proxy endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TransactionDetails {
	from: Option<String>,
	to: Option<String>,
	block_number: Option<u64>,
}

/// Explorer API ledger backend.
pub struct ExplorerLedger {
	client: reqwest::Client,
	api_url: String,
	api_key: Option<String>,
	confirmations: u64,
}

impl ExplorerLedger {
	pub fn new(
		api_url: impl Into<String>,
		api_key: Option<String>,
		confirmations: u64,
		timeout: Duration,
	) -> Result<Self, LedgerError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| LedgerError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			client,
			api_url: api_url.into(),
			api_key,
			confirmations,
		})
	}

	async fn query(&self, module: &str, action: &str, tx_hash: &str) -> Result<Value, LedgerError> {
		let mut params = vec![("module", module), ("action", action), ("txhash", tx_hash)];
		if let Some(api_key) = self.api_key.as_deref() {
			params.push(("apikey", api_key));
		}

		let response = self
			.client
			.get(&self.api_url)
			.query(&params)
			.send()
			.await
			.map_err(|e| LedgerError::Network(e.to_string()))?;

		if !response.status().is_success() {
			return Err(LedgerError::Network(format!(
				"Explorer returned HTTP {}",
				response.status()
			)));
		}

		response
			.json::<Value>()
			.await
			.map_err(|e| LedgerError::MalformedResponse(e.to_string()))
	}
}

/// Interprets a `gettxreceiptstatus` response.
///
/// An empty receipt status means the explorer has no receipt yet.
fn parse_receipt_status(body: &Value) -> Result<ReceiptStatus, LedgerError> {
	match body.get("status").and_then(Value::as_str) {
		Some("1") => {},
		Some("0") => {
			let reason = body
				.get("result")
				.and_then(Value::as_str)
				.or_else(|| body.get("message").and_then(Value::as_str))
				.unwrap_or("unknown explorer error");
			return Err(LedgerError::Network(reason.to_string()));
		},
		_ => {
			return Err(LedgerError::MalformedResponse(
				"missing top-level status".into(),
			))
		},
	}

	match body
		.get("result")
		.and_then(|result| result.get("status"))
		.and_then(Value::as_str)
	{
		Some("1") => Ok(ReceiptStatus::Success),
		Some("0") => Ok(ReceiptStatus::Failure),
		Some("") => Ok(ReceiptStatus::Pending),
		other => Err(LedgerError::MalformedResponse(format!(
			"unexpected receipt status {:?}",
			other
		))),
	}
}

/// Interprets an `eth_getTransactionByHash` proxy response.
fn parse_transaction(body: &Value) -> Result<Option<TransactionDetails>, LedgerError> {
	if let Some(error) = body.get("error") {
		return Err(LedgerError::Network(error.to_string()));
	}

	let result = match body.get("result") {
		None | Some(Value::Null) => return Ok(None),
		Some(result) if result.is_object() => result,
		Some(other) => {
			return Err(LedgerError::MalformedResponse(format!(
				"unexpected transaction result: {}",
				other
			)))
		},
	};

	let field = |name: &str| {
		result
			.get(name)
			.and_then(Value::as_str)
			.filter(|value| !value.is_empty())
			.map(str::to_string)
	};

	let block_number = field("blockNumber")
		.map(|hex| {
			u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| {
				LedgerError::MalformedResponse(format!("invalid blockNumber {}: {}", hex, e))
			})
		})
		.transpose()?;

	Ok(Some(TransactionDetails {
		from: field("from"),
		to: field("to"),
		block_number,
	}))
}

fn build_result(
	status: ReceiptStatus,
	details: TransactionDetails,
	confirmations: u64,
) -> VerificationResult {
	let outcome = match status {
		ReceiptStatus::Pending => return VerificationResult::pending(),
		ReceiptStatus::Success => VerificationOutcome::Confirmed,
		ReceiptStatus::Failure => VerificationOutcome::Failed,
	};
	VerificationResult {
		outcome,
		from_address: details.from,
		to_address: details.to,
		block_number: details.block_number,
		confirmations: (status == ReceiptStatus::Success).then_some(confirmations),
		error_message: (status == ReceiptStatus::Failure)
			.then(|| "Transaction reverted on-chain".to_string()),
	}
}

#[async_trait]
impl LedgerInterface for ExplorerLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(ExplorerLedgerSchema)
	}

	async fn lookup(&self, tx_hash: &str) -> Result<VerificationResult, LedgerError> {
		let receipt = self
			.query("transaction", "gettxreceiptstatus", tx_hash)
			.await?;
		let status = parse_receipt_status(&receipt)?;
		tracing::debug!(tx_hash = %truncate_id(tx_hash), ?status, "Explorer receipt status");

		if status == ReceiptStatus::Pending {
			return Ok(VerificationResult::pending());
		}

		let transaction = self
			.query("proxy", "eth_getTransactionByHash", tx_hash)
			.await?;
		let details = parse_transaction(&transaction)?.unwrap_or_default();
		Ok(build_result(status, details, self.confirmations))
	}
}

/// Configuration schema for the explorer backend.
pub struct ExplorerLedgerSchema;

impl ConfigSchema for ExplorerLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("api_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						_ => Err("api_url must be an http(s) URL".to_string()),
					}
				}),
				Field::new("api_key", FieldType::String),
				Field::new(
					"confirmations",
					FieldType::Integer {
						min: Some(1),
						max: Some(1000),
					},
				),
				Field::new(
					"request_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(60),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an explorer ledger backend.
///
/// Configuration parameters:
/// - `api_url`: explorer endpoint (default: BscScan)
/// - `api_key`: optional API key; empty means none
/// - `confirmations`: count reported for confirmed transactions (default: 12)
/// - `request_timeout_seconds`: HTTP timeout (default: 10)
pub fn create_ledger(config: &toml::Value) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	ExplorerLedgerSchema
		.validate(config)
		.map_err(|e| LedgerError::Configuration(e.to_string()))?;

	let api_url = config
		.get("api_url")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_API_URL);
	let api_key = config
		.get("api_key")
		.and_then(|v| v.as_str())
		.filter(|key| !key.is_empty())
		.map(str::to_string);
	let confirmations = config
		.get("confirmations")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_CONFIRMATIONS);
	let timeout = config
		.get("request_timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(ExplorerLedger::new(
		api_url,
		api_key,
		confirmations,
		Duration::from_secs(timeout),
	)?))
}

/// Registry for the explorer implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "explorer";
	type Factory = LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_receipt_status_values() {
		let body = json!({"status": "1", "message": "OK", "result": {"status": "1"}});
		assert_eq!(parse_receipt_status(&body).unwrap(), ReceiptStatus::Success);

		let body = json!({"status": "1", "message": "OK", "result": {"status": "0"}});
		assert_eq!(parse_receipt_status(&body).unwrap(), ReceiptStatus::Failure);

		let body = json!({"status": "1", "message": "OK", "result": {"status": ""}});
		assert_eq!(parse_receipt_status(&body).unwrap(), ReceiptStatus::Pending);
	}

	#[test]
	fn test_receipt_status_errors() {
		let body = json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"});
		assert!(matches!(
			parse_receipt_status(&body),
			Err(LedgerError::Network(reason)) if reason.contains("rate limit")
		));

		let body = json!({"message": "OK"});
		assert!(matches!(
			parse_receipt_status(&body),
			Err(LedgerError::MalformedResponse(_))
		));
	}

	#[test]
	fn test_parse_transaction() {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"result": {
				"blockNumber": "0x2a",
				"from": "0x1111111111111111111111111111111111111111",
				"to": "0x55d398326f99059ff775485246999027b3197955"
			}
		});
		let details = parse_transaction(&body).unwrap().unwrap();
		assert_eq!(details.block_number, Some(42));
		assert_eq!(
			details.from.as_deref(),
			Some("0x1111111111111111111111111111111111111111")
		);

		let body = json!({"jsonrpc": "2.0", "id": 1, "result": null});
		assert_eq!(parse_transaction(&body).unwrap(), None);

		let body = json!({"result": {"blockNumber": "0xzz"}});
		assert!(parse_transaction(&body).is_err());
	}

	#[test]
	fn test_build_result() {
		let details = TransactionDetails {
			from: Some("0xfrom".into()),
			to: Some("0xto".into()),
			block_number: Some(7),
		};

		let confirmed = build_result(ReceiptStatus::Success, details.clone(), 12);
		assert_eq!(confirmed.outcome, VerificationOutcome::Confirmed);
		assert_eq!(confirmed.confirmations, Some(12));
		assert_eq!(confirmed.block_number, Some(7));

		let failed = build_result(ReceiptStatus::Failure, details, 12);
		assert_eq!(failed.outcome, VerificationOutcome::Failed);
		assert_eq!(failed.confirmations, None);
		assert!(failed.error_message.is_some());
	}

	#[test]
	fn test_factory_defaults_and_validation() {
		let config: toml::Value = toml::from_str("implementation = \"explorer\"").unwrap();
		assert!(create_ledger(&config).is_ok());

		let config: toml::Value = toml::from_str("api_url = \"ftp://nope\"").unwrap();
		assert!(matches!(
			create_ledger(&config),
			Err(LedgerError::Configuration(_))
		));
	}
}
