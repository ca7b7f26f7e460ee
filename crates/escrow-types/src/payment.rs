//! Payment attempt and verification types.
//!
//! A [`PaymentTransaction`] records one on-chain payment attempt for an order.
//! Ledger and gateway lookups are normalized into a [`VerificationResult`]
//! whose [`VerificationOutcome`] separates "the ledger said no" (`Failed`)
//! from "we could not find out" (`Error`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verification state of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
	Pending,
	Confirmed,
	Failed,
}

impl TransactionState {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, TransactionState::Pending)
	}
}

impl fmt::Display for TransactionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransactionState::Pending => f.write_str("pending"),
			TransactionState::Confirmed => f.write_str("confirmed"),
			TransactionState::Failed => f.write_str("failed"),
		}
	}
}

/// One crypto payment attempt for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
	pub id: String,
	pub order_id: String,
	/// Sender address, known once the ledger reports it.
	pub from_address: Option<String>,
	/// Payee address the buyer was instructed to pay.
	pub to_address: String,
	pub amount: Decimal,
	pub currency: String,
	pub network: String,
	/// Ledger transaction hash. Immutable once attached.
	pub tx_hash: Option<String>,
	pub state: TransactionState,
	pub confirmations: Option<u64>,
	pub block_number: Option<u64>,
	pub created_at: DateTime<Utc>,
	/// Set if and only if `state` is `Confirmed`.
	pub confirmed_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
	/// Creates a pending attempt with no hash attached.
	pub fn pending(
		id: impl Into<String>,
		order_id: impl Into<String>,
		to_address: impl Into<String>,
		amount: Decimal,
		currency: impl Into<String>,
		network: impl Into<String>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: id.into(),
			order_id: order_id.into(),
			from_address: None,
			to_address: to_address.into(),
			amount,
			currency: currency.into(),
			network: network.into(),
			tx_hash: None,
			state: TransactionState::Pending,
			confirmations: None,
			block_number: None,
			created_at: now,
			confirmed_at: None,
		}
	}
}

/// Normalized outcome of a ledger or gateway lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
	/// The payment succeeded.
	Confirmed,
	/// Not found yet or still pending. Poll again.
	Pending,
	/// The ledger reports the payment did not succeed.
	Failed,
	/// The lookup itself failed. Retry later.
	Error,
}

impl VerificationOutcome {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			VerificationOutcome::Confirmed | VerificationOutcome::Failed
		)
	}
}

impl fmt::Display for VerificationOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			VerificationOutcome::Confirmed => f.write_str("confirmed"),
			VerificationOutcome::Pending => f.write_str("pending"),
			VerificationOutcome::Failed => f.write_str("failed"),
			VerificationOutcome::Error => f.write_str("error"),
		}
	}
}

/// Result of verifying a payment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
	pub outcome: VerificationOutcome,
	pub from_address: Option<String>,
	pub to_address: Option<String>,
	pub block_number: Option<u64>,
	pub confirmations: Option<u64>,
	pub error_message: Option<String>,
}

impl VerificationResult {
	/// A result with only the outcome populated.
	pub fn outcome(outcome: VerificationOutcome) -> Self {
		Self {
			outcome,
			from_address: None,
			to_address: None,
			block_number: None,
			confirmations: None,
			error_message: None,
		}
	}

	pub fn pending() -> Self {
		Self::outcome(VerificationOutcome::Pending)
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			error_message: Some(message.into()),
			..Self::outcome(VerificationOutcome::Failed)
		}
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self {
			error_message: Some(message.into()),
			..Self::outcome(VerificationOutcome::Error)
		}
	}
}

/// What the buyer needs to pay an order out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
	/// Payment attempt id (crypto) or payment reference (mobile money).
	pub transaction_id: String,
	/// Payee wallet address or mobile-money reference.
	pub payee_channel: String,
	pub amount: Decimal,
	pub currency: String,
	pub network: String,
	/// Wallet deep link or hosted payment page URL.
	pub instruction: String,
	/// Deep links for other supported wallet applications.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub alternatives: Vec<String>,
}
