//! Error taxonomy shared by every escrow operation.

use crate::state::{OrderStateError, TransitionError};
use escrow_storage::StorageError;
use escrow_types::{OrderError, OrderStatus};
use thiserror::Error;

/// Errors returned by the escrow engine.
///
/// Permission and validation failures are detected before anything is
/// written. External failures are retryable and never change state.
#[derive(Debug, Error)]
pub enum EscrowError {
	/// The actor may not perform the operation.
	#[error("Forbidden: {0}")]
	Forbidden(String),
	/// The order status does not allow the requested transition.
	#[error("Cannot move order from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// Order, transaction, wallet, product or user absent.
	#[error("Not found: {0}")]
	NotFound(String),
	/// The seller has no payout destination for the payment method.
	#[error("No payee channel: {0}")]
	NoPayeeChannel(String),
	/// Ledger or gateway timed out or answered with garbage. Retry later.
	#[error("External service unavailable: {0}")]
	ExternalUnavailable(String),
	/// The ledger or gateway says the payment did not succeed.
	#[error("Payment verification failed: {0}")]
	VerificationFailed(String),
	/// Malformed request input.
	#[error("Validation error: {0}")]
	Validation(String),
	/// No conversion is defined between the two currencies.
	#[error("Unsupported currency conversion from {from} to {to}")]
	UnsupportedCurrency { from: String, to: String },
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for EscrowError {
	fn from(err: StorageError) -> Self {
		EscrowError::Storage(err.to_string())
	}
}

impl From<OrderError> for EscrowError {
	fn from(err: OrderError) -> Self {
		EscrowError::Validation(err.to_string())
	}
}

impl From<TransitionError> for EscrowError {
	fn from(err: TransitionError) -> Self {
		match err {
			TransitionError::Forbidden { .. } => EscrowError::Forbidden(err.to_string()),
			TransitionError::InvalidTransition { from, to } => {
				EscrowError::InvalidTransition { from, to }
			},
		}
	}
}

impl From<OrderStateError> for EscrowError {
	fn from(err: OrderStateError) -> Self {
		match err {
			OrderStateError::NotFound(id) => EscrowError::NotFound(format!("Order {}", id)),
			OrderStateError::Storage(message) => EscrowError::Storage(message),
			OrderStateError::Transition(err) => err.into(),
		}
	}
}
