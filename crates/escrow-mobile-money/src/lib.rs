//! Mobile-money gateway module for the escrow system.
//!
//! A buyer paying by mobile money is sent to a hosted payment page created
//! by the gateway for their phone number and the order amount. The gateway
//! hands back a payment reference which is later used to query the payment
//! status, either on demand or when the provider calls the webhook.

use async_trait::async_trait;
use escrow_types::{ConfigSchema, ImplementationRegistry, VerificationResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod lumicash;
	pub mod mock;
}

/// Errors that can occur when talking to a mobile-money gateway.
#[derive(Debug, Error)]
pub enum MobileMoneyError {
	/// Transport failure or non-success HTTP status.
	#[error("Network error: {0}")]
	Network(String),
	/// The gateway answered with something we could not interpret.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	/// The gateway does not know the payment reference.
	#[error("Unknown payment reference: {0}")]
	UnknownReference(String),
	/// The gateway refused to create the payment.
	#[error("Payment rejected: {0}")]
	Rejected(String),
	/// Invalid gateway configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A request for a hosted payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
	pub order_id: String,
	pub phone_number: String,
	pub amount: Decimal,
	pub currency: String,
}

/// A payment created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
	/// Reference used to query the payment status.
	pub reference: String,
	/// Hosted payment page for the buyer.
	pub payment_url: String,
}

/// Interface for mobile-money gateways.
#[async_trait]
pub trait MobileMoneyInterface: Send + Sync {
	/// Returns the configuration schema for this gateway.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Creates a hosted payment for the request.
	async fn create_payment(
		&self,
		request: &PaymentRequest,
	) -> Result<PaymentSession, MobileMoneyError>;

	/// Reports the status of a payment as `Confirmed`, `Pending` or `Failed`.
	async fn payment_status(&self, reference: &str)
		-> Result<VerificationResult, MobileMoneyError>;
}

/// Type alias for gateway factory functions.
pub type MobileMoneyFactory =
	fn(&toml::Value) -> Result<Box<dyn MobileMoneyInterface>, MobileMoneyError>;

/// Registry trait for gateway implementations.
pub trait MobileMoneyRegistry: ImplementationRegistry<Factory = MobileMoneyFactory> {}

/// Get all registered gateway implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, MobileMoneyFactory)> {
	use implementations::{lumicash, mock};

	vec![
		(lumicash::Registry::NAME, lumicash::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}

/// Service wrapping the configured gateway.
pub struct MobileMoneyService {
	gateway: Box<dyn MobileMoneyInterface>,
}

impl MobileMoneyService {
	pub fn new(gateway: Box<dyn MobileMoneyInterface>) -> Self {
		Self { gateway }
	}

	pub async fn create_payment(
		&self,
		request: &PaymentRequest,
	) -> Result<PaymentSession, MobileMoneyError> {
		self.gateway.create_payment(request).await
	}

	pub async fn payment_status(
		&self,
		reference: &str,
	) -> Result<VerificationResult, MobileMoneyError> {
		self.gateway.payment_status(reference).await
	}
}
