//! Deterministic in-process mobile-money gateway.
//!
//! Issues random references with a hosted page URL and reports a scripted
//! status per reference, falling back to a configurable default.

use crate::{
	MobileMoneyError, MobileMoneyFactory, MobileMoneyInterface, MobileMoneyRegistry,
	PaymentRequest, PaymentSession,
};
use async_trait::async_trait;
use escrow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
	VerificationOutcome, VerificationResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

const DEFAULT_PAYMENT_URL: &str = "https://lumicash.example.com/pay";

struct MockState {
	/// Payments created so far, by reference.
	payments: HashMap<String, PaymentRequest>,
	statuses: HashMap<String, VerificationOutcome>,
	default_status: VerificationOutcome,
	unavailable: bool,
}

/// Scripted gateway for tests and local runs.
#[derive(Clone)]
pub struct MockMobileMoney {
	state: Arc<RwLock<MockState>>,
	payment_url: String,
	calls: Arc<AtomicUsize>,
}

impl Default for MockMobileMoney {
	fn default() -> Self {
		Self::new(VerificationOutcome::Pending)
	}
}

impl MockMobileMoney {
	/// Creates a gateway reporting `default_status` for unscripted references.
	pub fn new(default_status: VerificationOutcome) -> Self {
		Self {
			state: Arc::new(RwLock::new(MockState {
				payments: HashMap::new(),
				statuses: HashMap::new(),
				default_status,
				unavailable: false,
			})),
			payment_url: DEFAULT_PAYMENT_URL.to_string(),
			calls: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Scripts the status of one reference.
	pub fn set_status(&self, reference: &str, outcome: VerificationOutcome) {
		if let Ok(mut state) = self.state.write() {
			state.statuses.insert(reference.to_string(), outcome);
		}
	}

	/// Makes every call fail with a network error.
	pub fn set_unavailable(&self, unavailable: bool) {
		if let Ok(mut state) = self.state.write() {
			state.unavailable = unavailable;
		}
	}

	/// Request recorded for a reference, if it was created here.
	pub fn payment(&self, reference: &str) -> Option<PaymentRequest> {
		self.state
			.read()
			.ok()
			.and_then(|state| state.payments.get(reference).cloned())
	}

	/// Number of gateway calls served so far.
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn check_available(&self) -> Result<(), MobileMoneyError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		match self.state.read() {
			Ok(state) if !state.unavailable => Ok(()),
			_ => Err(MobileMoneyError::Network("gateway unavailable".into())),
		}
	}
}

#[async_trait]
impl MobileMoneyInterface for MockMobileMoney {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockMobileMoneySchema)
	}

	async fn create_payment(
		&self,
		request: &PaymentRequest,
	) -> Result<PaymentSession, MobileMoneyError> {
		self.check_available()?;

		let reference = uuid::Uuid::new_v4().to_string();
		let mut state = self
			.state
			.write()
			.map_err(|_| MobileMoneyError::Network("mock state poisoned".into()))?;
		state.payments.insert(reference.clone(), request.clone());

		Ok(PaymentSession {
			payment_url: format!("{}/{}", self.payment_url, reference),
			reference,
		})
	}

	async fn payment_status(
		&self,
		reference: &str,
	) -> Result<VerificationResult, MobileMoneyError> {
		self.check_available()?;

		let state = self
			.state
			.read()
			.map_err(|_| MobileMoneyError::Network("mock state poisoned".into()))?;
		let outcome = match state.statuses.get(reference) {
			Some(outcome) => *outcome,
			None if state.payments.contains_key(reference) => state.default_status,
			None => return Err(MobileMoneyError::UnknownReference(reference.to_string())),
		};

		Ok(match outcome {
			VerificationOutcome::Failed => VerificationResult::failed("Payment declined"),
			VerificationOutcome::Error => VerificationResult::error("Gateway error"),
			other => VerificationResult::outcome(other),
		})
	}
}

/// Configuration schema for the mock gateway.
pub struct MockMobileMoneySchema;

impl ConfigSchema for MockMobileMoneySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("default_status", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some("pending" | "success" | "failed") => Ok(()),
						_ => Err("expected pending, success or failed".to_string()),
					}
				}),
				Field::new("payment_url", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a mock gateway.
///
/// Configuration parameters:
/// - `default_status`: `pending` (default), `success` or `failed`
/// - `payment_url`: base of the hosted page URLs
pub fn create_gateway(
	config: &toml::Value,
) -> Result<Box<dyn MobileMoneyInterface>, MobileMoneyError> {
	MockMobileMoneySchema
		.validate(config)
		.map_err(|e| MobileMoneyError::Configuration(e.to_string()))?;

	let default_status = match config.get("default_status").and_then(|v| v.as_str()) {
		Some("success") => VerificationOutcome::Confirmed,
		Some("failed") => VerificationOutcome::Failed,
		_ => VerificationOutcome::Pending,
	};
	let mut gateway = MockMobileMoney::new(default_status);
	if let Some(url) = config.get("payment_url").and_then(|v| v.as_str()) {
		gateway.payment_url = url.trim_end_matches('/').to_string();
	}
	Ok(Box::new(gateway))
}

/// Registry for the mock implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = MobileMoneyFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl MobileMoneyRegistry for Registry {}
