//! Payment verification.
//!
//! Looks a payment reference up on the ledger or the mobile-money gateway
//! and normalizes the answer. Lookups are bounded by a timeout, and any
//! transport failure or timeout becomes an `Error` outcome, which callers
//! treat as retryable. Only the ledger or gateway itself can produce
//! `Failed`.

use escrow_ledger::LedgerService;
use escrow_mobile_money::MobileMoneyService;
use escrow_types::{truncate_id, VerificationResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Normalizing front for the ledger and gateway services.
pub struct PaymentVerifier {
	ledger: Arc<LedgerService>,
	mobile_money: Arc<MobileMoneyService>,
	ledger_timeout: Duration,
	gateway_timeout: Duration,
}

/// Runs a lookup under a timeout and folds failures into `Error` results.
async fn bounded<F, E>(timeout: Duration, lookup: F) -> VerificationResult
where
	F: Future<Output = Result<VerificationResult, E>>,
	E: std::fmt::Display,
{
	match tokio::time::timeout(timeout, lookup).await {
		Ok(Ok(result)) => result,
		Ok(Err(e)) => VerificationResult::error(e.to_string()),
		Err(_) => VerificationResult::error(format!(
			"Lookup timed out after {}s",
			timeout.as_secs()
		)),
	}
}

impl PaymentVerifier {
	pub fn new(
		ledger: Arc<LedgerService>,
		mobile_money: Arc<MobileMoneyService>,
		ledger_timeout: Duration,
		gateway_timeout: Duration,
	) -> Self {
		Self {
			ledger,
			mobile_money,
			ledger_timeout,
			gateway_timeout,
		}
	}

	/// Whether crypto payments can be verified on `network`.
	pub fn supports_network(&self, network: &str) -> bool {
		self.ledger.supports(network)
	}

	/// Verifies an on-chain transfer by transaction hash.
	pub async fn verify_crypto(&self, network: &str, tx_hash: &str) -> VerificationResult {
		let result = bounded(self.ledger_timeout, self.ledger.lookup(network, tx_hash)).await;
		tracing::debug!(
			network = %network,
			tx_hash = %truncate_id(tx_hash),
			outcome = %result.outcome,
			"Ledger lookup"
		);
		result
	}

	/// Verifies a mobile-money payment by gateway reference.
	pub async fn verify_mobile_money(&self, reference: &str) -> VerificationResult {
		let result = bounded(self.gateway_timeout, self.mobile_money.payment_status(reference)).await;
		tracing::debug!(
			reference = %truncate_id(reference),
			outcome = %result.outcome,
			"Gateway lookup"
		);
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use escrow_ledger::implementations::mock::MockLedger;
	use escrow_ledger::LedgerInterface;
	use escrow_mobile_money::implementations::mock::MockMobileMoney;
	use escrow_types::VerificationOutcome;
	use std::collections::HashMap;

	const HASH: &str = "0x5f5e0d4ee9e8fcbc3b3fb4e5a3c0b3f2a9e1d0c4b6a7f8e9d0c1b2a3f4e5d6c7";

	fn verifier(ledger: &MockLedger, gateway: &MockMobileMoney) -> PaymentVerifier {
		let backends = HashMap::from([(
			"bsc".to_string(),
			Box::new(ledger.clone()) as Box<dyn LedgerInterface>,
		)]);
		PaymentVerifier::new(
			Arc::new(LedgerService::new(backends)),
			Arc::new(MobileMoneyService::new(Box::new(gateway.clone()))),
			Duration::from_secs(10),
			Duration::from_secs(10),
		)
	}

	#[tokio::test]
	async fn test_unknown_hash_is_pending_and_repeatable() {
		let ledger = MockLedger::new();
		let verifier = verifier(&ledger, &MockMobileMoney::default());

		let first = verifier.verify_crypto("bsc", HASH).await;
		let second = verifier.verify_crypto("bsc", HASH).await;
		assert_eq!(first.outcome, VerificationOutcome::Pending);
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn test_transport_failures_become_error() {
		let ledger = MockLedger::new();
		ledger.set_unavailable(HASH, "explorer down");
		let verifier = verifier(&ledger, &MockMobileMoney::default());

		let result = verifier.verify_crypto("bsc", HASH).await;
		assert_eq!(result.outcome, VerificationOutcome::Error);
		assert!(result.error_message.unwrap().contains("explorer down"));

		let unsupported = verifier.verify_crypto("ton", HASH).await;
		assert_eq!(unsupported.outcome, VerificationOutcome::Error);

		let unknown = verifier.verify_mobile_money("no-such-ref").await;
		assert_eq!(unknown.outcome, VerificationOutcome::Error);
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_ledger_times_out_as_error() {
		let ledger = MockLedger::new();
		ledger.confirm(HASH, "0xfrom", "0xto", 10);
		ledger.set_delay(Some(Duration::from_secs(30)));
		let verifier = verifier(&ledger, &MockMobileMoney::default());

		let result = verifier.verify_crypto("bsc", HASH).await;
		assert_eq!(result.outcome, VerificationOutcome::Error);
		assert!(result.error_message.unwrap().contains("timed out"));
	}
}
