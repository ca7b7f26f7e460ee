//! Settlement coordinator.
//!
//! Runs the init and verify flows end to end. Authorization and input
//! checks happen first and fail without side effects. Ledger and gateway
//! lookups run without holding the order lock. Only a terminal outcome
//! takes the lock, re-reads the attempt and the order, and commits the
//! attempt together with the `PAID_ESCROW` transition. Crypto settlement
//! also holds a lock on the transaction hash, always taken before the order
//! lock, so one hash can settle at most one attempt.

use crate::engine::event_bus::EventBus;
use crate::error::EscrowError;
use crate::payment::{PaymentInitiator, PaymentVerifier};
use crate::state::{KeyGuard, KeyedLocks, OrderStateMachine};
use chrono::Utc;
use escrow_storage::{StorageService, WriteBatch};
use escrow_types::{
	is_transaction_hash, truncate_id, Actor, EscrowEvent, Order, OrderStatus, PaymentEvent,
	PaymentInstruction, PaymentMethod, PaymentTransaction, PaymentVerificationResponse,
	StorageKey, TransactionState, TransitionEvidence, VerificationOutcome, VerificationResult,
};
use std::sync::Arc;
use tracing::instrument;

/// Orchestrates payment initiation and verification.
pub struct SettlementCoordinator {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	initiator: PaymentInitiator,
	verifier: PaymentVerifier,
	event_bus: EventBus,
	hash_locks: KeyedLocks,
}

fn view(
	outcome: VerificationOutcome,
	order: Order,
	transaction: Option<PaymentTransaction>,
	error_message: Option<String>,
) -> PaymentVerificationResponse {
	PaymentVerificationResponse {
		outcome,
		order,
		transaction,
		error_message,
	}
}

/// Only the buyer may pay, and only while the order awaits payment.
fn authorize_payment(actor: &Actor, order: &Order) -> Result<(), EscrowError> {
	if !actor.is(&order.buyer_id) {
		return Err(EscrowError::Forbidden(
			"Only the buyer can pay for this order".into(),
		));
	}
	if order.status != OrderStatus::Created {
		return Err(EscrowError::InvalidTransition {
			from: order.status,
			to: OrderStatus::PaidEscrow,
		});
	}
	Ok(())
}

/// Parties and privileged actors may verify.
fn authorize_verify(actor: &Actor, order: &Order) -> Result<(), EscrowError> {
	let party = actor.user_id().is_some_and(|id| order.is_party(id));
	if party || actor.is_privileged() {
		Ok(())
	} else {
		Err(EscrowError::Forbidden(
			"Not authorized to verify payments for this order".into(),
		))
	}
}

impl SettlementCoordinator {
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		initiator: PaymentInitiator,
		verifier: PaymentVerifier,
		event_bus: EventBus,
	) -> Self {
		Self {
			storage,
			state_machine,
			initiator,
			verifier,
			event_bus,
			hash_locks: KeyedLocks::new(),
		}
	}

	async fn transaction(&self, id: &str) -> Result<PaymentTransaction, EscrowError> {
		self.storage
			.find(StorageKey::Transactions, id)
			.await?
			.ok_or_else(|| EscrowError::NotFound(format!("Transaction {}", id)))
	}

	/// Starts a crypto payment for the buyer's order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn init_crypto(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<PaymentInstruction, EscrowError> {
		let _guard = self.state_machine.lock(order_id).await;
		let order = self.state_machine.get_order(order_id).await?;
		authorize_payment(actor, &order)?;

		let (transaction, instruction) = self
			.initiator
			.init_crypto(&order, |network| self.verifier.supports_network(network))
			.await?;

		self.event_bus
			.publish(EscrowEvent::Payment(PaymentEvent::Initiated {
				order_id: order.id.clone(),
				buyer_id: order.buyer_id.clone(),
				method: PaymentMethod::Crypto,
				reference: transaction.id,
			}))
			.ok();
		Ok(instruction)
	}

	/// Starts a mobile-money payment for the buyer's order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn init_mobile_money(
		&self,
		actor: &Actor,
		order_id: &str,
		phone_number: &str,
	) -> Result<PaymentInstruction, EscrowError> {
		let order = self.state_machine.get_order(order_id).await?;
		authorize_payment(actor, &order)?;

		let session = self
			.initiator
			.create_mobile_money_session(&order, phone_number)
			.await?;

		// The order may have moved while the gateway was answering
		let _guard = self.state_machine.lock(order_id).await;
		let order = self.state_machine.get_order(order_id).await?;
		authorize_payment(actor, &order)?;
		let (order, instruction) = self.initiator.record_mobile_money(&order, &session).await?;

		self.event_bus
			.publish(EscrowEvent::Payment(PaymentEvent::Initiated {
				order_id: order.id.clone(),
				buyer_id: order.buyer_id.clone(),
				method: PaymentMethod::MobileMoney,
				reference: session.reference,
			}))
			.ok();
		Ok(instruction)
	}

	/// Verifies a crypto payment by transaction hash.
	///
	/// The attempt is found through the hash index, or through
	/// `transaction_id` when the hash has not been attached yet.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(reference)))]
	pub async fn verify_crypto(
		&self,
		actor: &Actor,
		reference: &str,
		transaction_id: Option<&str>,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		let tx_hash = reference.trim().to_lowercase();
		if !is_transaction_hash(&tx_hash) {
			return Err(EscrowError::Validation(format!(
				"'{}' is not a transaction hash",
				reference
			)));
		}

		let indexed: Option<String> = self
			.storage
			.find(StorageKey::TransactionByHash, &tx_hash)
			.await?;
		let id = match (indexed, transaction_id) {
			(Some(id), _) => id,
			(None, Some(id)) => id.to_string(),
			(None, None) => {
				return Err(EscrowError::NotFound(
					"No pending transaction matches this reference".into(),
				))
			},
		};

		let transaction = self.transaction(&id).await?;
		let order = self.state_machine.get_order(&transaction.order_id).await?;
		authorize_verify(actor, &order)?;
		check_hash(&transaction, &tx_hash)?;

		match transaction.state {
			TransactionState::Confirmed => {
				tracing::debug!("Already confirmed, returning stored result");
				return Ok(view(
					VerificationOutcome::Confirmed,
					order,
					Some(transaction),
					None,
				));
			},
			TransactionState::Failed => {
				return Err(EscrowError::VerificationFailed(
					"This payment attempt already failed".into(),
				))
			},
			TransactionState::Pending => {},
		}

		let result = self
			.verifier
			.verify_crypto(&transaction.network, &tx_hash)
			.await;

		match result.outcome {
			VerificationOutcome::Pending => Ok(view(
				VerificationOutcome::Pending,
				order,
				Some(transaction),
				None,
			)),
			VerificationOutcome::Error => {
				let message = result
					.error_message
					.unwrap_or_else(|| "Ledger lookup failed".to_string());
				tracing::warn!(error = %message, "Ledger unavailable");
				Err(EscrowError::ExternalUnavailable(message))
			},
			VerificationOutcome::Confirmed => {
				let _hash_guard = self.hash_locks.lock(&tx_hash).await;
				let guard = self.state_machine.lock(&order.id).await;
				self.settle_crypto_confirmed(&guard, &id, &tx_hash, result)
					.await
			},
			VerificationOutcome::Failed => {
				let _hash_guard = self.hash_locks.lock(&tx_hash).await;
				let guard = self.state_machine.lock(&order.id).await;
				self.settle_crypto_failed(&guard, &id, &tx_hash, result).await
			},
		}
	}

	async fn settle_crypto_confirmed(
		&self,
		guard: &KeyGuard<'_>,
		transaction_id: &str,
		tx_hash: &str,
		result: VerificationResult,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		// Re-read: a concurrent verify may have settled this attempt already
		self.check_hash_unclaimed(tx_hash, transaction_id).await?;
		let transaction = self.transaction(transaction_id).await?;
		check_hash(&transaction, tx_hash)?;
		match transaction.state {
			TransactionState::Confirmed => {
				let order = self.state_machine.get_order(guard.key()).await?;
				return Ok(view(
					VerificationOutcome::Confirmed,
					order,
					Some(transaction),
					None,
				));
			},
			TransactionState::Failed => {
				return Err(EscrowError::VerificationFailed(
					"This payment attempt already failed".into(),
				))
			},
			TransactionState::Pending => {},
		}

		let mut confirmed = transaction;
		confirmed.tx_hash = Some(tx_hash.to_string());
		confirmed.state = TransactionState::Confirmed;
		confirmed.from_address = result.from_address;
		confirmed.block_number = result.block_number;
		confirmed.confirmations = result.confirmations;
		confirmed.confirmed_at = Some(Utc::now());

		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Transactions, &confirmed.id, &confirmed)?
			.put(StorageKey::TransactionByHash, tx_hash, &confirmed.id)?;

		let evidence = TransitionEvidence {
			transaction_reference: Some(tx_hash.to_string()),
			escrow_address: Some(confirmed.to_address.clone()),
			payment_method: Some(PaymentMethod::Crypto),
			..Default::default()
		};
		let order = self
			.state_machine
			.transition_locked(guard, OrderStatus::PaidEscrow, &Actor::System, &evidence, batch)
			.await?;

		tracing::info!(
			transaction_id = %truncate_id(&confirmed.id),
			confirmations = ?confirmed.confirmations,
			"Crypto payment confirmed"
		);
		self.event_bus
			.publish(EscrowEvent::Payment(PaymentEvent::Confirmed {
				order_id: order.id.clone(),
				buyer_id: order.buyer_id.clone(),
				seller_id: order.seller_id.clone(),
				reference: tx_hash.to_string(),
			}))
			.ok();

		Ok(view(
			VerificationOutcome::Confirmed,
			order,
			Some(confirmed),
			None,
		))
	}

	async fn settle_crypto_failed(
		&self,
		guard: &KeyGuard<'_>,
		transaction_id: &str,
		tx_hash: &str,
		result: VerificationResult,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		self.check_hash_unclaimed(tx_hash, transaction_id).await?;
		let transaction = self.transaction(transaction_id).await?;
		check_hash(&transaction, tx_hash)?;
		if transaction.state.is_terminal() {
			// Another request settled it first; report what was stored
			let order = self.state_machine.get_order(guard.key()).await?;
			return match transaction.state {
				TransactionState::Confirmed => Ok(view(
					VerificationOutcome::Confirmed,
					order,
					Some(transaction),
					None,
				)),
				_ => Err(EscrowError::VerificationFailed(
					"This payment attempt already failed".into(),
				)),
			};
		}

		let reason = result
			.error_message
			.unwrap_or_else(|| "Transaction failed on-chain".to_string());
		let mut failed = transaction;
		failed.tx_hash = Some(tx_hash.to_string());
		failed.state = TransactionState::Failed;
		failed.from_address = result.from_address;
		failed.block_number = result.block_number;

		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Transactions, &failed.id, &failed)?
			.put(StorageKey::TransactionByHash, tx_hash, &failed.id)?;
		self.storage.commit(batch).await?;

		let order = self.state_machine.get_order(guard.key()).await?;
		tracing::warn!(
			transaction_id = %truncate_id(&failed.id),
			reason = %reason,
			"Crypto payment failed"
		);
		self.event_bus
			.publish(EscrowEvent::Payment(PaymentEvent::Failed {
				order_id: order.id.clone(),
				buyer_id: order.buyer_id.clone(),
				reference: tx_hash.to_string(),
				reason: reason.clone(),
			}))
			.ok();

		Err(EscrowError::VerificationFailed(reason))
	}

	/// Fails when `tx_hash` is already indexed to another attempt.
	///
	/// Must run under the hash lock.
	async fn check_hash_unclaimed(
		&self,
		tx_hash: &str,
		transaction_id: &str,
	) -> Result<(), EscrowError> {
		let owner: Option<String> = self
			.storage
			.find(StorageKey::TransactionByHash, tx_hash)
			.await?;
		match owner {
			Some(owner) if owner != transaction_id => {
				tracing::warn!(
					transaction_id = %truncate_id(transaction_id),
					claimed_by = %truncate_id(&owner),
					"Transaction hash already used by another payment"
				);
				Err(EscrowError::Validation(
					"This transaction hash is already used by another payment".into(),
				))
			},
			_ => Ok(()),
		}
	}

	/// Verifies a mobile-money payment by reference or by order.
	#[instrument(skip_all)]
	pub async fn verify_mobile_money(
		&self,
		actor: &Actor,
		reference: Option<&str>,
		order_id: Option<&str>,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		let reference = reference.map(str::trim).filter(|r| !r.is_empty());
		let order_id = match (reference, order_id) {
			(Some(reference), _) => self
				.storage
				.find::<String>(StorageKey::OrderByPaymentReference, reference)
				.await?
				.ok_or_else(|| {
					EscrowError::NotFound("No payment matches this reference".into())
				})?,
			(None, Some(order_id)) => order_id.to_string(),
			(None, None) => {
				return Err(EscrowError::Validation(
					"Either reference or order_id is required".into(),
				))
			},
		};

		let order = self.state_machine.get_order(&order_id).await?;
		authorize_verify(actor, &order)?;
		let reference = match (reference, &order.transaction_reference) {
			(Some(reference), _) => reference.to_string(),
			(None, Some(stored)) if order.payment_method == PaymentMethod::MobileMoney => {
				stored.clone()
			},
			_ => {
				return Err(EscrowError::NotFound(
					"No mobile-money payment for this order".into(),
				))
			},
		};

		if let Some(paid) = self.already_paid(&order, &reference)? {
			return Ok(paid);
		}
		reject_failed_reference(&order, &reference)?;

		let result = self.verifier.verify_mobile_money(&reference).await;
		match result.outcome {
			VerificationOutcome::Pending => {
				Ok(view(VerificationOutcome::Pending, order, None, None))
			},
			VerificationOutcome::Error => {
				let message = result
					.error_message
					.unwrap_or_else(|| "Gateway lookup failed".to_string());
				tracing::warn!(error = %message, "Gateway unavailable");
				Err(EscrowError::ExternalUnavailable(message))
			},
			VerificationOutcome::Failed => {
				let reason = result
					.error_message
					.unwrap_or_else(|| "Mobile-money payment failed".to_string());

				let _guard = self.state_machine.lock(&order.id).await;
				let mut order = self.state_machine.get_order(&order.id).await?;
				if let Some(paid) = self.already_paid(&order, &reference)? {
					return Ok(paid);
				}
				if !order.failed_payment_references.contains(&reference) {
					order.failed_payment_references.push(reference.clone());
					order.updated_at = Utc::now().max(order.latest_timestamp());
					self.storage
						.store(StorageKey::Orders, &order.id, &order)
						.await?;
				}

				tracing::warn!(
					order_id = %truncate_id(&order.id),
					reason = %reason,
					"Mobile-money payment failed"
				);
				self.event_bus
					.publish(EscrowEvent::Payment(PaymentEvent::Failed {
						order_id: order.id.clone(),
						buyer_id: order.buyer_id.clone(),
						reference: reference.clone(),
						reason: reason.clone(),
					}))
					.ok();
				Err(EscrowError::VerificationFailed(reason))
			},
			VerificationOutcome::Confirmed => {
				let guard = self.state_machine.lock(&order.id).await;
				let current = self.state_machine.get_order(&order.id).await?;
				if let Some(paid) = self.already_paid(&current, &reference)? {
					return Ok(paid);
				}
				reject_failed_reference(&current, &reference)?;

				let evidence = TransitionEvidence {
					transaction_reference: Some(reference.clone()),
					payment_method: Some(PaymentMethod::MobileMoney),
					..Default::default()
				};
				let order = self
					.state_machine
					.transition_locked(
						&guard,
						OrderStatus::PaidEscrow,
						&Actor::System,
						&evidence,
						WriteBatch::new(),
					)
					.await?;

				tracing::info!(
					order_id = %truncate_id(&order.id),
					reference = %truncate_id(&reference),
					"Mobile-money payment confirmed"
				);
				self.event_bus
					.publish(EscrowEvent::Payment(PaymentEvent::Confirmed {
						order_id: order.id.clone(),
						buyer_id: order.buyer_id.clone(),
						seller_id: order.seller_id.clone(),
						reference,
					}))
					.ok();
				Ok(view(VerificationOutcome::Confirmed, order, None, None))
			},
		}
	}

	/// Stored result for an order already paid with `reference`.
	///
	/// An order that left `CREATED` some other way cannot be paid any more.
	fn already_paid(
		&self,
		order: &Order,
		reference: &str,
	) -> Result<Option<PaymentVerificationResponse>, EscrowError> {
		if order.status == OrderStatus::Created {
			return Ok(None);
		}
		if order.paid_at.is_some() && order.transaction_reference.as_deref() == Some(reference) {
			return Ok(Some(view(
				VerificationOutcome::Confirmed,
				order.clone(),
				None,
				None,
			)));
		}
		Err(EscrowError::InvalidTransition {
			from: order.status,
			to: OrderStatus::PaidEscrow,
		})
	}

	/// Webhook entry point: verifies as the system actor.
	pub async fn handle_webhook(
		&self,
		reference: &str,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		tracing::info!(reference = %truncate_id(reference), "Mobile-money webhook received");
		self.verify_mobile_money(&Actor::System, Some(reference), None)
			.await
	}

	/// Payment attempts recorded for an order, oldest first.
	pub async fn list_transactions(
		&self,
		order_id: &str,
	) -> Result<Vec<PaymentTransaction>, EscrowError> {
		let ids: Vec<String> = self
			.storage
			.find(StorageKey::TransactionsByOrder, order_id)
			.await?
			.unwrap_or_default();
		let mut transactions = Vec::with_capacity(ids.len());
		for id in ids {
			transactions.push(self.transaction(&id).await?);
		}
		Ok(transactions)
	}
}

/// A reference the gateway reported as failed stays failed.
fn reject_failed_reference(order: &Order, reference: &str) -> Result<(), EscrowError> {
	if order.failed_payment_references.iter().any(|r| r == reference) {
		return Err(EscrowError::VerificationFailed(
			"This mobile-money payment already failed".into(),
		));
	}
	Ok(())
}

/// A hash, once attached to an attempt, never changes.
fn check_hash(transaction: &PaymentTransaction, tx_hash: &str) -> Result<(), EscrowError> {
	match &transaction.tx_hash {
		Some(attached) if !attached.eq_ignore_ascii_case(tx_hash) => {
			Err(EscrowError::Validation(
				"A different transaction hash is already attached to this payment".into(),
			))
		},
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::directory::{StorageDirectory, WalletDirectory};
	use crate::payment::CurrencyConverter;
	use escrow_config::PaymentConfig;
	use escrow_ledger::implementations::mock::MockLedger;
	use escrow_ledger::{LedgerInterface, LedgerService};
	use escrow_mobile_money::implementations::mock::MockMobileMoney;
	use escrow_mobile_money::MobileMoneyService;
	use escrow_storage::implementations::memory::MemoryStorage;
	use escrow_types::{OrderTerms, RegisterWalletRequest, UserRole, WalletKind};
	use rust_decimal_macros::dec;
	use std::collections::HashMap;
	use std::time::Duration;

	const SELLER_WALLET: &str = "0x1111111111111111111111111111111111111111";
	const BUYER_WALLET: &str = "0x2222222222222222222222222222222222222222";
	const HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

	struct Fixture {
		storage: Arc<StorageService>,
		directory: Arc<StorageDirectory>,
		ledger: MockLedger,
		gateway: MockMobileMoney,
		event_bus: EventBus,
		coordinator: SettlementCoordinator,
	}

	fn buyer() -> Actor {
		Actor::user("buyer", UserRole::Customer)
	}

	fn seller() -> Actor {
		Actor::user("seller", UserRole::Vendor)
	}

	async fn fixture() -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let directory = Arc::new(StorageDirectory::new(storage.clone()));
		let ledger = MockLedger::new();
		let gateway = MockMobileMoney::default();
		let event_bus = EventBus::new(64);

		let mobile_money = Arc::new(MobileMoneyService::new(Box::new(gateway.clone())));
		let ledger_service = Arc::new(LedgerService::new(HashMap::from([(
			"bsc".to_string(),
			Box::new(ledger.clone()) as Box<dyn LedgerInterface>,
		)])));
		let state_machine = Arc::new(OrderStateMachine::new(storage.clone(), event_bus.clone()));
		let initiator = PaymentInitiator::new(
			storage.clone(),
			directory.clone(),
			mobile_money.clone(),
			CurrencyConverter::new(&PaymentConfig::default()),
			"USDT",
			Duration::from_secs(10),
		);
		let verifier = PaymentVerifier::new(
			ledger_service,
			mobile_money,
			Duration::from_secs(10),
			Duration::from_secs(10),
		);
		let coordinator = SettlementCoordinator::new(
			storage.clone(),
			state_machine,
			initiator,
			verifier,
			event_bus.clone(),
		);

		let terms = OrderTerms::new("p-1", 2, dec!(100), "USD").unwrap();
		let order =
			Order::new("o-1", "buyer", "seller", terms, PaymentMethod::Crypto, None, Utc::now())
				.unwrap();
		storage.store(StorageKey::Orders, "o-1", &order).await.unwrap();

		Fixture {
			storage,
			directory,
			ledger,
			gateway,
			event_bus,
			coordinator,
		}
	}

	async fn with_wallet(fixture: &Fixture) {
		fixture
			.directory
			.register_wallet(
				"seller",
				RegisterWalletRequest {
					address: SELLER_WALLET.into(),
					network: "bsc".into(),
					kind: WalletKind::SafePal,
				},
			)
			.await
			.unwrap();
	}

	async fn stored_order(fixture: &Fixture) -> Order {
		fixture.storage.retrieve(StorageKey::Orders, "o-1").await.unwrap()
	}

	#[tokio::test]
	async fn test_only_buyer_may_init() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		assert!(matches!(
			fixture.coordinator.init_crypto(&seller(), "o-1").await,
			Err(EscrowError::Forbidden(_))
		));
		assert!(matches!(
			fixture.coordinator.init_crypto(&buyer(), "missing").await,
			Err(EscrowError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_init_without_wallet_creates_nothing() {
		let fixture = fixture().await;
		assert!(matches!(
			fixture.coordinator.init_crypto(&buyer(), "o-1").await,
			Err(EscrowError::NoPayeeChannel(_))
		));
		assert!(fixture.coordinator.list_transactions("o-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_pending_lookup_changes_nothing() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		let before = stored_order(&fixture).await;

		let response = fixture
			.coordinator
			.verify_crypto(&buyer(), HASH, Some(&instruction.transaction_id))
			.await
			.unwrap();
		assert_eq!(response.outcome, VerificationOutcome::Pending);
		assert_eq!(stored_order(&fixture).await, before);

		let transaction = response.transaction.unwrap();
		assert_eq!(transaction.state, TransactionState::Pending);
		assert_eq!(transaction.tx_hash, None);
		assert!(!fixture
			.storage
			.exists(StorageKey::TransactionByHash, HASH)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_confirmed_payment_moves_order_into_escrow_once() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		fixture.ledger.confirm(HASH, BUYER_WALLET, SELLER_WALLET, 42);

		let first = fixture
			.coordinator
			.verify_crypto(&buyer(), HASH, Some(&instruction.transaction_id))
			.await
			.unwrap();
		assert_eq!(first.outcome, VerificationOutcome::Confirmed);
		assert_eq!(first.order.status, OrderStatus::PaidEscrow);
		assert_eq!(first.order.transaction_reference.as_deref(), Some(HASH));
		assert_eq!(first.order.escrow_address.as_deref(), Some(SELLER_WALLET));
		let transaction = first.transaction.clone().unwrap();
		assert_eq!(transaction.block_number, Some(42));
		assert!(transaction.confirmed_at.is_some());
		assert_eq!(fixture.ledger.calls(), 1);

		// Second verify is served from storage, by hash alone
		let second = fixture.coordinator.verify_crypto(&seller(), HASH, None).await.unwrap();
		assert_eq!(second.transaction, first.transaction);
		assert_eq!(second.order, first.order);
		assert_eq!(fixture.ledger.calls(), 1);
	}

	#[tokio::test]
	async fn test_failed_payment_marks_attempt_and_keeps_order() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let mut events = fixture.event_bus.subscribe();
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		fixture
			.ledger
			.set_outcome(HASH, VerificationResult::failed("Transaction reverted on-chain"));

		let result = fixture
			.coordinator
			.verify_crypto(&buyer(), HASH, Some(&instruction.transaction_id))
			.await;
		assert!(matches!(result, Err(EscrowError::VerificationFailed(_))));
		assert_eq!(stored_order(&fixture).await.status, OrderStatus::Created);

		let transactions = fixture.coordinator.list_transactions("o-1").await.unwrap();
		assert_eq!(transactions[0].state, TransactionState::Failed);
		assert_eq!(transactions[0].tx_hash.as_deref(), Some(HASH));
		assert_eq!(transactions[0].confirmed_at, None);

		// Initiated, then Failed
		assert!(matches!(
			events.recv().await.unwrap(),
			EscrowEvent::Payment(PaymentEvent::Initiated { .. })
		));
		assert!(matches!(
			events.recv().await.unwrap(),
			EscrowEvent::Payment(PaymentEvent::Failed { .. })
		));

		// Buyer may retry with a new attempt
		assert!(fixture.coordinator.init_crypto(&buyer(), "o-1").await.is_ok());
		assert_eq!(fixture.coordinator.list_transactions("o-1").await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_ledger_outage_is_retryable() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		fixture.ledger.set_unavailable(HASH, "explorer down");

		let result = fixture
			.coordinator
			.verify_crypto(&buyer(), HASH, Some(&instruction.transaction_id))
			.await;
		assert!(matches!(result, Err(EscrowError::ExternalUnavailable(_))));
		assert_eq!(stored_order(&fixture).await.status, OrderStatus::Created);
	}

	#[tokio::test]
	async fn test_verify_input_checks() {
		let fixture = fixture().await;
		assert!(matches!(
			fixture.coordinator.verify_crypto(&buyer(), "not-a-hash", None).await,
			Err(EscrowError::Validation(_))
		));
		assert!(matches!(
			fixture.coordinator.verify_crypto(&buyer(), HASH, None).await,
			Err(EscrowError::NotFound(_))
		));

		with_wallet(&fixture).await;
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		let stranger = Actor::user("mallory", UserRole::Customer);
		assert!(matches!(
			fixture
				.coordinator
				.verify_crypto(&stranger, HASH, Some(&instruction.transaction_id))
				.await,
			Err(EscrowError::Forbidden(_))
		));
	}

	#[tokio::test]
	async fn test_concurrent_confirmations_settle_once() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let instruction = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		fixture.ledger.confirm(HASH, BUYER_WALLET, SELLER_WALLET, 7);
		let id = instruction.transaction_id.as_str();
		let actor = buyer();

		let (first, second) = tokio::join!(
			fixture.coordinator.verify_crypto(&actor, HASH, Some(id)),
			fixture.coordinator.verify_crypto(&actor, HASH, Some(id)),
		);
		let (first, second) = (first.unwrap(), second.unwrap());
		assert_eq!(first.outcome, VerificationOutcome::Confirmed);
		assert_eq!(second.outcome, VerificationOutcome::Confirmed);
		assert_eq!(first.order.paid_at, second.order.paid_at);
	}

	#[tokio::test]
	async fn test_hash_settles_one_attempt_across_orders() {
		let fixture = fixture().await;
		with_wallet(&fixture).await;
		let terms = OrderTerms::new("p-1", 1, dec!(50), "USD").unwrap();
		let other =
			Order::new("o-2", "buyer", "seller", terms, PaymentMethod::Crypto, None, Utc::now())
				.unwrap();
		fixture.storage.store(StorageKey::Orders, "o-2", &other).await.unwrap();

		let first = fixture.coordinator.init_crypto(&buyer(), "o-1").await.unwrap();
		let second = fixture.coordinator.init_crypto(&buyer(), "o-2").await.unwrap();
		fixture.ledger.confirm(HASH, BUYER_WALLET, SELLER_WALLET, 9);
		// Both lookups are in flight before either settles
		fixture.ledger.set_delay(Some(Duration::from_millis(50)));
		let actor = buyer();

		let (a, b) = tokio::join!(
			fixture
				.coordinator
				.verify_crypto(&actor, HASH, Some(&first.transaction_id)),
			fixture
				.coordinator
				.verify_crypto(&actor, HASH, Some(&second.transaction_id)),
		);
		let (settled, rejected) = match (a, b) {
			(Ok(settled), Err(rejected)) | (Err(rejected), Ok(settled)) => (settled, rejected),
			other => panic!("expected exactly one settlement, got {:?}", other),
		};
		assert!(matches!(rejected, EscrowError::Validation(_)));
		assert_eq!(settled.outcome, VerificationOutcome::Confirmed);

		let mut paid = 0;
		for id in ["o-1", "o-2"] {
			let order: Order = fixture.storage.retrieve(StorageKey::Orders, id).await.unwrap();
			if order.status == OrderStatus::PaidEscrow {
				paid += 1;
			}
		}
		assert_eq!(paid, 1);

		let owner: String = fixture
			.storage
			.retrieve(StorageKey::TransactionByHash, HASH)
			.await
			.unwrap();
		assert_eq!(owner, settled.transaction.unwrap().id);
	}

	#[tokio::test]
	async fn test_mobile_money_flow_and_webhook() {
		let fixture = fixture().await;
		let instruction = fixture
			.coordinator
			.init_mobile_money(&buyer(), "o-1", "+25761000000")
			.await
			.unwrap();
		let reference = instruction.transaction_id.clone();
		assert_eq!(stored_order(&fixture).await.status, OrderStatus::Created);

		let pending = fixture
			.coordinator
			.verify_mobile_money(&buyer(), None, Some("o-1"))
			.await
			.unwrap();
		assert_eq!(pending.outcome, VerificationOutcome::Pending);

		fixture
			.gateway
			.set_status(&reference, VerificationOutcome::Confirmed);
		let confirmed = fixture.coordinator.handle_webhook(&reference).await.unwrap();
		assert_eq!(confirmed.order.status, OrderStatus::PaidEscrow);
		assert_eq!(confirmed.order.payment_method, PaymentMethod::MobileMoney);
		let calls = fixture.gateway.calls();

		// Already paid: answered without asking the gateway
		let again = fixture
			.coordinator
			.verify_mobile_money(&seller(), Some(&reference), None)
			.await
			.unwrap();
		assert_eq!(again.outcome, VerificationOutcome::Confirmed);
		assert_eq!(fixture.gateway.calls(), calls);
	}

	#[tokio::test]
	async fn test_mobile_money_failure_keeps_order() {
		let fixture = fixture().await;
		let instruction = fixture
			.coordinator
			.init_mobile_money(&buyer(), "o-1", "+25761000000")
			.await
			.unwrap();
		fixture
			.gateway
			.set_status(&instruction.transaction_id, VerificationOutcome::Failed);

		let result = fixture
			.coordinator
			.verify_mobile_money(&buyer(), Some(&instruction.transaction_id), None)
			.await;
		assert!(matches!(result, Err(EscrowError::VerificationFailed(_))));
		assert_eq!(stored_order(&fixture).await.status, OrderStatus::Created);

		assert!(matches!(
			fixture.coordinator.handle_webhook("unknown-ref").await,
			Err(EscrowError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_failed_mobile_money_reference_stays_failed() {
		let fixture = fixture().await;
		let instruction = fixture
			.coordinator
			.init_mobile_money(&buyer(), "o-1", "+25761000000")
			.await
			.unwrap();
		let reference = instruction.transaction_id.clone();
		fixture.gateway.set_status(&reference, VerificationOutcome::Failed);

		assert!(matches!(
			fixture.coordinator.handle_webhook(&reference).await,
			Err(EscrowError::VerificationFailed(_))
		));
		assert_eq!(
			stored_order(&fixture).await.failed_payment_references,
			vec![reference.clone()]
		);
		let calls = fixture.gateway.calls();

		// The gateway changing its answer does not revive the attempt
		fixture.gateway.set_status(&reference, VerificationOutcome::Confirmed);
		assert!(matches!(
			fixture.coordinator.handle_webhook(&reference).await,
			Err(EscrowError::VerificationFailed(_))
		));
		assert!(matches!(
			fixture
				.coordinator
				.verify_mobile_money(&buyer(), None, Some("o-1"))
				.await,
			Err(EscrowError::VerificationFailed(_))
		));
		assert_eq!(stored_order(&fixture).await.status, OrderStatus::Created);
		assert_eq!(fixture.gateway.calls(), calls);

		// A new attempt is still possible
		let retry = fixture
			.coordinator
			.init_mobile_money(&buyer(), "o-1", "+25761000000")
			.await
			.unwrap();
		fixture
			.gateway
			.set_status(&retry.transaction_id, VerificationOutcome::Confirmed);
		let paid = fixture
			.coordinator
			.handle_webhook(&retry.transaction_id)
			.await
			.unwrap();
		assert_eq!(paid.order.status, OrderStatus::PaidEscrow);
	}
}
