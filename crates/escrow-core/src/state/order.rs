//! Persisted order state machine.
//!
//! Wraps the transition table with storage: every transition reloads the
//! order under its per-order lock, applies the rule and writes the result
//! in one batch, so two concurrent requests for the same order serialize
//! and the second one sees the first one's outcome.

use super::locks::{KeyGuard, KeyedLocks};
use super::transitions::{self, TransitionError};
use crate::engine::event_bus::EventBus;
use chrono::Utc;
use escrow_storage::{StorageError, StorageService, WriteBatch};
use escrow_types::{
	truncate_id, Actor, EscrowEvent, Order, OrderEvent, OrderStatus, StorageKey,
	TransitionEvidence,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error(transparent)]
	Transition(#[from] TransitionError),
}

impl From<StorageError> for OrderStateError {
	fn from(err: StorageError) -> Self {
		OrderStateError::Storage(err.to_string())
	}
}

/// Manages order transitions and persistence.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	locks: KeyedLocks,
	event_bus: EventBus,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self {
			storage,
			locks: KeyedLocks::new(),
			event_bus,
		}
	}

	/// Takes the lock guarding `order_id`.
	pub async fn lock(&self, order_id: &str) -> KeyGuard<'_> {
		self.locks.lock(order_id).await
	}

	/// Gets an order by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.storage
			.find(StorageKey::Orders, order_id)
			.await?
			.ok_or_else(|| OrderStateError::NotFound(order_id.to_string()))
	}

	/// Transitions an order, taking its lock for the duration.
	pub async fn transition(
		&self,
		order_id: &str,
		target: OrderStatus,
		actor: &Actor,
		evidence: &TransitionEvidence,
	) -> Result<Order, OrderStateError> {
		let guard = self.lock(order_id).await;
		self.transition_locked(&guard, target, actor, evidence, WriteBatch::new())
			.await
	}

	/// Transitions the order whose lock is held by `guard`.
	///
	/// `batch` carries further writes that must land together with the
	/// order, such as the payment attempt that justified the transition. If
	/// the transition is refused none of them are written.
	#[instrument(skip_all, fields(order_id = %truncate_id(guard.key()), target = %target))]
	pub async fn transition_locked(
		&self,
		guard: &KeyGuard<'_>,
		target: OrderStatus,
		actor: &Actor,
		evidence: &TransitionEvidence,
		mut batch: WriteBatch,
	) -> Result<Order, OrderStateError> {
		let order = self.get_order(guard.key()).await?;
		let updated = match transitions::apply(&order, target, actor, evidence, Utc::now()) {
			Ok(updated) => updated,
			Err(e) => {
				tracing::warn!(from = %order.status, error = %e, "Transition refused");
				return Err(e.into());
			},
		};

		batch.put(StorageKey::Orders, &updated.id, &updated)?;
		self.storage.commit(batch).await?;

		tracing::info!(from = %order.status, to = %updated.status, "Order transitioned");
		self.event_bus
			.publish(EscrowEvent::Order(OrderEvent::StatusChanged {
				order: updated.clone(),
				from: order.status,
				to: updated.status,
			}))
			.ok();

		Ok(updated)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use escrow_storage::implementations::memory::MemoryStorage;
	use escrow_types::{OrderTerms, PaymentMethod, UserRole};
	use rust_decimal_macros::dec;

	async fn machine_with_order(status: OrderStatus) -> Arc<OrderStateMachine> {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let terms = OrderTerms::new("p-1", 1, dec!(50), "USD").unwrap();
		let order = Order {
			status,
			..Order::new("o-1", "buyer", "seller", terms, PaymentMethod::Crypto, None, Utc::now())
				.unwrap()
		};
		storage.store(StorageKey::Orders, "o-1", &order).await.unwrap();
		Arc::new(OrderStateMachine::new(storage, EventBus::new(16)))
	}

	#[tokio::test]
	async fn test_transition_persists_and_publishes() {
		let machine = machine_with_order(OrderStatus::Created).await;
		let mut events = machine.event_bus.subscribe();

		let buyer = Actor::user("buyer", UserRole::Customer);
		let paid = machine
			.transition("o-1", OrderStatus::PaidEscrow, &buyer, &TransitionEvidence::default())
			.await
			.unwrap();
		assert_eq!(machine.get_order("o-1").await.unwrap(), paid);

		match events.recv().await.unwrap() {
			EscrowEvent::Order(OrderEvent::StatusChanged { from, to, .. }) => {
				assert_eq!(from, OrderStatus::Created);
				assert_eq!(to, OrderStatus::PaidEscrow);
			},
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_refused_transition_drops_batch() {
		let machine = machine_with_order(OrderStatus::Shipped).await;
		let guard = machine.lock("o-1").await;
		let mut batch = WriteBatch::new();
		batch.put(StorageKey::TransactionByHash, "0xaa", &"tx-1").unwrap();

		let result = machine
			.transition_locked(
				&guard,
				OrderStatus::PaidEscrow,
				&Actor::System,
				&TransitionEvidence::default(),
				batch,
			)
			.await;
		assert!(matches!(
			result,
			Err(OrderStateError::Transition(TransitionError::InvalidTransition { .. }))
		));
		assert!(!machine
			.storage
			.exists(StorageKey::TransactionByHash, "0xaa")
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_concurrent_shipments_one_wins() {
		let machine = machine_with_order(OrderStatus::PaidEscrow).await;
		let seller = Actor::user("seller", UserRole::Vendor);
		let evidence = TransitionEvidence::default();

		let (first, second) = tokio::join!(
			machine.transition("o-1", OrderStatus::Shipped, &seller, &evidence),
			machine.transition("o-1", OrderStatus::Shipped, &seller, &evidence),
		);

		let results = [first, second];
		assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
		assert!(results.iter().any(|r| matches!(
			r,
			Err(OrderStateError::Transition(TransitionError::InvalidTransition { .. }))
		)));
	}

	#[tokio::test]
	async fn test_missing_order() {
		let machine = machine_with_order(OrderStatus::Created).await;
		assert!(matches!(
			machine.get_order("nope").await,
			Err(OrderStateError::NotFound(_))
		));
	}
}
