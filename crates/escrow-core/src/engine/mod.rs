//! Escrow engine that exposes every marketplace operation.
//!
//! The engine owns the shared services (storage, directory, state machine,
//! settlement coordinator, notification registry) and is cheap to clone, so
//! the HTTP layer can hand a copy to every request handler.

pub mod event_bus;
pub mod lifecycle;

use crate::directory::{ProductCatalog, StorageDirectory, UserDirectory, WalletDirectory};
use crate::error::EscrowError;
use crate::notifications::ConnectionRegistry;
use crate::payment::{CurrencyConverter, PaymentInitiator, PaymentVerifier};
use crate::settlement::SettlementCoordinator;
use crate::state::{KeyedLocks, OrderStateMachine};
use chrono::Utc;
use escrow_config::Config;
use escrow_ledger::LedgerService;
use escrow_mobile_money::MobileMoneyService;
use escrow_storage::{StorageService, WriteBatch};
use escrow_types::{
	truncate_id, Actor, CreateOrderRequest, EscrowEvent, Order, OrderEvent, OrderScope,
	OrderTerms, PaymentInstruction, PaymentTransaction, PaymentVerificationResponse,
	RegisterWalletRequest, StorageKey, TransitionEvidence, UpdateOrderStatusRequest, User,
	Wallet,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Errors raised while starting or stopping the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// Main escrow engine.
#[derive(Clone)]
pub struct EscrowEngine {
	/// Service configuration.
	pub(crate) config: Config,
	/// Storage service for orders, attempts and indexes.
	pub(crate) storage: Arc<StorageService>,
	/// Users, products and wallets.
	pub(crate) directory: Arc<StorageDirectory>,
	/// Order state machine.
	pub(crate) state_machine: Arc<OrderStateMachine>,
	/// Init and verify flows.
	pub(crate) coordinator: Arc<SettlementCoordinator>,
	/// Event bus for inter-service communication.
	pub(crate) event_bus: event_bus::EventBus,
	/// Live notification streams.
	pub(crate) connections: Arc<ConnectionRegistry>,
	/// Per-user locks guarding the order index.
	pub(crate) index_locks: Arc<KeyedLocks>,
	/// Background tasks started by `initialize`.
	pub(crate) tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Parties may read an order; so may privileged actors.
fn authorize_read(actor: &Actor, order: &Order) -> Result<(), EscrowError> {
	let party = actor.user_id().is_some_and(|id| order.is_party(id));
	if party || actor.is_privileged() {
		Ok(())
	} else {
		Err(EscrowError::Forbidden("Not a party to this order".into()))
	}
}

impl EscrowEngine {
	/// Creates a new engine from already constructed services.
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		ledger: Arc<LedgerService>,
		mobile_money: Arc<MobileMoneyService>,
		event_bus: event_bus::EventBus,
	) -> Self {
		let directory = Arc::new(StorageDirectory::new(storage.clone()));
		let state_machine = Arc::new(OrderStateMachine::new(storage.clone(), event_bus.clone()));

		let gateway_timeout = Duration::from_secs(config.mobile_money.request_timeout_seconds);
		let initiator = PaymentInitiator::new(
			storage.clone(),
			directory.clone(),
			mobile_money.clone(),
			CurrencyConverter::new(&config.payment),
			config.payment.settlement_currency.clone(),
			gateway_timeout,
		);
		let verifier = PaymentVerifier::new(
			ledger,
			mobile_money,
			Duration::from_secs(config.ledger.request_timeout_seconds),
			gateway_timeout,
		);
		let coordinator = Arc::new(SettlementCoordinator::new(
			storage.clone(),
			state_machine.clone(),
			initiator,
			verifier,
			event_bus.clone(),
		));

		Self {
			config,
			storage,
			directory,
			state_machine,
			coordinator,
			event_bus,
			connections: Arc::new(ConnectionRegistry::new()),
			index_locks: Arc::new(KeyedLocks::new()),
			tasks: Arc::new(Mutex::new(Vec::new())),
		}
	}

	/// Resolves a caller id to a known user.
	pub async fn user(&self, user_id: &str) -> Result<Option<User>, EscrowError> {
		self.directory.get_user(user_id).await
	}

	/// Places an order for a catalog product.
	///
	/// Price and currency are copied from the catalog, so later catalog
	/// changes never touch existing orders.
	#[instrument(skip_all, fields(buyer_id = %truncate_id(&buyer.id)))]
	pub async fn create_order(
		&self,
		buyer: &User,
		request: CreateOrderRequest,
	) -> Result<Order, EscrowError> {
		let product = self
			.directory
			.get_product(&request.product_id)
			.await?
			.ok_or_else(|| EscrowError::NotFound(format!("Product {}", request.product_id)))?;

		let terms = OrderTerms::new(
			product.id.clone(),
			request.quantity,
			product.price,
			product.currency.clone(),
		)?;
		let order = Order::new(
			uuid::Uuid::new_v4().to_string(),
			buyer.id.clone(),
			product.seller_id.clone(),
			terms,
			request.payment_method,
			request.shipping_address,
			Utc::now(),
		)?;

		// Lock both index entries in a fixed order
		let mut parties = [order.buyer_id.as_str(), order.seller_id.as_str()];
		parties.sort_unstable();
		let _first = self.index_locks.lock(parties[0]).await;
		let _second = self.index_locks.lock(parties[1]).await;

		let mut batch = WriteBatch::new();
		batch.put(StorageKey::Orders, &order.id, &order)?;
		for party in parties {
			let mut ids: Vec<String> = self
				.storage
				.find(StorageKey::OrdersByUser, party)
				.await?
				.unwrap_or_default();
			ids.push(order.id.clone());
			batch.put(StorageKey::OrdersByUser, party, &ids)?;
		}
		self.storage.commit(batch).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			total = %order.terms.total_price(),
			"Order created"
		);
		self.event_bus
			.publish(EscrowEvent::Order(OrderEvent::Created {
				order: order.clone(),
			}))
			.ok();
		Ok(order)
	}

	/// Gets one order, for its parties or a privileged actor.
	pub async fn get_order(&self, actor: &Actor, order_id: &str) -> Result<Order, EscrowError> {
		let order = self.state_machine.get_order(order_id).await?;
		authorize_read(actor, &order)?;
		Ok(order)
	}

	/// Orders of `user_id`, newest first.
	pub async fn list_orders(
		&self,
		user_id: &str,
		scope: OrderScope,
	) -> Result<Vec<Order>, EscrowError> {
		let ids: Vec<String> = self
			.storage
			.find(StorageKey::OrdersByUser, user_id)
			.await?
			.unwrap_or_default();
		let mut orders = futures::future::try_join_all(
			ids.iter().map(|id| self.state_machine.get_order(id)),
		)
		.await?;

		orders.retain(|order| match scope {
			OrderScope::All => true,
			OrderScope::Purchases => order.buyer_id == user_id,
			OrderScope::Sales => order.seller_id == user_id,
		});
		orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(orders)
	}

	/// Requests a status change through the state machine.
	pub async fn update_order_status(
		&self,
		actor: &Actor,
		order_id: &str,
		request: UpdateOrderStatusRequest,
	) -> Result<Order, EscrowError> {
		let evidence = TransitionEvidence {
			transaction_reference: request.transaction_hash,
			tracking_number: request.tracking_number,
			wallet_used: request.wallet_used,
			..Default::default()
		};
		Ok(self
			.state_machine
			.transition(order_id, request.status, actor, &evidence)
			.await?)
	}

	/// Payment attempts of an order. Only its parties may list them.
	pub async fn list_transactions(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Vec<PaymentTransaction>, EscrowError> {
		let order = self.state_machine.get_order(order_id).await?;
		if !actor.user_id().is_some_and(|id| order.is_party(id)) {
			return Err(EscrowError::Forbidden("Not a party to this order".into()));
		}
		self.coordinator.list_transactions(order_id).await
	}

	pub async fn register_wallet(
		&self,
		owner: &User,
		request: RegisterWalletRequest,
	) -> Result<Wallet, EscrowError> {
		self.directory.register_wallet(&owner.id, request).await
	}

	pub async fn primary_wallet(&self, owner: &User) -> Result<Wallet, EscrowError> {
		self.directory
			.primary_wallet(&owner.id)
			.await?
			.ok_or_else(|| EscrowError::NotFound("No primary wallet registered".into()))
	}

	pub async fn list_wallets(&self, owner: &User) -> Result<Vec<Wallet>, EscrowError> {
		self.directory.list_wallets(&owner.id).await
	}

	pub async fn init_crypto_payment(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<PaymentInstruction, EscrowError> {
		self.coordinator.init_crypto(actor, order_id).await
	}

	pub async fn verify_crypto_payment(
		&self,
		actor: &Actor,
		reference: &str,
		transaction_id: Option<&str>,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		self.coordinator
			.verify_crypto(actor, reference, transaction_id)
			.await
	}

	pub async fn init_mobile_money(
		&self,
		actor: &Actor,
		order_id: &str,
		phone_number: &str,
	) -> Result<PaymentInstruction, EscrowError> {
		self.coordinator
			.init_mobile_money(actor, order_id, phone_number)
			.await
	}

	pub async fn verify_mobile_money(
		&self,
		actor: &Actor,
		reference: Option<&str>,
		order_id: Option<&str>,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		self.coordinator
			.verify_mobile_money(actor, reference, order_id)
			.await
	}

	/// Gateway callback for a mobile-money payment.
	pub async fn handle_mobile_money_webhook(
		&self,
		reference: &str,
	) -> Result<PaymentVerificationResponse, EscrowError> {
		self.coordinator.handle_webhook(reference).await
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Returns the registry of live notification streams.
	pub fn connections(&self) -> &Arc<ConnectionRegistry> {
		&self.connections
	}

	pub fn directory(&self) -> &Arc<StorageDirectory> {
		&self.directory
	}
}
