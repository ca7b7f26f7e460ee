//! Real-time notifications for order parties.
//!
//! [`ConnectionRegistry`] tracks the live connections of each user. It is
//! created with the engine, shared with the HTTP layer and drained on
//! shutdown. The dispatcher task turns bus events into notifications and
//! pushes them to whichever parties are connected. Delivery is best effort:
//! a user with no open connection simply misses the message.

use crate::engine::event_bus::EventBus;
use chrono::Utc;
use dashmap::DashMap;
use escrow_types::{
	truncate_id, EscrowEvent, Notification, NotificationKind, Order, OrderEvent, OrderStatus,
	PaymentEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Process-wide registry of notification streams keyed by user id.
#[derive(Default)]
pub struct ConnectionRegistry {
	connections: DashMap<String, Vec<mpsc::UnboundedSender<Notification>>>,
	closed: AtomicBool,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Opens a stream for `user_id`. Returns `None` once drained.
	pub fn register(&self, user_id: &str) -> Option<mpsc::UnboundedReceiver<Notification>> {
		if self.closed.load(Ordering::SeqCst) {
			return None;
		}
		let (sender, receiver) = mpsc::unbounded_channel();
		self.connections
			.entry(user_id.to_string())
			.or_default()
			.push(sender);
		// A drain between the check and the insert would miss this sender
		if self.closed.load(Ordering::SeqCst) {
			drop(receiver);
			self.unregister(user_id);
			return None;
		}
		tracing::debug!(user_id = %truncate_id(user_id), "Connection registered");
		Some(receiver)
	}

	/// Drops closed streams of `user_id`.
	pub fn unregister(&self, user_id: &str) {
		self.connections
			.remove_if_mut(user_id, |_, senders| {
				senders.retain(|sender| !sender.is_closed());
				senders.is_empty()
			});
	}

	/// Delivers a notification to every open stream of its recipient.
	/// Returns the number of streams reached.
	pub fn send(&self, notification: &Notification) -> usize {
		let Some(mut senders) = self.connections.get_mut(&notification.recipient_id) else {
			return 0;
		};
		senders.retain(|sender| sender.send(notification.clone()).is_ok());
		senders.len()
	}

	/// Number of open streams for `user_id`.
	pub fn connection_count(&self, user_id: &str) -> usize {
		self.connections
			.get(user_id)
			.map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
			.unwrap_or(0)
	}

	/// Closes every stream and refuses new ones.
	pub fn drain(&self) -> usize {
		self.closed.store(true, Ordering::SeqCst);
		let count = self.connections.iter().map(|entry| entry.len()).sum();
		self.connections.clear();
		count
	}
}

fn notify(
	recipient: &str,
	kind: NotificationKind,
	title: &str,
	body: String,
	order_id: &str,
) -> Notification {
	Notification {
		recipient_id: recipient.to_string(),
		kind,
		title: title.to_string(),
		body,
		order_id: order_id.to_string(),
		created_at: Utc::now(),
	}
}

fn status_notifications(order: &Order, to: OrderStatus) -> Vec<Notification> {
	let id = order.id.as_str();
	let kind = NotificationKind::Order;
	match to {
		OrderStatus::PaidEscrow => vec![notify(
			&order.seller_id,
			kind,
			"Payment Received",
			format!("Order #{} has been paid. Please ship the item.", id),
			id,
		)],
		OrderStatus::Shipped => {
			let body = match &order.tracking_number {
				Some(tracking) => format!("Order #{} has been shipped. Tracking: {}", id, tracking),
				None => format!("Order #{} has been shipped.", id),
			};
			vec![notify(&order.buyer_id, kind, "Order Shipped", body, id)]
		},
		OrderStatus::Delivered => vec![notify(
			&order.seller_id,
			kind,
			"Order Delivered",
			format!("The buyer confirmed delivery of order #{}.", id),
			id,
		)],
		OrderStatus::Completed => [&order.buyer_id, &order.seller_id]
			.into_iter()
			.map(|party| {
				notify(party, kind, "Order Completed", format!("Order #{} is complete.", id), id)
			})
			.collect(),
		OrderStatus::Cancelled => [&order.buyer_id, &order.seller_id]
			.into_iter()
			.map(|party| {
				notify(party, kind, "Order Cancelled", format!("Order #{} was cancelled.", id), id)
			})
			.collect(),
		OrderStatus::Disputed => [&order.buyer_id, &order.seller_id]
			.into_iter()
			.map(|party| {
				notify(
					party,
					kind,
					"Order Disputed",
					format!("A dispute was opened for order #{}.", id),
					id,
				)
			})
			.collect(),
		OrderStatus::Created => Vec::new(),
	}
}

/// Notifications produced by one event.
pub fn notifications_for(event: &EscrowEvent) -> Vec<Notification> {
	match event {
		EscrowEvent::Order(OrderEvent::Created { order }) => vec![notify(
			&order.seller_id,
			NotificationKind::Order,
			"New Order",
			format!(
				"You have a new order #{} for {} x {}.",
				order.id,
				order.terms.quantity(),
				order.terms.product_id()
			),
			&order.id,
		)],
		EscrowEvent::Order(OrderEvent::StatusChanged { order, to, .. }) => {
			status_notifications(order, *to)
		},
		EscrowEvent::Payment(PaymentEvent::Confirmed {
			order_id, buyer_id, ..
		}) => vec![notify(
			buyer_id,
			NotificationKind::Payment,
			"Payment Confirmed",
			format!("Your payment for order #{} was confirmed.", order_id),
			order_id,
		)],
		EscrowEvent::Payment(PaymentEvent::Failed {
			order_id,
			buyer_id,
			reason,
			..
		}) => vec![notify(
			buyer_id,
			NotificationKind::Payment,
			"Payment Failed",
			format!("Your payment for order #{} did not go through: {}", order_id, reason),
			order_id,
		)],
		EscrowEvent::Payment(PaymentEvent::Initiated { .. }) => Vec::new(),
	}
}

/// Spawns the task delivering bus events to connected users.
pub fn spawn_dispatcher(event_bus: &EventBus, registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
	let mut events = event_bus.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => {
					for notification in notifications_for(&event) {
						let reached = registry.send(&notification);
						tracing::debug!(
							recipient = %truncate_id(&notification.recipient_id),
							title = %notification.title,
							reached,
							"Dispatched notification"
						);
					}
				},
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Notification dispatcher lagged");
				},
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	})
}
