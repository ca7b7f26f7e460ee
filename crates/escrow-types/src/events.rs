//! Event types for inter-service communication.
//!
//! Events are published on the event bus after a change has been persisted.
//! Consumers (notification dispatch, chat bridges) treat them as
//! fire-and-forget signals and never feed back into the order state.

use crate::{Order, OrderStatus, PaymentMethod};
use serde::{Deserialize, Serialize};

/// Main event type encompassing all escrow events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EscrowEvent {
	/// Events from the order lifecycle.
	Order(OrderEvent),
	/// Events from the settlement coordinator.
	Payment(PaymentEvent),
}

/// Events related to the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A buyer placed a new order.
	Created { order: Order },
	/// An order moved between statuses.
	StatusChanged {
		order: Order,
		from: OrderStatus,
		to: OrderStatus,
	},
}

/// Events related to payment settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentEvent {
	/// A payment instruction was issued to the buyer.
	Initiated {
		order_id: String,
		buyer_id: String,
		method: PaymentMethod,
		reference: String,
	},
	/// A payment was confirmed and the order moved into escrow.
	Confirmed {
		order_id: String,
		buyer_id: String,
		seller_id: String,
		reference: String,
	},
	/// The ledger or gateway reported the payment did not succeed.
	Failed {
		order_id: String,
		buyer_id: String,
		reference: String,
		reason: String,
	},
}
