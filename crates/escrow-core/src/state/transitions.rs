//! Escrow transition table.
//!
//! Each target status has exactly one rule naming who may request it, which
//! statuses it may be entered from and what it records on the order.
//! Adding a transition means adding a row to [`TRANSITIONS`].

use chrono::{DateTime, Utc};
use escrow_types::{Actor, Order, OrderStatus, TransitionEvidence};
use thiserror::Error;

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("Actor is not allowed to move this order to {target}")]
	Forbidden { target: OrderStatus },
	#[error("Cannot move order from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
}

/// Who may request a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRule {
	Buyer,
	Seller,
	BuyerOrSeller,
	/// The buyer, the system actor or an admin.
	BuyerOrPrivileged,
}

impl ActorRule {
	pub fn permits(&self, actor: &Actor, order: &Order) -> bool {
		let buyer = actor.is(&order.buyer_id);
		match self {
			ActorRule::Buyer => buyer,
			ActorRule::Seller => actor.is(&order.seller_id),
			ActorRule::BuyerOrSeller => buyer || actor.is(&order.seller_id),
			ActorRule::BuyerOrPrivileged => buyer || actor.is_privileged(),
		}
	}
}

type Effect = fn(&mut Order, &TransitionEvidence, DateTime<Utc>);

/// One row of the transition table.
pub struct TransitionRule {
	pub target: OrderStatus,
	pub actor: ActorRule,
	pub from: &'static [OrderStatus],
	effect: Effect,
}

impl TransitionRule {
	pub fn allows_from(&self, status: OrderStatus) -> bool {
		self.from.contains(&status)
	}
}

fn mark_paid(order: &mut Order, evidence: &TransitionEvidence, now: DateTime<Utc>) {
	order.paid_at.get_or_insert(now);
	if let Some(reference) = &evidence.transaction_reference {
		order.transaction_reference = Some(reference.clone());
	}
	if let Some(address) = &evidence.escrow_address {
		order.escrow_address = Some(address.clone());
	}
	if let Some(wallet) = evidence.wallet_used {
		order.wallet_used = Some(wallet);
	}
	if let Some(method) = evidence.payment_method {
		order.payment_method = method;
	}
}

fn mark_shipped(order: &mut Order, evidence: &TransitionEvidence, now: DateTime<Utc>) {
	order.shipped_at.get_or_insert(now);
	if let Some(tracking) = &evidence.tracking_number {
		order.tracking_number = Some(tracking.clone());
	}
}

fn mark_delivered(order: &mut Order, _: &TransitionEvidence, now: DateTime<Utc>) {
	order.delivered_at.get_or_insert(now);
}

fn mark_completed(order: &mut Order, _: &TransitionEvidence, now: DateTime<Utc>) {
	order.completed_at.get_or_insert(now);
}

fn no_effect(_: &mut Order, _: &TransitionEvidence, _: DateTime<Utc>) {}

pub static TRANSITIONS: &[TransitionRule] = &[
	TransitionRule {
		target: OrderStatus::PaidEscrow,
		actor: ActorRule::BuyerOrPrivileged,
		from: &[OrderStatus::Created],
		effect: mark_paid,
	},
	TransitionRule {
		target: OrderStatus::Shipped,
		actor: ActorRule::Seller,
		from: &[OrderStatus::PaidEscrow],
		effect: mark_shipped,
	},
	TransitionRule {
		target: OrderStatus::Delivered,
		actor: ActorRule::Buyer,
		from: &[OrderStatus::Shipped],
		effect: mark_delivered,
	},
	TransitionRule {
		target: OrderStatus::Completed,
		actor: ActorRule::BuyerOrPrivileged,
		from: &[OrderStatus::Delivered],
		effect: mark_completed,
	},
	TransitionRule {
		target: OrderStatus::Cancelled,
		actor: ActorRule::BuyerOrSeller,
		from: &[OrderStatus::Created],
		effect: no_effect,
	},
	TransitionRule {
		target: OrderStatus::Disputed,
		actor: ActorRule::BuyerOrSeller,
		from: &[
			OrderStatus::Created,
			OrderStatus::PaidEscrow,
			OrderStatus::Shipped,
			OrderStatus::Delivered,
		],
		effect: no_effect,
	},
];

/// Rule for entering `target`, if any.
pub fn rule_for(target: OrderStatus) -> Option<&'static TransitionRule> {
	TRANSITIONS.iter().find(|rule| rule.target == target)
}

/// Applies a transition to a copy of `order`.
///
/// The actor is checked before the current status, so a caller that may not
/// request the transition learns nothing about the order's state. On error
/// the input is untouched; on success every side effect and the new status
/// are present in the returned order. Timestamps never precede the latest
/// one already on the order.
pub fn apply(
	order: &Order,
	target: OrderStatus,
	actor: &Actor,
	evidence: &TransitionEvidence,
	now: DateTime<Utc>,
) -> Result<Order, TransitionError> {
	let invalid = || TransitionError::InvalidTransition {
		from: order.status,
		to: target,
	};

	let rule = rule_for(target).ok_or_else(invalid)?;
	if !rule.actor.permits(actor, order) {
		return Err(TransitionError::Forbidden { target });
	}
	if !rule.allows_from(order.status) {
		return Err(invalid());
	}

	let now = now.max(order.latest_timestamp());
	let mut next = order.clone();
	(rule.effect)(&mut next, evidence, now);
	next.status = target;
	next.updated_at = now;
	Ok(next)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use escrow_types::{OrderTerms, PaymentMethod, UserRole, WalletKind};
	use rust_decimal_macros::dec;

	fn order() -> Order {
		let terms = OrderTerms::new("p-1", 2, dec!(100), "USD").unwrap();
		Order::new(
			"o-1",
			"buyer",
			"seller",
			terms,
			PaymentMethod::Crypto,
			None,
			Utc::now(),
		)
		.unwrap()
	}

	fn buyer() -> Actor {
		Actor::user("buyer", UserRole::Customer)
	}

	fn seller() -> Actor {
		Actor::user("seller", UserRole::Vendor)
	}

	fn stranger() -> Actor {
		Actor::user("mallory", UserRole::Customer)
	}

	fn admin() -> Actor {
		Actor::user("ops", UserRole::Admin)
	}

	fn with_status(status: OrderStatus) -> Order {
		Order {
			status,
			..order()
		}
	}

	fn none() -> TransitionEvidence {
		TransitionEvidence::default()
	}

	#[test]
	fn test_every_non_initial_status_has_one_rule() {
		for status in OrderStatus::all() {
			let rules = TRANSITIONS.iter().filter(|r| r.target == status).count();
			let expected = usize::from(status != OrderStatus::Created);
			assert_eq!(rules, expected, "{}", status);
		}
	}

	#[test]
	fn test_only_table_edges_succeed() {
		let actors = [buyer(), seller(), stranger(), admin(), Actor::System];
		for from in OrderStatus::all() {
			for to in OrderStatus::all() {
				let order = with_status(from);
				let legal = rule_for(to).is_some_and(|rule| rule.allows_from(from));
				for actor in &actors {
					match apply(&order, to, actor, &none(), Utc::now()) {
						Ok(next) => {
							assert!(legal, "{} -> {} succeeded", from, to);
							assert_eq!(next.status, to);
						},
						Err(TransitionError::InvalidTransition { .. }) => {},
						Err(TransitionError::Forbidden { .. }) => {
							assert!(!rule_for(to).unwrap().actor.permits(actor, &order));
						},
					}
				}
			}
		}
	}

	#[test]
	fn test_actor_checked_before_state() {
		// Shipping a completed order is invalid, but the buyer may not ship at all.
		let completed = with_status(OrderStatus::Completed);
		assert_eq!(
			apply(&completed, OrderStatus::Shipped, &buyer(), &none(), Utc::now()),
			Err(TransitionError::Forbidden {
				target: OrderStatus::Shipped
			})
		);
		assert_eq!(
			apply(&completed, OrderStatus::Shipped, &seller(), &none(), Utc::now()),
			Err(TransitionError::InvalidTransition {
				from: OrderStatus::Completed,
				to: OrderStatus::Shipped
			})
		);
	}

	#[test]
	fn test_pay_twice_is_invalid() {
		let created = order();
		assert_eq!(created.terms.total_price(), dec!(200));

		let paid = apply(&created, OrderStatus::PaidEscrow, &buyer(), &none(), Utc::now()).unwrap();
		assert_eq!(paid.status, OrderStatus::PaidEscrow);
		assert!(paid.paid_at.is_some());
		assert_eq!(paid.transaction_reference, None);

		let again = apply(&paid, OrderStatus::PaidEscrow, &buyer(), &none(), Utc::now());
		assert!(matches!(again, Err(TransitionError::InvalidTransition { .. })));
	}

	#[test]
	fn test_paid_records_evidence() {
		let evidence = TransitionEvidence {
			transaction_reference: Some("0xabc".into()),
			escrow_address: Some("0xseller".into()),
			wallet_used: Some(WalletKind::TrustWallet),
			payment_method: Some(PaymentMethod::Crypto),
			..Default::default()
		};
		let paid =
			apply(&order(), OrderStatus::PaidEscrow, &Actor::System, &evidence, Utc::now()).unwrap();
		assert_eq!(paid.transaction_reference.as_deref(), Some("0xabc"));
		assert_eq!(paid.escrow_address.as_deref(), Some("0xseller"));
		assert_eq!(paid.wallet_used, Some(WalletKind::TrustWallet));
	}

	#[test]
	fn test_full_happy_path_sets_each_timestamp_once() {
		let now = Utc::now();
		let tracking = TransitionEvidence {
			tracking_number: Some("TRK-1".into()),
			..Default::default()
		};
		let paid = apply(&order(), OrderStatus::PaidEscrow, &buyer(), &none(), now).unwrap();
		let shipped = apply(&paid, OrderStatus::Shipped, &seller(), &tracking, now).unwrap();
		let delivered = apply(&shipped, OrderStatus::Delivered, &buyer(), &none(), now).unwrap();
		let completed = apply(&delivered, OrderStatus::Completed, &admin(), &none(), now).unwrap();

		assert_eq!(completed.tracking_number.as_deref(), Some("TRK-1"));
		assert_eq!(completed.paid_at, paid.paid_at);
		assert_eq!(completed.shipped_at, shipped.shipped_at);
		assert_eq!(completed.delivered_at, delivered.delivered_at);
		assert!(completed.completed_at.is_some());
	}

	#[test]
	fn test_timestamps_never_decrease() {
		let now = Utc::now();
		let paid = apply(&order(), OrderStatus::PaidEscrow, &buyer(), &none(), now).unwrap();
		let earlier = now - Duration::hours(1);
		let shipped = apply(&paid, OrderStatus::Shipped, &seller(), &none(), earlier).unwrap();
		assert!(shipped.shipped_at >= paid.paid_at);
		assert!(shipped.updated_at >= paid.updated_at);
	}

	#[test]
	fn test_failed_transition_leaves_order_untouched() {
		let shipped = with_status(OrderStatus::Shipped);
		let before = shipped.clone();
		let evidence = TransitionEvidence {
			tracking_number: Some("TRK-2".into()),
			..Default::default()
		};
		assert!(apply(&shipped, OrderStatus::Shipped, &seller(), &evidence, Utc::now()).is_err());
		assert_eq!(shipped, before);
	}

	#[test]
	fn test_dispute_and_cancel_rules() {
		let shipped = with_status(OrderStatus::Shipped);
		let disputed = apply(&shipped, OrderStatus::Disputed, &buyer(), &none(), Utc::now()).unwrap();
		assert_eq!(disputed.status, OrderStatus::Disputed);

		assert!(matches!(
			apply(&shipped, OrderStatus::Cancelled, &seller(), &none(), Utc::now()),
			Err(TransitionError::InvalidTransition { .. })
		));
		assert!(apply(&order(), OrderStatus::Cancelled, &seller(), &none(), Utc::now()).is_ok());
		assert!(matches!(
			apply(&order(), OrderStatus::Cancelled, &admin(), &none(), Utc::now()),
			Err(TransitionError::Forbidden { .. })
		));
	}
}
