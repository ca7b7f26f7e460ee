//! Order types for the escrow purchase flow.
//!
//! An [`Order`] is the aggregate root of a purchase. Its commercial terms are
//! fixed at creation, its status only moves through the lifecycle transitions,
//! and each lifecycle timestamp is written at most once.

use crate::WalletKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while constructing an order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
	/// The buyer and the seller are the same party.
	#[error("Buyer and seller must differ")]
	SelfPurchase,
	/// Quantity must be at least one.
	#[error("Quantity must be at least 1, got {0}")]
	InvalidQuantity(u32),
	/// Unit price must not be negative.
	#[error("Unit price must not be negative: {0}")]
	NegativePrice(Decimal),
	/// Unit price times quantity does not fit in a decimal.
	#[error("Total of {unit_price} x {quantity} is out of range")]
	TotalOverflow { unit_price: Decimal, quantity: u32 },
	/// Stored total does not equal unit price times quantity.
	#[error("Total {total} does not match {unit_price} x {quantity}")]
	TotalMismatch {
		total: Decimal,
		unit_price: Decimal,
		quantity: u32,
	},
}

/// Lifecycle status of an order.
///
/// `CREATED -> PAID_ESCROW -> SHIPPED -> DELIVERED -> COMPLETED`, with side
/// exits to `CANCELLED` (from `CREATED`) and `DISPUTED` (from any
/// non-terminal status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	Created,
	PaidEscrow,
	Shipped,
	Delivered,
	Completed,
	Cancelled,
	Disputed,
}

impl OrderStatus {
	/// Returns the wire representation of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Created => "CREATED",
			OrderStatus::PaidEscrow => "PAID_ESCROW",
			OrderStatus::Shipped => "SHIPPED",
			OrderStatus::Delivered => "DELIVERED",
			OrderStatus::Completed => "COMPLETED",
			OrderStatus::Cancelled => "CANCELLED",
			OrderStatus::Disputed => "DISPUTED",
		}
	}

	/// Whether no further transition is defined from this status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Disputed
		)
	}

	/// Returns an iterator over all statuses.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Created,
			Self::PaidEscrow,
			Self::Shipped,
			Self::Delivered,
			Self::Completed,
			Self::Cancelled,
			Self::Disputed,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}

/// Payment rail chosen for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
	/// On-chain stablecoin transfer to the seller's wallet.
	Crypto,
	/// Hosted mobile-money checkout.
	MobileMoney,
}

impl fmt::Display for PaymentMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PaymentMethod::Crypto => f.write_str("crypto"),
			PaymentMethod::MobileMoney => f.write_str("mobile_money"),
		}
	}
}

/// Commercial terms captured when an order is placed.
///
/// Fields are private so the total can only be produced by [`OrderTerms::new`],
/// and deserialization rejects records whose total disagrees with
/// `unit_price * quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOrderTerms")]
pub struct OrderTerms {
	product_id: String,
	quantity: u32,
	unit_price: Decimal,
	currency: String,
	total_price: Decimal,
}

#[derive(Deserialize)]
struct RawOrderTerms {
	product_id: String,
	quantity: u32,
	unit_price: Decimal,
	currency: String,
	total_price: Decimal,
}

impl TryFrom<RawOrderTerms> for OrderTerms {
	type Error = OrderError;

	fn try_from(raw: RawOrderTerms) -> Result<Self, Self::Error> {
		let terms = OrderTerms::new(raw.product_id, raw.quantity, raw.unit_price, raw.currency)?;
		if terms.total_price != raw.total_price {
			return Err(OrderError::TotalMismatch {
				total: raw.total_price,
				unit_price: raw.unit_price,
				quantity: raw.quantity,
			});
		}
		Ok(terms)
	}
}

impl OrderTerms {
	/// Snapshots a product price and computes the order total.
	pub fn new(
		product_id: impl Into<String>,
		quantity: u32,
		unit_price: Decimal,
		currency: impl Into<String>,
	) -> Result<Self, OrderError> {
		if quantity == 0 {
			return Err(OrderError::InvalidQuantity(quantity));
		}
		if unit_price < Decimal::ZERO {
			return Err(OrderError::NegativePrice(unit_price));
		}
		let total_price = unit_price
			.checked_mul(Decimal::from(quantity))
			.ok_or(OrderError::TotalOverflow {
				unit_price,
				quantity,
			})?;
		Ok(Self {
			product_id: product_id.into(),
			quantity,
			unit_price,
			currency: currency.into(),
			total_price,
		})
	}

	pub fn product_id(&self) -> &str {
		&self.product_id
	}

	pub fn quantity(&self) -> u32 {
		self.quantity
	}

	pub fn unit_price(&self) -> Decimal {
		self.unit_price
	}

	pub fn currency(&self) -> &str {
		&self.currency
	}

	pub fn total_price(&self) -> Decimal {
		self.total_price
	}
}

/// An escrow purchase between a buyer and a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	pub buyer_id: String,
	pub seller_id: String,
	/// Immutable commercial terms.
	pub terms: OrderTerms,
	pub payment_method: PaymentMethod,
	/// Transaction hash or mobile-money payment reference.
	pub transaction_reference: Option<String>,
	/// Address the crypto payment was sent to.
	pub escrow_address: Option<String>,
	pub wallet_used: Option<WalletKind>,
	/// Mobile-money references the gateway reported as failed.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub failed_payment_references: Vec<String>,
	pub shipping_address: Option<String>,
	pub tracking_number: Option<String>,
	pub status: OrderStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub paid_at: Option<DateTime<Utc>>,
	pub shipped_at: Option<DateTime<Utc>>,
	pub delivered_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Creates a new order in the `CREATED` status.
	pub fn new(
		id: impl Into<String>,
		buyer_id: impl Into<String>,
		seller_id: impl Into<String>,
		terms: OrderTerms,
		payment_method: PaymentMethod,
		shipping_address: Option<String>,
		now: DateTime<Utc>,
	) -> Result<Self, OrderError> {
		let buyer_id = buyer_id.into();
		let seller_id = seller_id.into();
		if buyer_id == seller_id {
			return Err(OrderError::SelfPurchase);
		}
		Ok(Self {
			id: id.into(),
			buyer_id,
			seller_id,
			terms,
			payment_method,
			transaction_reference: None,
			escrow_address: None,
			wallet_used: None,
			failed_payment_references: Vec::new(),
			shipping_address,
			tracking_number: None,
			status: OrderStatus::Created,
			created_at: now,
			updated_at: now,
			paid_at: None,
			shipped_at: None,
			delivered_at: None,
			completed_at: None,
		})
	}

	/// Whether the user is the buyer or the seller of this order.
	pub fn is_party(&self, user_id: &str) -> bool {
		self.buyer_id == user_id || self.seller_id == user_id
	}

	/// Latest timestamp recorded on the order.
	///
	/// Lifecycle timestamps are stamped with `max(now, latest_timestamp())`
	/// so they never decrease even if the clock steps backwards.
	pub fn latest_timestamp(&self) -> DateTime<Utc> {
		[
			self.paid_at,
			self.shipped_at,
			self.delivered_at,
			self.completed_at,
		]
		.into_iter()
		.flatten()
		.chain([self.created_at, self.updated_at])
		.max()
		.unwrap_or(self.created_at)
	}
}
