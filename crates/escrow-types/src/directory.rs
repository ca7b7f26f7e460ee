//! Records served by the user directory and product catalog.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Role of a marketplace user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
	Customer,
	Vendor,
	/// Operators allowed to act as the privileged system actor.
	Admin,
}

/// A marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: String,
	pub role: UserRole,
	/// Legacy single wallet address from the profile.
	#[serde(default)]
	pub wallet: Option<String>,
}

/// A catalog product offered by a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
	pub id: String,
	pub seller_id: String,
	pub price: Decimal,
	#[serde(default = "default_currency")]
	pub currency: String,
}

fn default_currency() -> String {
	"USD".to_string()
}
