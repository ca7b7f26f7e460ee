//! Payee wallet records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet application a payer or payee uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
	SafePal,
	TrustWallet,
	Tonkeeper,
	MyTonWallet,
	Other,
}

impl fmt::Display for WalletKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			WalletKind::SafePal => "safe_pal",
			WalletKind::TrustWallet => "trust_wallet",
			WalletKind::Tonkeeper => "tonkeeper",
			WalletKind::MyTonWallet => "my_ton_wallet",
			WalletKind::Other => "other",
		};
		f.write_str(name)
	}
}

/// A payout address registered by a user.
///
/// At most one wallet per owner carries `is_primary`; registering a new
/// wallet makes it primary and clears the flag on the owner's others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
	pub owner_id: String,
	pub address: String,
	/// Network identifier, e.g. `bsc`.
	pub network: String,
	pub kind: WalletKind,
	pub is_primary: bool,
	pub created_at: DateTime<Utc>,
}
