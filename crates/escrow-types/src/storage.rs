//! Storage-related types for the escrow system.

use std::str::FromStr;

/// Storage namespaces for the escrow collections.
///
/// Records are stored under `namespace:id`. Index namespaces hold the id (or
/// list of ids) of the record they point at rather than the record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order aggregates keyed by order id
	Orders,
	/// Crypto payment attempts keyed by transaction id
	Transactions,
	/// Transaction hash to transaction id
	TransactionByHash,
	/// Order id to the list of its payment attempt ids
	TransactionsByOrder,
	/// Mobile-money payment reference to order id
	OrderByPaymentReference,
	/// User id to the list of order ids where the user is a party
	OrdersByUser,
	/// Owner id to the owner's wallets
	Wallets,
	/// Directory users keyed by user id
	Users,
	/// Catalog products keyed by product id
	Products,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Transactions => "transactions",
			StorageKey::TransactionByHash => "transaction_by_hash",
			StorageKey::TransactionsByOrder => "transactions_by_order",
			StorageKey::OrderByPaymentReference => "order_by_payment_reference",
			StorageKey::OrdersByUser => "orders_by_user",
			StorageKey::Wallets => "wallets",
			StorageKey::Users => "users",
			StorageKey::Products => "products",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Transactions,
			Self::TransactionByHash,
			Self::TransactionsByOrder,
			Self::OrderByPaymentReference,
			Self::OrdersByUser,
			Self::Wallets,
			Self::Users,
			Self::Products,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
