//! Directory collaborators: users, products and payee wallets.
//!
//! The engine only needs narrow lookups from these collaborators, so each is
//! a trait. [`StorageDirectory`] implements all three on top of the storage
//! service and can be seeded from configuration.

use crate::error::EscrowError;
use crate::state::KeyedLocks;
use async_trait::async_trait;
use chrono::Utc;
use escrow_storage::StorageService;
use escrow_types::{
	is_evm_address, truncate_id, Product, RegisterWalletRequest, StorageKey, User, Wallet,
};
use std::sync::Arc;

/// Networks whose addresses are 20-byte EVM addresses.
const EVM_NETWORKS: &[&str] = &["bsc", "ethereum", "polygon", "arbitrum", "base", "optimism"];

/// Looks up users by id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
	async fn get_user(&self, user_id: &str) -> Result<Option<User>, EscrowError>;
}

/// Looks up catalog products by id.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
	async fn get_product(&self, product_id: &str) -> Result<Option<Product>, EscrowError>;
}

/// Payout wallets registered by sellers.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
	/// Registers a wallet for `owner_id` and makes it the primary one.
	async fn register_wallet(
		&self,
		owner_id: &str,
		request: RegisterWalletRequest,
	) -> Result<Wallet, EscrowError>;

	async fn primary_wallet(&self, owner_id: &str) -> Result<Option<Wallet>, EscrowError>;

	async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>, EscrowError>;
}

/// Whether addresses on `network` must be EVM addresses.
pub fn is_evm_network(network: &str) -> bool {
	EVM_NETWORKS
		.iter()
		.any(|candidate| candidate.eq_ignore_ascii_case(network))
}

/// Storage-backed implementation of every directory trait.
pub struct StorageDirectory {
	storage: Arc<StorageService>,
	wallet_locks: KeyedLocks,
}

impl StorageDirectory {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			wallet_locks: KeyedLocks::new(),
		}
	}

	/// Writes configured users and products, replacing stored copies.
	pub async fn seed(&self, users: &[User], products: &[Product]) -> Result<(), EscrowError> {
		for user in users {
			self.storage.store(StorageKey::Users, &user.id, user).await?;
		}
		for product in products {
			self.storage
				.store(StorageKey::Products, &product.id, product)
				.await?;
		}
		tracing::debug!(users = users.len(), products = products.len(), "Seeded directory");
		Ok(())
	}
}

#[async_trait]
impl UserDirectory for StorageDirectory {
	async fn get_user(&self, user_id: &str) -> Result<Option<User>, EscrowError> {
		Ok(self.storage.find(StorageKey::Users, user_id).await?)
	}
}

#[async_trait]
impl ProductCatalog for StorageDirectory {
	async fn get_product(&self, product_id: &str) -> Result<Option<Product>, EscrowError> {
		Ok(self.storage.find(StorageKey::Products, product_id).await?)
	}
}

#[async_trait]
impl WalletDirectory for StorageDirectory {
	async fn register_wallet(
		&self,
		owner_id: &str,
		request: RegisterWalletRequest,
	) -> Result<Wallet, EscrowError> {
		let address = request.address.trim().to_string();
		let network = request.network.trim().to_lowercase();
		if address.is_empty() {
			return Err(EscrowError::Validation("Wallet address is required".into()));
		}
		if network.is_empty() {
			return Err(EscrowError::Validation("Wallet network is required".into()));
		}
		if is_evm_network(&network) && !is_evm_address(&address) {
			return Err(EscrowError::Validation(format!(
				"'{}' is not a valid {} address",
				address, network
			)));
		}

		let _guard = self.wallet_locks.lock(owner_id).await;
		let mut wallets: Vec<Wallet> = self
			.storage
			.find(StorageKey::Wallets, owner_id)
			.await?
			.unwrap_or_default();

		if wallets
			.iter()
			.any(|wallet| wallet.address.eq_ignore_ascii_case(&address))
		{
			return Err(EscrowError::Validation("Wallet already registered".into()));
		}

		for wallet in &mut wallets {
			wallet.is_primary = false;
		}
		let wallet = Wallet {
			owner_id: owner_id.to_string(),
			address,
			network,
			kind: request.kind,
			is_primary: true,
			created_at: Utc::now(),
		};
		wallets.push(wallet.clone());
		self.storage
			.store(StorageKey::Wallets, owner_id, &wallets)
			.await?;

		tracing::info!(
			owner_id = %truncate_id(owner_id),
			address = %truncate_id(&wallet.address),
			network = %wallet.network,
			"Registered wallet"
		);
		Ok(wallet)
	}

	async fn primary_wallet(&self, owner_id: &str) -> Result<Option<Wallet>, EscrowError> {
		Ok(self
			.list_wallets(owner_id)
			.await?
			.into_iter()
			.find(|wallet| wallet.is_primary))
	}

	async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>, EscrowError> {
		Ok(self
			.storage
			.find(StorageKey::Wallets, owner_id)
			.await?
			.unwrap_or_default())
	}
}
