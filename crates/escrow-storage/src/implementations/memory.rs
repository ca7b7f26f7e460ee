//! In-memory storage backend.
//!
//! Used by tests and single-process development setups. Nothing survives a
//! restart. Entries written with a TTL stop being visible once they expire
//! and are dropped by [`StorageInterface::cleanup_expired`].

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use escrow_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		!matches!(self.expires_at, Some(at) if at <= now)
	}
}

/// Map-backed storage guarded by a single async lock.
#[derive(Default)]
pub struct MemoryStorage {
	entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let entries = self.entries.read().await;
		entries
			.get(key)
			.filter(|entry| entry.is_live(Instant::now()))
			.map(|entry| entry.value.clone())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.entries
			.write()
			.await
			.insert(key.to_string(), Entry { value, expires_at });
		Ok(())
	}

	async fn set_many(&self, batch: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
		// Single write guard: readers see all of the batch or none of it.
		let mut entries = self.entries.write().await;
		for (key, value) in batch {
			entries.insert(
				key,
				Entry {
					value,
					expires_at: None,
				},
			);
		}
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let entries = self.entries.read().await;
		Ok(entries
			.get(key)
			.is_some_and(|entry| entry.is_live(Instant::now())))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let now = Instant::now();
		let mut entries = self.entries.write().await;
		let before = entries.len();
		entries.retain(|_, entry| entry.is_live(now));
		Ok(before - entries.len())
	}
}

/// The memory backend takes no settings.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_storage(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	Ok(Box::new(MemoryStorage::new()))
}

/// Registers the backend under `memory`.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_order_document_lifecycle() {
		let storage = MemoryStorage::new();

		let key = "orders:o-1";
		let value = b"{\"status\":\"CREATED\"}".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_set_many_overwrites() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("orders:o-1", b"old".to_vec(), None)
			.await
			.unwrap();

		storage
			.set_many(vec![
				("orders:o-1".to_string(), b"new".to_vec()),
				("transactions:t-1".to_string(), b"tx".to_vec()),
			])
			.await
			.unwrap();

		assert_eq!(storage.get_bytes("orders:o-1").await.unwrap(), b"new");
		assert_eq!(storage.get_bytes("transactions:t-1").await.unwrap(), b"tx");
	}

	#[tokio::test]
	async fn test_expired_entries_are_hidden_and_cleaned() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("links:l-1", b"short".to_vec(), Some(Duration::ZERO))
			.await
			.unwrap();
		storage
			.set_bytes("orders:o-1", b"kept".to_vec(), None)
			.await
			.unwrap();

		assert!(!storage.exists("links:l-1").await.unwrap());
		assert!(matches!(
			storage.get_bytes("links:l-1").await,
			Err(StorageError::NotFound)
		));

		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
		assert_eq!(storage.get_bytes("orders:o-1").await.unwrap(), b"kept");
	}
}
