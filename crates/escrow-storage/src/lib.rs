//! Storage module for the escrow system.
//!
//! Orders, payment attempts, wallets and their lookup indexes are persisted
//! as JSON documents under `namespace:id` keys. Backends only deal in bytes;
//! [`StorageService`] adds typed access and batched writes so that an order
//! and the records derived from it are committed together.

use async_trait::async_trait;
use escrow_types::{ConfigSchema, ImplementationRegistry, StorageKey};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface for storage backends.
///
/// Plain key-value operations over raw bytes with optional TTL.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Stores several entries as one unit.
	///
	/// Backends that can make the whole batch visible at once should override
	/// this. The default writes entries in order.
	async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
		for (key, value) in entries {
			self.set_bytes(&key, value, None).await?;
		}
		Ok(())
	}

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn storage_key(namespace: StorageKey, id: &str) -> String {
	format!("{}:{}", namespace.as_str(), id)
}

fn to_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// A set of typed writes committed together by [`StorageService::commit`].
#[derive(Debug, Default)]
pub struct WriteBatch {
	entries: Vec<(String, Vec<u8>)>,
}

impl WriteBatch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a serialized value to the batch.
	pub fn put<T: Serialize>(
		&mut self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<&mut Self, StorageError> {
		self.entries.push((storage_key(namespace, id), to_bytes(data)?));
		Ok(self)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// High-level storage service that provides typed operations.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value under `namespace:id`.
	pub async fn store<T: Serialize>(
		&self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&storage_key(namespace, id), to_bytes(data)?, None)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&storage_key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Updates an existing value, failing with `NotFound` if it is absent.
	pub async fn update<T: Serialize>(
		&self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, to_bytes(data)?, None).await
	}

	/// Writes every entry of the batch as one unit.
	pub async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
		if batch.is_empty() {
			return Ok(());
		}
		self.backend.set_many(batch.entries).await
	}

	pub async fn remove(&self, namespace: StorageKey, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&storage_key(namespace, id)).await
	}

	pub async fn exists(&self, namespace: StorageKey, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&storage_key(namespace, id)).await
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Record {
		id: String,
		value: u32,
	}

	#[tokio::test]
	async fn test_typed_store_and_find() {
		let storage = StorageService::new(Box::new(MemoryStorage::new()));
		let record = Record {
			id: "o-1".into(),
			value: 7,
		};

		storage.store(StorageKey::Orders, "o-1", &record).await.unwrap();
		let loaded: Record = storage.retrieve(StorageKey::Orders, "o-1").await.unwrap();
		assert_eq!(loaded, record);

		let missing: Option<Record> = storage.find(StorageKey::Orders, "o-2").await.unwrap();
		assert!(missing.is_none());
		assert!(!storage.exists(StorageKey::Transactions, "o-1").await.unwrap());
	}

	#[tokio::test]
	async fn test_update_requires_existing_key() {
		let storage = StorageService::new(Box::new(MemoryStorage::new()));
		let record = Record {
			id: "w-1".into(),
			value: 1,
		};
		let result = storage.update(StorageKey::Wallets, "w-1", &record).await;
		assert!(matches!(result, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_commit_batch() {
		let storage = StorageService::new(Box::new(MemoryStorage::new()));
		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Transactions, "t-1", &Record { id: "t-1".into(), value: 1 })
			.unwrap()
			.put(StorageKey::TransactionByHash, "0xabc", &"t-1")
			.unwrap();
		assert_eq!(batch.len(), 2);

		storage.commit(batch).await.unwrap();
		let id: String = storage
			.retrieve(StorageKey::TransactionByHash, "0xabc")
			.await
			.unwrap();
		assert_eq!(id, "t-1");
	}
}
