//! Per-key async mutual exclusion.
//!
//! Read-modify-write cycles on one order (or one index record) run under a
//! lock keyed by its id. Unrelated keys never contend, and the entry for a
//! key is dropped once nobody holds or waits for it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of locks keyed by record id.
#[derive(Default)]
pub struct KeyedLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits for exclusive access to `key`.
	pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
		// Clone out of the map before awaiting so the shard lock is released
		let mutex = Arc::clone(&self.locks.entry(key.to_string()).or_default());
		let guard = mutex.lock_owned().await;
		KeyGuard {
			locks: self,
			key: key.to_string(),
			guard: Some(guard),
		}
	}

	/// Number of keys currently held or waited on.
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}

/// Exclusive access to one key until dropped.
pub struct KeyGuard<'a> {
	locks: &'a KeyedLocks,
	key: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard<'_> {
	pub fn key(&self) -> &str {
		&self.key
	}
}

impl Drop for KeyGuard<'_> {
	fn drop(&mut self) {
		drop(self.guard.take());
		// Only the map still references the mutex when nobody is waiting
		self.locks
			.locks
			.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn test_same_key_serializes() {
		let locks = Arc::new(KeyedLocks::new());
		let inside = Arc::new(AtomicUsize::new(0));
		let max_inside = Arc::new(AtomicUsize::new(0));

		let tasks: Vec<_> = (0..8)
			.map(|_| {
				let locks = locks.clone();
				let inside = inside.clone();
				let max_inside = max_inside.clone();
				tokio::spawn(async move {
					let _guard = locks.lock("order-1").await;
					let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
					max_inside.fetch_max(now, Ordering::SeqCst);
					tokio::time::sleep(Duration::from_millis(5)).await;
					inside.fetch_sub(1, Ordering::SeqCst);
				})
			})
			.collect();
		for task in tasks {
			task.await.unwrap();
		}

		assert_eq!(max_inside.load(Ordering::SeqCst), 1);
		assert!(locks.is_empty());
	}

	#[tokio::test]
	async fn test_different_keys_do_not_block() {
		let locks = KeyedLocks::new();
		let first = locks.lock("a").await;
		let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
		assert!(second.is_ok());
		assert_eq!(first.key(), "a");
		assert_eq!(locks.len(), 2);
	}
}
