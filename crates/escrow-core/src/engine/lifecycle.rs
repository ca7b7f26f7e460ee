//! Lifecycle management for the escrow engine.
//!
//! `initialize` starts the background tasks (notification dispatch and
//! storage cleanup); `shutdown` stops them and drains the connection
//! registry so open notification streams end.

use super::{EngineError, EscrowEngine};
use crate::notifications::spawn_dispatcher;
use std::time::Duration;

impl EscrowEngine {
	/// Starts background tasks. Calling it twice is an error.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(service_id = %self.config.service.id, "Initializing escrow engine");

		let period = Duration::from_secs(self.config.storage.cleanup_interval_seconds);
		if period.is_zero() {
			return Err(EngineError::Config(
				"storage.cleanup_interval_seconds must be positive".into(),
			));
		}

		let mut tasks = self
			.tasks
			.lock()
			.map_err(|e| EngineError::Service(e.to_string()))?;
		if !tasks.is_empty() {
			return Err(EngineError::Service("Engine already initialized".into()));
		}
		tasks.push(spawn_dispatcher(&self.event_bus, self.connections.clone()));

		let storage = self.storage.clone();
		tasks.push(tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
			}
		}));
		Ok(())
	}

	/// Stops background tasks and closes every notification stream.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down escrow engine");

		let tasks = {
			let mut tasks = self
				.tasks
				.lock()
				.map_err(|e| EngineError::Service(e.to_string()))?;
			std::mem::take(&mut *tasks)
		};
		for task in tasks {
			task.abort();
		}

		let closed = self.connections.drain();
		tracing::info!(closed, "Notification streams closed");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::builder::{default_factories, EscrowBuilder};
	use escrow_config::builders::config::ConfigBuilder;

	#[tokio::test]
	async fn test_initialize_and_shutdown() {
		let engine = EscrowBuilder::new(ConfigBuilder::new().build())
			.build(default_factories())
			.await
			.unwrap();

		engine.initialize().await.unwrap();
		assert!(engine.initialize().await.is_err());
		let stream = engine.connections().register("buyer");
		assert!(stream.is_some());

		engine.shutdown().await.unwrap();
		assert!(engine.connections().register("buyer").is_none());
		assert!(engine.tasks.lock().unwrap().is_empty());
	}
}
