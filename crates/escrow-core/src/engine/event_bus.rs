//! In-process event bus.
//!
//! Fan-out of [`EscrowEvent`]s to any number of subscribers over a tokio
//! broadcast channel. Publishing never blocks; a subscriber that falls too
//! far behind observes `RecvError::Lagged` and skips ahead.

use escrow_types::EscrowEvent;
use tokio::sync::broadcast;

/// Cloneable handle to the shared event channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EscrowEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Subscribes to events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: EscrowEvent,
	) -> Result<usize, broadcast::error::SendError<EscrowEvent>> {
		self.sender.send(event)
	}
}
