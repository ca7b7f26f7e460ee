//! Notification payloads pushed to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a notification, used by clients to route taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	Order,
	Payment,
}

/// A message delivered to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	pub recipient_id: String,
	pub kind: NotificationKind,
	pub title: String,
	pub body: String,
	pub order_id: String,
	pub created_at: DateTime<Utc>,
}
