//! Websocket stream of a user's notifications.

use crate::server::AppState;
use axum::{
	extract::{
		ws::{Message, WebSocket, WebSocketUpgrade},
		Path, State,
	},
	response::Response,
};
use escrow_core::notifications::ConnectionRegistry;
use escrow_types::{truncate_id, APIError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

/// Handles GET /api/v1/ws/{user_id}.
pub async fn notifications(
	State(state): State<AppState>,
	Path(user_id): Path<String>,
	upgrade: WebSocketUpgrade,
) -> Result<Response, APIError> {
	let known = state
		.engine
		.user(&user_id)
		.await
		.map_err(super::api_error)?;
	if known.is_none() {
		return Err(APIError::Unauthorized {
			message: "Unknown user".to_string(),
		});
	}

	let registry = state.engine.connections().clone();
	Ok(upgrade.on_upgrade(move |socket| stream_notifications(socket, user_id, registry)))
}

async fn stream_notifications(socket: WebSocket, user_id: String, registry: Arc<ConnectionRegistry>) {
	let Some(mut notifications) = registry.register(&user_id) else {
		return;
	};
	tracing::debug!(user_id = %truncate_id(&user_id), "Notification stream opened");
	let (mut sender, mut receiver) = socket.split();

	loop {
		tokio::select! {
			notification = notifications.recv() => {
				let Some(notification) = notification else {
					// Registry drained at shutdown
					let _ = sender.send(Message::Close(None)).await;
					break;
				};
				let text = match serde_json::to_string(&notification) {
					Ok(text) => text,
					Err(e) => {
						tracing::warn!(error = %e, "Failed to encode notification");
						continue;
					},
				};
				if sender.send(Message::Text(text.into())).await.is_err() {
					break;
				}
			}
			incoming = receiver.next() => match incoming {
				Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
				Some(Ok(_)) => {},
			},
		}
	}

	drop(notifications);
	registry.unregister(&user_id);
	tracing::debug!(user_id = %truncate_id(&user_id), "Notification stream closed");
}
