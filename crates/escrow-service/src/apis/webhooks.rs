//! Gateway callbacks.

use super::api_error;
use crate::server::AppState;
use axum::{extract::State, http::HeaderMap, response::Json};
use escrow_types::{APIError, MobileMoneyWebhook, PaymentVerificationResponse};

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Compares every byte of `expected` whatever `presented` holds.
fn secrets_match(expected: &[u8], presented: &[u8]) -> bool {
	let mut diff = expected.len() ^ presented.len();
	for (i, byte) in expected.iter().enumerate() {
		let other = presented.get(i).copied().unwrap_or(0);
		diff |= usize::from(byte ^ other);
	}
	diff == 0
}

/// Handles POST /api/v1/webhooks/mobile-money.
///
/// Runs the verify flow as the system actor. Rejected unless the request
/// carries the configured shared secret.
pub async fn mobile_money(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<MobileMoneyWebhook>,
) -> Result<Json<PaymentVerificationResponse>, APIError> {
	let presented = headers
		.get(WEBHOOK_SECRET_HEADER)
		.and_then(|value| value.to_str().ok());
	let authorized = match (state.webhook_secret.as_deref(), presented) {
		(Some(expected), Some(presented)) => {
			secrets_match(expected.as_bytes(), presented.as_bytes())
		},
		_ => false,
	};
	if !authorized {
		tracing::warn!("Rejected mobile-money webhook with bad secret");
		return Err(APIError::Unauthorized {
			message: "Invalid webhook secret".to_string(),
		});
	}

	state
		.engine
		.handle_mobile_money_webhook(&payload.reference)
		.await
		.map(Json)
		.map_err(api_error)
}
