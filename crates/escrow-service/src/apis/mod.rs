//! HTTP handlers for the escrow API.
//!
//! Every handler resolves its caller from the `X-User-Id` header and
//! translates engine errors into the JSON error envelope.

pub mod orders;
pub mod payments;
pub mod wallets;
pub mod webhooks;
pub mod ws;

use crate::server::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use escrow_core::EscrowError;
use escrow_types::{APIError, Actor, User};

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Seconds a client should wait before retrying an unavailable lookup.
const RETRY_AFTER_SECONDS: u64 = 5;

/// Authenticated caller of a request.
pub struct Caller(pub User);

impl Caller {
	pub fn actor(&self) -> Actor {
		Actor::from(&self.0)
	}
}

impl FromRequestParts<AppState> for Caller {
	type Rejection = APIError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, APIError> {
		let user_id = parts
			.headers
			.get(USER_ID_HEADER)
			.and_then(|value| value.to_str().ok())
			.map(str::trim)
			.filter(|value| !value.is_empty())
			.ok_or_else(|| APIError::Unauthorized {
				message: "Missing X-User-Id header".to_string(),
			})?;

		match state.engine.user(user_id).await {
			Ok(Some(user)) => Ok(Caller(user)),
			Ok(None) => Err(APIError::Unauthorized {
				message: "Unknown user".to_string(),
			}),
			Err(e) => Err(api_error(e)),
		}
	}
}

/// Maps an engine error onto its HTTP representation.
pub fn api_error(error: EscrowError) -> APIError {
	let message = error.to_string();
	match error {
		EscrowError::Forbidden(_) => APIError::Forbidden { message },
		EscrowError::NotFound(_) => APIError::NotFound { message },
		EscrowError::InvalidTransition { .. } => APIError::BadRequest {
			error_type: "INVALID_TRANSITION".to_string(),
			message,
		},
		EscrowError::NoPayeeChannel(_) => APIError::BadRequest {
			error_type: "NO_PAYEE_CHANNEL".to_string(),
			message,
		},
		EscrowError::Validation(_) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
		},
		EscrowError::ExternalUnavailable(_) => APIError::ServiceUnavailable {
			error_type: "EXTERNAL_UNAVAILABLE".to_string(),
			message,
			retry_after: Some(RETRY_AFTER_SECONDS),
		},
		EscrowError::VerificationFailed(_) => APIError::UnprocessableEntity {
			error_type: "VERIFICATION_FAILED".to_string(),
			message,
		},
		EscrowError::UnsupportedCurrency { .. } => APIError::UnprocessableEntity {
			error_type: "UNSUPPORTED_CURRENCY".to_string(),
			message,
		},
		EscrowError::Storage(_) => {
			tracing::error!(error = %message, "Storage failure");
			APIError::InternalServerError {
				error_type: "STORAGE_ERROR".to_string(),
				message: "Internal storage error".to_string(),
			}
		},
	}
}
