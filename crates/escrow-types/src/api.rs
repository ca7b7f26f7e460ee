//! API types for the escrow HTTP API.
//!
//! Request bodies, response views and the structured error envelope shared
//! by every `/api/v1` endpoint.

use crate::{
	Order, OrderStatus, PaymentMethod, PaymentTransaction, VerificationOutcome, WalletKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request to place an order for a catalog product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub product_id: String,
	#[serde(default = "default_quantity")]
	pub quantity: u32,
	pub payment_method: PaymentMethod,
	pub shipping_address: Option<String>,
}

fn default_quantity() -> u32 {
	1
}

/// Which side of the caller's orders to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderScope {
	/// Orders where the caller is buyer or seller.
	#[default]
	All,
	/// Orders where the caller is the buyer.
	Purchases,
	/// Orders where the caller is the seller.
	Sales,
}

/// Query string for `GET /orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
	#[serde(default)]
	pub scope: OrderScope,
}

/// Request to move an order to a new status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
	pub status: OrderStatus,
	pub tracking_number: Option<String>,
	pub transaction_hash: Option<String>,
	pub wallet_used: Option<WalletKind>,
}

/// Request to start a crypto payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitCryptoPaymentRequest {
	pub order_id: String,
}

/// Request to verify a crypto payment by transaction hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCryptoPaymentRequest {
	/// Transaction hash broadcast by the buyer's wallet.
	pub reference: String,
	/// Pending attempt to attach the hash to, if not yet attached.
	pub transaction_id: Option<String>,
}

/// Request to start a mobile-money payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitMobileMoneyRequest {
	pub order_id: String,
	pub phone_number: String,
}

/// Request to verify a mobile-money payment by reference or order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyMobileMoneyRequest {
	pub reference: Option<String>,
	pub order_id: Option<String>,
}

/// Callback body posted by the mobile-money provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileMoneyWebhook {
	pub reference: String,
}

/// Request to register a payout wallet for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWalletRequest {
	pub address: String,
	pub network: String,
	pub kind: WalletKind,
}

/// Current view of a payment after a verify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerificationResponse {
	pub outcome: VerificationOutcome,
	pub order: Order,
	/// Payment attempt, for the crypto rail.
	pub transaction: Option<PaymentTransaction>,
	pub error_message: Option<String>,
}

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: String,
	pub service_id: String,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed request or illegal transition (400)
	BadRequest { error_type: String, message: String },
	/// Missing or unknown caller identity (401)
	Unauthorized { message: String },
	/// Caller may not perform this action (403)
	Forbidden { message: String },
	/// Order, transaction or wallet absent (404)
	NotFound { message: String },
	/// Ledger or gateway rejected the payment (422)
	UnprocessableEntity { error_type: String, message: String },
	/// Ledger or gateway unavailable, retryable (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Unexpected failure (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Unauthorized { .. } => 401,
			APIError::Forbidden { .. } => 403,
			APIError::NotFound { .. } => 404,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type.as_str(), message, None),
			APIError::Unauthorized { message } => ("UNAUTHORIZED", message, None),
			APIError::Forbidden { message } => ("FORBIDDEN", message, None),
			APIError::NotFound { message } => ("NOT_FOUND", message, None),
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type.as_str(), message, *retry_after),
		};
		ErrorResponse {
			error: error.to_string(),
			message: message.clone(),
			details: None,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.error, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_response_shape() {
		let error = APIError::ServiceUnavailable {
			error_type: "EXTERNAL_UNAVAILABLE".to_string(),
			message: "ledger timed out".to_string(),
			retry_after: Some(5),
		};
		assert_eq!(error.status_code(), 503);

		let body = serde_json::to_value(error.to_error_response()).unwrap();
		assert_eq!(body["error"], "EXTERNAL_UNAVAILABLE");
		assert_eq!(body["retryAfter"], 5);
	}

	#[test]
	fn test_create_order_defaults_quantity() {
		let request: CreateOrderRequest =
			serde_json::from_str(r#"{"product_id":"p-1","payment_method":"mobile_money"}"#).unwrap();
		assert_eq!(request.quantity, 1);
		assert_eq!(request.payment_method, PaymentMethod::MobileMoney);
	}
}
