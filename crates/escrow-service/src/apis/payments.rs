//! Payment endpoints for the crypto and mobile-money rails.

use super::{api_error, Caller};
use crate::server::AppState;
use axum::{extract::State, response::Json};
use escrow_types::{
	APIError, InitCryptoPaymentRequest, InitMobileMoneyRequest, PaymentInstruction,
	PaymentVerificationResponse, VerifyCryptoPaymentRequest, VerifyMobileMoneyRequest,
};

/// Handles POST /api/v1/payments/crypto/init.
pub async fn init_crypto(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<InitCryptoPaymentRequest>,
) -> Result<Json<PaymentInstruction>, APIError> {
	state
		.engine
		.init_crypto_payment(&caller.actor(), &request.order_id)
		.await
		.map(Json)
		.map_err(|e| {
			tracing::warn!(error = %e, "Crypto payment init failed");
			api_error(e)
		})
}

/// Handles POST /api/v1/payments/crypto/verify.
///
/// A pending lookup answers 200 with outcome `pending`; clients poll again.
pub async fn verify_crypto(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<VerifyCryptoPaymentRequest>,
) -> Result<Json<PaymentVerificationResponse>, APIError> {
	state
		.engine
		.verify_crypto_payment(
			&caller.actor(),
			&request.reference,
			request.transaction_id.as_deref(),
		)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/v1/payments/mobile-money/init.
pub async fn init_mobile_money(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<InitMobileMoneyRequest>,
) -> Result<Json<PaymentInstruction>, APIError> {
	state
		.engine
		.init_mobile_money(&caller.actor(), &request.order_id, &request.phone_number)
		.await
		.map(Json)
		.map_err(|e| {
			tracing::warn!(error = %e, "Mobile-money payment init failed");
			api_error(e)
		})
}

/// Handles POST /api/v1/payments/mobile-money/verify.
pub async fn verify_mobile_money(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<VerifyMobileMoneyRequest>,
) -> Result<Json<PaymentVerificationResponse>, APIError> {
	state
		.engine
		.verify_mobile_money(
			&caller.actor(),
			request.reference.as_deref(),
			request.order_id.as_deref(),
		)
		.await
		.map(Json)
		.map_err(api_error)
}
