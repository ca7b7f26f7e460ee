//! Wallet endpoints for the caller's payee wallets.

use super::{api_error, Caller};
use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use escrow_types::{APIError, RegisterWalletRequest, Wallet};

/// Handles POST /api/v1/wallets. The new wallet becomes primary.
pub async fn register_wallet(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<RegisterWalletRequest>,
) -> Result<(StatusCode, Json<Wallet>), APIError> {
	let wallet = state
		.engine
		.register_wallet(&caller.0, request)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(wallet)))
}

/// Handles GET /api/v1/wallets.
pub async fn list_wallets(
	State(state): State<AppState>,
	caller: Caller,
) -> Result<Json<Vec<Wallet>>, APIError> {
	state
		.engine
		.list_wallets(&caller.0)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles GET /api/v1/wallets/primary.
pub async fn primary_wallet(
	State(state): State<AppState>,
	caller: Caller,
) -> Result<Json<Wallet>, APIError> {
	state
		.engine
		.primary_wallet(&caller.0)
		.await
		.map(Json)
		.map_err(api_error)
}
