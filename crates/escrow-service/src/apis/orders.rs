//! Order endpoints: checkout, queries and status changes.

use super::{api_error, Caller};
use crate::server::AppState;
use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::Json,
};
use escrow_types::{
	APIError, CreateOrderRequest, ListOrdersQuery, Order, PaymentTransaction,
	UpdateOrderStatusRequest,
};

/// Handles POST /api/v1/orders.
pub async fn create_order(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), APIError> {
	let order = state
		.engine
		.create_order(&caller.0, request)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(order)))
}

/// Handles GET /api/v1/orders.
pub async fn list_orders(
	State(state): State<AppState>,
	caller: Caller,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, APIError> {
	state
		.engine
		.list_orders(&caller.0.id, query.scope)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles GET /api/v1/orders/{id}.
pub async fn get_order(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.get_order(&caller.actor(), &id)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles PUT /api/v1/orders/{id}/status.
pub async fn update_status(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<String>,
	Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, APIError> {
	match state
		.engine
		.update_order_status(&caller.actor(), &id, request)
		.await
	{
		Ok(order) => Ok(Json(order)),
		Err(e) => {
			tracing::warn!(order_id = %id, error = %e, "Status update rejected");
			Err(api_error(e))
		},
	}
}

/// Handles GET /api/v1/orders/{id}/transactions.
pub async fn list_transactions(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<String>,
) -> Result<Json<Vec<PaymentTransaction>>, APIError> {
	state
		.engine
		.list_transactions(&caller.actor(), &id)
		.await
		.map(Json)
		.map_err(api_error)
}
