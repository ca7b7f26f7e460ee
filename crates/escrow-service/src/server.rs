//! HTTP server for the escrow API.
//!
//! Builds the `/api/v1` router over the engine and serves it until the
//! shutdown future resolves.

use crate::apis::{orders, payments, wallets, webhooks, ws};
use axum::{
	extract::State,
	http::HeaderValue,
	response::Json,
	routing::{get, post, put},
	Router,
};
use escrow_config::ApiConfig;
use escrow_core::EscrowEngine;
use escrow_types::HealthResponse;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{AllowOrigin, Any, CorsLayer},
	timeout::TimeoutLayer,
	trace::TraceLayer,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the escrow engine for processing requests.
	pub engine: Arc<EscrowEngine>,
	/// Shared secret expected on gateway webhooks.
	pub webhook_secret: Option<String>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
	if origins.is_empty() {
		return CorsLayer::permissive();
	}
	let origins: Vec<HeaderValue> = origins
		.iter()
		.filter_map(|origin| match origin.parse() {
			Ok(value) => Some(value),
			Err(_) => {
				tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
				None
			},
		})
		.collect();
	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_methods(Any)
		.allow_headers(Any)
}

/// Builds the application router.
pub fn router(state: AppState, api_config: &ApiConfig) -> Router {
	let api = Router::new()
		.route("/orders", post(orders::create_order).get(orders::list_orders))
		.route("/orders/{id}", get(orders::get_order))
		.route("/orders/{id}/status", put(orders::update_status))
		.route("/orders/{id}/transactions", get(orders::list_transactions))
		.route("/payments/crypto/init", post(payments::init_crypto))
		.route("/payments/crypto/verify", post(payments::verify_crypto))
		.route("/payments/mobile-money/init", post(payments::init_mobile_money))
		.route("/payments/mobile-money/verify", post(payments::verify_mobile_money))
		.route("/webhooks/mobile-money", post(webhooks::mobile_money))
		.route("/wallets", post(wallets::register_wallet).get(wallets::list_wallets))
		.route("/wallets/primary", get(wallets::primary_wallet))
		.route("/ws/{user_id}", get(ws::notifications));

	Router::new()
		.route("/health", get(handle_health))
		.nest("/api/v1", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(&api_config.cors_origins))
				.layer(TimeoutLayer::new(Duration::from_secs(api_config.timeout_seconds))),
		)
		.with_state(state)
}

/// Starts the HTTP server and serves until `shutdown` resolves.
pub async fn start_server<F>(
	api_config: ApiConfig,
	engine: Arc<EscrowEngine>,
	shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
	F: Future<Output = ()> + Send + 'static,
{
	if api_config.webhook_secret.is_none() {
		tracing::warn!("No webhook secret configured - mobile-money webhooks will be rejected");
	}

	let state = AppState {
		engine,
		webhook_secret: api_config.webhook_secret.clone(),
	};
	let app = router(state, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Escrow API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown)
		.await?;

	Ok(())
}

/// Handles GET /health.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok".to_string(),
		service_id: state.engine.config().service.id.clone(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::apis::webhooks::WEBHOOK_SECRET_HEADER;
	use crate::apis::USER_ID_HEADER;
	use crate::factory_registry::build_engine_from_config;
	use axum::body::{to_bytes, Body};
	use axum::http::{Method, Request, StatusCode};
	use escrow_config::builders::config::ConfigBuilder;
	use escrow_types::{Product, User, UserRole};
	use rust_decimal_macros::dec;
	use serde_json::{json, Value};
	use tower::ServiceExt;

	const SELLER_WALLET: &str = "0x5555555555555555555555555555555555555555";
	const HASH: &str = "0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";
	const SECRET: &str = "hook-secret";

	fn api_config() -> ApiConfig {
		ApiConfig {
			enabled: true,
			host: "127.0.0.1".to_string(),
			port: 0,
			timeout_seconds: 30,
			webhook_secret: Some(SECRET.to_string()),
			cors_origins: Vec::new(),
		}
	}

	async fn app() -> Router {
		let mut ledger = toml::map::Map::new();
		ledger.insert("implementation".into(), toml::Value::String("mock".into()));
		ledger.insert(
			"confirmed".into(),
			toml::Value::Array(vec![toml::Value::String(HASH.into())]),
		);

		let config = ConfigBuilder::new()
			.ledger_network("bsc", toml::Value::Table(ledger))
			.api(Some(api_config()))
			.user(User {
				id: "buyer".into(),
				role: UserRole::Customer,
				wallet: None,
			})
			.user(User {
				id: "seller".into(),
				role: UserRole::Vendor,
				wallet: None,
			})
			.user(User {
				id: "stranger".into(),
				role: UserRole::Customer,
				wallet: None,
			})
			.product(Product {
				id: "p-1".into(),
				seller_id: "seller".into(),
				price: dec!(25),
				currency: "USD".into(),
			})
			.build();

		let engine = build_engine_from_config(config).await.unwrap();
		let state = AppState {
			engine: Arc::new(engine),
			webhook_secret: Some(SECRET.to_string()),
		};
		router(state, &api_config())
	}

	async fn call(
		app: &Router,
		method: Method,
		uri: &str,
		user: Option<&str>,
		body: Option<Value>,
	) -> (StatusCode, Value) {
		let mut request = Request::builder().method(method).uri(uri);
		if let Some(user) = user {
			request = request.header(USER_ID_HEADER, user);
		}
		let request = match body {
			Some(body) => request
				.header("content-type", "application/json")
				.body(Body::from(body.to_string())),
			None => request.body(Body::empty()),
		}
		.unwrap();

		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
		(status, value)
	}

	async fn create_order(app: &Router) -> String {
		let (status, order) = call(
			app,
			Method::POST,
			"/api/v1/orders",
			Some("buyer"),
			Some(json!({"product_id": "p-1", "quantity": 2, "payment_method": "crypto"})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);
		order["id"].as_str().unwrap().to_string()
	}

	#[tokio::test]
	async fn test_health() {
		let app = app().await;
		let (status, body) = call(&app, Method::GET, "/health", None, None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "ok");
		assert_eq!(body["service_id"], "escrow-test");
	}

	#[tokio::test]
	async fn test_caller_identity_is_required() {
		let app = app().await;
		let (status, body) = call(&app, Method::GET, "/api/v1/orders", None, None).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body["error"], "UNAUTHORIZED");

		let (status, _) = call(&app, Method::GET, "/api/v1/orders", Some("ghost"), None).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn test_order_access_and_transitions() {
		let app = app().await;
		let id = create_order(&app).await;
		let uri = format!("/api/v1/orders/{}", id);

		let (status, order) = call(&app, Method::GET, &uri, Some("seller"), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(order["status"], "CREATED");

		let (status, _) = call(&app, Method::GET, &uri, Some("stranger"), None).await;
		assert_eq!(status, StatusCode::FORBIDDEN);

		let (status, _) =
			call(&app, Method::GET, "/api/v1/orders/missing", Some("buyer"), None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		let status_uri = format!("{}/status", uri);
		let (status, body) = call(
			&app,
			Method::PUT,
			&status_uri,
			Some("buyer"),
			Some(json!({"status": "DELIVERED"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "INVALID_TRANSITION");

		// Actor is checked before state
		let (status, _) = call(
			&app,
			Method::PUT,
			&status_uri,
			Some("seller"),
			Some(json!({"status": "DELIVERED"})),
		)
		.await;
		assert_eq!(status, StatusCode::FORBIDDEN);
	}

	#[tokio::test]
	async fn test_crypto_payment_over_http() {
		let app = app().await;
		let id = create_order(&app).await;

		let (status, body) = call(
			&app,
			Method::POST,
			"/api/v1/payments/crypto/init",
			Some("buyer"),
			Some(json!({"order_id": id})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "NO_PAYEE_CHANNEL");

		let (status, _) = call(
			&app,
			Method::POST,
			"/api/v1/wallets",
			Some("seller"),
			Some(json!({"address": SELLER_WALLET, "network": "bsc", "kind": "safe_pal"})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);

		let (status, instruction) = call(
			&app,
			Method::POST,
			"/api/v1/payments/crypto/init",
			Some("buyer"),
			Some(json!({"order_id": id})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(instruction["payee_channel"], SELLER_WALLET);

		let (status, verified) = call(
			&app,
			Method::POST,
			"/api/v1/payments/crypto/verify",
			Some("buyer"),
			Some(json!({
				"reference": HASH,
				"transaction_id": instruction["transaction_id"],
			})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(verified["order"]["status"], "PAID_ESCROW");

		let (status, transactions) = call(
			&app,
			Method::GET,
			&format!("/api/v1/orders/{}/transactions", id),
			Some("seller"),
			None,
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(transactions.as_array().map(Vec::len), Some(1));
	}

	#[tokio::test]
	async fn test_webhook_requires_secret() {
		let app = app().await;
		let request = Request::builder()
			.method(Method::POST)
			.uri("/api/v1/webhooks/mobile-money")
			.header("content-type", "application/json")
			.header(WEBHOOK_SECRET_HEADER, "wrong")
			.body(Body::from(json!({"reference": "ref-1"}).to_string()))
			.unwrap();
		let response = app.clone().oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

		let request = Request::builder()
			.method(Method::POST)
			.uri("/api/v1/webhooks/mobile-money")
			.header("content-type", "application/json")
			.header(WEBHOOK_SECRET_HEADER, SECRET)
			.body(Body::from(json!({"reference": "ref-1"}).to_string()))
			.unwrap();
		let response = app.oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}
}
