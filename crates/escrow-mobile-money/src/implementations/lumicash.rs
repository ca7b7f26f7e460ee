//! Lumicash HTTP gateway.
//!
//! `POST {api_url}/payments` creates a hosted payment and returns its
//! reference and payment page. `GET {api_url}/payments/{reference}` reports
//! `SUCCESS`, `PENDING` or `FAILED`.

use crate::{
	MobileMoneyError, MobileMoneyFactory, MobileMoneyInterface, MobileMoneyRegistry,
	PaymentRequest, PaymentSession,
};
use async_trait::async_trait;
use escrow_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError, VerificationOutcome, VerificationResult,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
	merchant_id: &'a str,
	order_id: &'a str,
	phone_number: &'a str,
	amount: Decimal,
	currency: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
	#[serde(alias = "payment_ref")]
	reference: String,
	payment_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
	status: String,
	#[serde(default)]
	reason: Option<String>,
}

/// Lumicash gateway client.
pub struct LumicashGateway {
	client: reqwest::Client,
	api_url: String,
	merchant_id: String,
	api_key: String,
	callback_url: Option<String>,
}

impl LumicashGateway {
	pub fn new(
		api_url: impl Into<String>,
		merchant_id: impl Into<String>,
		api_key: impl Into<String>,
		callback_url: Option<String>,
		timeout: Duration,
	) -> Result<Self, MobileMoneyError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| MobileMoneyError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			client,
			api_url: api_url.into().trim_end_matches('/').to_string(),
			merchant_id: merchant_id.into(),
			api_key: api_key.into(),
			callback_url,
		})
	}
}

/// Maps a provider status string to a verification result.
fn status_to_result(status: &PaymentStatusResponse) -> Result<VerificationResult, MobileMoneyError> {
	match status.status.to_ascii_uppercase().as_str() {
		"SUCCESS" | "SUCCESSFUL" | "COMPLETED" => {
			Ok(VerificationResult::outcome(VerificationOutcome::Confirmed))
		},
		"PENDING" | "PROCESSING" | "INITIATED" => Ok(VerificationResult::pending()),
		"FAILED" | "CANCELLED" | "EXPIRED" | "REJECTED" => Ok(VerificationResult::failed(
			status
				.reason
				.clone()
				.unwrap_or_else(|| format!("Payment {}", status.status.to_lowercase())),
		)),
		other => Err(MobileMoneyError::MalformedResponse(format!(
			"unknown payment status '{}'",
			other
		))),
	}
}

#[async_trait]
impl MobileMoneyInterface for LumicashGateway {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LumicashSchema)
	}

	async fn create_payment(
		&self,
		request: &PaymentRequest,
	) -> Result<PaymentSession, MobileMoneyError> {
		let body = CreatePaymentBody {
			merchant_id: &self.merchant_id,
			order_id: &request.order_id,
			phone_number: &request.phone_number,
			amount: request.amount,
			currency: &request.currency,
			callback_url: self.callback_url.as_deref(),
		};

		let response = self
			.client
			.post(format!("{}/payments", self.api_url))
			.bearer_auth(&self.api_key)
			.json(&body)
			.send()
			.await
			.map_err(|e| MobileMoneyError::Network(e.to_string()))?;

		let status = response.status();
		if status.is_client_error() {
			let text = response.text().await.unwrap_or_default();
			return Err(MobileMoneyError::Rejected(format!("HTTP {}: {}", status, text)));
		}
		if !status.is_success() {
			return Err(MobileMoneyError::Network(format!("HTTP {}", status)));
		}

		let created: CreatePaymentResponse = response
			.json()
			.await
			.map_err(|e| MobileMoneyError::MalformedResponse(e.to_string()))?;

		tracing::info!(
			order_id = %truncate_id(&request.order_id),
			reference = %truncate_id(&created.reference),
			"Created Lumicash payment"
		);

		Ok(PaymentSession {
			reference: created.reference,
			payment_url: created.payment_url,
		})
	}

	async fn payment_status(
		&self,
		reference: &str,
	) -> Result<VerificationResult, MobileMoneyError> {
		let response = self
			.client
			.get(format!("{}/payments/{}", self.api_url, reference))
			.bearer_auth(&self.api_key)
			.send()
			.await
			.map_err(|e| MobileMoneyError::Network(e.to_string()))?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(MobileMoneyError::UnknownReference(reference.to_string()));
		}
		if !response.status().is_success() {
			return Err(MobileMoneyError::Network(format!(
				"HTTP {}",
				response.status()
			)));
		}

		let status: PaymentStatusResponse = response
			.json()
			.await
			.map_err(|e| MobileMoneyError::MalformedResponse(e.to_string()))?;
		status_to_result(&status)
	}
}

/// Configuration schema for the Lumicash gateway.
pub struct LumicashSchema;

impl ConfigSchema for LumicashSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let http_url = |value: &toml::Value| match value.as_str() {
			Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
			_ => Err("must be an http(s) URL".to_string()),
		};
		let schema = Schema::new(
			vec![
				Field::new("api_url", FieldType::String).with_validator(http_url),
				Field::new("merchant_id", FieldType::String),
				Field::new("api_key", FieldType::String),
			],
			vec![
				Field::new("callback_url", FieldType::String).with_validator(http_url),
				Field::new(
					"request_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(60),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a Lumicash gateway.
///
/// Configuration parameters:
/// - `api_url`, `merchant_id`, `api_key`: provider credentials
/// - `callback_url`: webhook the provider calls on status changes
/// - `request_timeout_seconds`: HTTP timeout (default: 10)
pub fn create_gateway(
	config: &toml::Value,
) -> Result<Box<dyn MobileMoneyInterface>, MobileMoneyError> {
	LumicashSchema
		.validate(config)
		.map_err(|e| MobileMoneyError::Configuration(e.to_string()))?;

	let string = |key: &str| {
		config
			.get(key)
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| MobileMoneyError::Configuration(format!("{} is required", key)))
	};
	let timeout = config
		.get("request_timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(LumicashGateway::new(
		string("api_url")?,
		string("merchant_id")?,
		string("api_key")?,
		string("callback_url").ok(),
		Duration::from_secs(timeout),
	)?))
}

/// Registry for the Lumicash implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "lumicash";
	type Factory = MobileMoneyFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl MobileMoneyRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	fn status(status: &str, reason: Option<&str>) -> PaymentStatusResponse {
		PaymentStatusResponse {
			status: status.to_string(),
			reason: reason.map(str::to_string),
		}
	}

	#[test]
	fn test_status_mapping() {
		assert_eq!(
			status_to_result(&status("SUCCESS", None)).unwrap().outcome,
			VerificationOutcome::Confirmed
		);
		assert_eq!(
			status_to_result(&status("pending", None)).unwrap().outcome,
			VerificationOutcome::Pending
		);

		let failed = status_to_result(&status("FAILED", Some("insufficient balance"))).unwrap();
		assert_eq!(failed.outcome, VerificationOutcome::Failed);
		assert_eq!(failed.error_message.as_deref(), Some("insufficient balance"));

		assert!(status_to_result(&status("???", None)).is_err());
	}

	#[test]
	fn test_create_response_accepts_legacy_field() {
		let created: CreatePaymentResponse = serde_json::from_str(
			r#"{"payment_ref":"abc","payment_url":"https://lumicash.example.com/pay/abc"}"#,
		)
		.unwrap();
		assert_eq!(created.reference, "abc");
	}

	#[test]
	fn test_factory_requires_credentials() {
		let config: toml::Value = toml::from_str(
			r#"
			api_url = "https://api.lumicash.example.com/"
			merchant_id = "m-1"
			api_key = "secret"
			"#,
		)
		.unwrap();
		assert!(create_gateway(&config).is_ok());

		let config: toml::Value = toml::from_str("api_url = \"https://x\"").unwrap();
		assert!(matches!(
			create_gateway(&config),
			Err(MobileMoneyError::Configuration(_))
		));
	}
}
