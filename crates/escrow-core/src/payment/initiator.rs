//! Payment initiation.
//!
//! Picks the payee channel for an order, computes the amount due and builds
//! the instruction the buyer follows to pay out of band. Initiation records
//! the attempt but never changes the order status; callers hold the order
//! lock while recording.

use super::conversion::CurrencyConverter;
use crate::directory::WalletDirectory;
use crate::error::EscrowError;
use chrono::Utc;
use escrow_mobile_money::{MobileMoneyService, PaymentRequest, PaymentSession};
use escrow_storage::{StorageService, WriteBatch};
use escrow_types::{
	truncate_id, Order, PaymentInstruction, PaymentMethod, PaymentTransaction, StorageKey,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Network label reported for mobile-money instructions.
pub const MOBILE_MONEY_NETWORK: &str = "mobile_money";

/// BEP-20 USDT contract on BNB Smart Chain.
const BSC_USDT_CONTRACT: &str = "0x55d398326f99059fF775485246999027B3197955";

/// SafePal send link.
pub fn safepal_link(to: &str, amount: Decimal, currency: &str) -> String {
	format!(
		"safepal://send?address={}&amount={}&token={}",
		to,
		amount.normalize(),
		currency
	)
}

/// Trust Wallet send link. BSC USDT is addressed by its token contract.
pub fn trust_wallet_link(to: &str, amount: Decimal, currency: &str, network: &str) -> String {
	if network.eq_ignore_ascii_case("bsc") && currency.eq_ignore_ascii_case("USDT") {
		format!(
			"trust://send?asset=c20000714_t{}&address={}&amount={}",
			BSC_USDT_CONTRACT,
			to,
			amount.normalize()
		)
	} else {
		format!("trust://send?address={}&amount={}", to, amount.normalize())
	}
}

/// Issues payment instructions for both rails.
pub struct PaymentInitiator {
	storage: Arc<StorageService>,
	wallets: Arc<dyn WalletDirectory>,
	mobile_money: Arc<MobileMoneyService>,
	converter: CurrencyConverter,
	settlement_currency: String,
	gateway_timeout: Duration,
}

impl PaymentInitiator {
	pub fn new(
		storage: Arc<StorageService>,
		wallets: Arc<dyn WalletDirectory>,
		mobile_money: Arc<MobileMoneyService>,
		converter: CurrencyConverter,
		settlement_currency: impl Into<String>,
		gateway_timeout: Duration,
	) -> Self {
		Self {
			storage,
			wallets,
			mobile_money,
			converter,
			settlement_currency: settlement_currency.into(),
			gateway_timeout,
		}
	}

	/// Records a pending crypto attempt paying the seller's primary wallet.
	///
	/// Fails with `NoPayeeChannel` before writing anything if the seller has
	/// no primary wallet, or if `supports_network` rejects its network.
	pub async fn init_crypto(
		&self,
		order: &Order,
		supports_network: impl Fn(&str) -> bool,
	) -> Result<(PaymentTransaction, PaymentInstruction), EscrowError> {
		let wallet = self
			.wallets
			.primary_wallet(&order.seller_id)
			.await?
			.ok_or_else(|| {
				EscrowError::NoPayeeChannel("Seller has no crypto wallet configured".into())
			})?;
		if !supports_network(&wallet.network) {
			return Err(EscrowError::NoPayeeChannel(format!(
				"Seller wallet is on unsupported network '{}'",
				wallet.network
			)));
		}

		let currency = self.settlement_currency.clone();
		let amount = self.converter.convert(
			order.terms.total_price(),
			order.terms.currency(),
			&currency,
		)?;

		let transaction = PaymentTransaction::pending(
			uuid::Uuid::new_v4().to_string(),
			order.id.clone(),
			wallet.address.clone(),
			amount,
			currency.clone(),
			wallet.network.clone(),
			Utc::now(),
		);

		let mut attempts: Vec<String> = self
			.storage
			.find(StorageKey::TransactionsByOrder, &order.id)
			.await?
			.unwrap_or_default();
		attempts.push(transaction.id.clone());

		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Transactions, &transaction.id, &transaction)?
			.put(StorageKey::TransactionsByOrder, &order.id, &attempts)?;
		self.storage.commit(batch).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			transaction_id = %truncate_id(&transaction.id),
			amount = %amount,
			currency = %currency,
			network = %wallet.network,
			"Initiated crypto payment"
		);

		let instruction = PaymentInstruction {
			transaction_id: transaction.id.clone(),
			payee_channel: wallet.address.clone(),
			amount,
			currency: currency.clone(),
			network: wallet.network.clone(),
			instruction: safepal_link(&wallet.address, amount, &currency),
			alternatives: vec![trust_wallet_link(
				&wallet.address,
				amount,
				&currency,
				&wallet.network,
			)],
		};
		Ok((transaction, instruction))
	}

	/// Asks the gateway for a hosted payment. Writes nothing.
	pub async fn create_mobile_money_session(
		&self,
		order: &Order,
		phone_number: &str,
	) -> Result<PaymentSession, EscrowError> {
		let phone_number = phone_number.trim();
		if phone_number.is_empty() {
			return Err(EscrowError::NoPayeeChannel(
				"A phone number is required for mobile money".into(),
			));
		}

		let request = PaymentRequest {
			order_id: order.id.clone(),
			phone_number: phone_number.to_string(),
			amount: order.terms.total_price(),
			currency: order.terms.currency().to_string(),
		};
		match tokio::time::timeout(self.gateway_timeout, self.mobile_money.create_payment(&request))
			.await
		{
			Ok(Ok(session)) => Ok(session),
			Ok(Err(e)) => {
				tracing::warn!(order_id = %truncate_id(&order.id), error = %e, "Gateway refused payment");
				Err(EscrowError::ExternalUnavailable(e.to_string()))
			},
			Err(_) => Err(EscrowError::ExternalUnavailable(format!(
				"Gateway timed out after {}s",
				self.gateway_timeout.as_secs()
			))),
		}
	}

	/// Writes the mobile-money method and reference onto the order.
	pub async fn record_mobile_money(
		&self,
		order: &Order,
		session: &PaymentSession,
	) -> Result<(Order, PaymentInstruction), EscrowError> {
		let mut updated = order.clone();
		updated.payment_method = PaymentMethod::MobileMoney;
		updated.transaction_reference = Some(session.reference.clone());
		updated.updated_at = Utc::now().max(order.latest_timestamp());

		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Orders, &updated.id, &updated)?
			.put(StorageKey::OrderByPaymentReference, &session.reference, &updated.id)?;
		self.storage.commit(batch).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			reference = %truncate_id(&session.reference),
			"Initiated mobile-money payment"
		);

		let instruction = PaymentInstruction {
			transaction_id: session.reference.clone(),
			payee_channel: session.reference.clone(),
			amount: order.terms.total_price(),
			currency: order.terms.currency().to_string(),
			network: MOBILE_MONEY_NETWORK.to_string(),
			instruction: session.payment_url.clone(),
			alternatives: Vec::new(),
		};
		Ok((updated, instruction))
	}
}
