//! Currency conversion for payment amounts.
//!
//! Only par conversions are supported: a currency to itself, and between
//! the configured stablecoins and the fiat currencies they are pegged to.
//! Anything else is refused with [`EscrowError::UnsupportedCurrency`] rather
//! than passed through unconverted.

use crate::error::EscrowError;
use escrow_config::PaymentConfig;
use rust_decimal::Decimal;

/// Converts order totals into the settlement currency.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
	/// Upper-cased stablecoins and price pegs, all worth one unit.
	at_par: Vec<String>,
}

impl CurrencyConverter {
	pub fn new(config: &PaymentConfig) -> Self {
		let at_par = config
			.stablecoins
			.iter()
			.chain(&config.price_pegs)
			.map(|currency| currency.to_ascii_uppercase())
			.collect();
		Self { at_par }
	}

	fn is_at_par(&self, currency: &str) -> bool {
		self.at_par
			.iter()
			.any(|candidate| candidate.eq_ignore_ascii_case(currency))
	}

	/// Converts `amount` from one currency to another.
	pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, EscrowError> {
		if from.eq_ignore_ascii_case(to) || (self.is_at_par(from) && self.is_at_par(to)) {
			return Ok(amount);
		}
		Err(EscrowError::UnsupportedCurrency {
			from: from.to_string(),
			to: to.to_string(),
		})
	}
}
