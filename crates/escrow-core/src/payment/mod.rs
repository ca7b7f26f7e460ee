//! Payment initiation, verification and currency conversion.

pub mod conversion;
pub mod initiator;
pub mod verifier;

pub use conversion::CurrencyConverter;
pub use initiator::PaymentInitiator;
pub use verifier::PaymentVerifier;
