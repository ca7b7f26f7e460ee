//! Core settlement engine for the escrow marketplace.
//!
//! This crate owns the order lifecycle. The escrow state machine decides
//! which transitions are legal and who may request them, the payment
//! initiator issues method-specific payment instructions, the payment
//! verifier normalizes ledger and gateway lookups, and the settlement
//! coordinator ties them together so a confirmed payment moves an order into
//! escrow exactly once. Everything is assembled by [`EscrowBuilder`] from the
//! pluggable storage, ledger and mobile-money implementations.

pub mod builder;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notifications;
pub mod payment;
pub mod settlement;
pub mod state;

pub use builder::{default_factories, BuilderError, EscrowBuilder, EscrowFactories};
pub use engine::{event_bus::EventBus, EngineError, EscrowEngine};
pub use error::EscrowError;
