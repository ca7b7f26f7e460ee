//! Common types module for the escrow settlement system.
//!
//! This module defines the data types shared by every escrow component:
//! the order aggregate and its lifecycle status, payment attempts and their
//! verification outcomes, payee wallets, directory records, events, and the
//! HTTP request/response shapes. Keeping them in one crate lets the storage,
//! ledger, core and service crates agree on a single representation.

/// Actors and the evidence they supply when requesting a transition.
pub mod actor;
/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// User and product records served by the directory collaborators.
pub mod directory;
/// Event types for inter-service communication.
pub mod events;
/// Notification payloads pushed to connected clients.
pub mod notification;
/// Order aggregate, commercial terms and lifecycle status.
pub mod order;
/// Payment attempts, verification outcomes and payment instructions.
pub mod payment;
/// Base trait for self-registering implementations.
pub mod registry;
/// Storage types for managing persistent data.
pub mod storage;
/// Utility functions for identifiers and on-chain values.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;
/// Payee wallet records.
pub mod wallet;

// Re-export all types for convenient access
pub use actor::*;
pub use api::*;
pub use directory::*;
pub use events::*;
pub use notification::*;
pub use order::*;
pub use payment::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::{is_evm_address, is_transaction_hash, truncate_id};
pub use validation::*;
pub use wallet::*;
