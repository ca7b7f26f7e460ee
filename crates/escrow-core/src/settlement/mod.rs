//! Settlement of external payments into order state.

pub mod coordinator;

pub use coordinator::SettlementCoordinator;
