//! Escrow order lifecycle.
//!
//! [`transitions`] holds the pure transition table, [`order`] persists it
//! under per-order locks from [`locks`].

pub mod locks;
pub mod order;
pub mod transitions;

pub use locks::{KeyGuard, KeyedLocks};
pub use order::{OrderStateError, OrderStateMachine};
pub use transitions::{apply, ActorRule, TransitionError, TransitionRule, TRANSITIONS};
