//! Actors requesting order transitions.

use crate::{PaymentMethod, User, UserRole, WalletKind};
use serde::{Deserialize, Serialize};

/// Who is asking for a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
	/// An authenticated marketplace user.
	User { id: String, role: UserRole },
	/// The settlement engine itself, e.g. after a confirmed payment.
	System,
}

impl Actor {
	pub fn user(id: impl Into<String>, role: UserRole) -> Self {
		Actor::User {
			id: id.into(),
			role,
		}
	}

	/// User id of the actor, if it is a user.
	pub fn user_id(&self) -> Option<&str> {
		match self {
			Actor::User { id, .. } => Some(id),
			Actor::System => None,
		}
	}

	/// Whether the actor may act on behalf of the platform.
	pub fn is_privileged(&self) -> bool {
		matches!(
			self,
			Actor::System
				| Actor::User {
					role: UserRole::Admin,
					..
				}
		)
	}

	pub fn is(&self, user_id: &str) -> bool {
		self.user_id() == Some(user_id)
	}
}

impl From<&User> for Actor {
	fn from(user: &User) -> Self {
		Actor::user(user.id.clone(), user.role)
	}
}

/// Optional data attached to a transition request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvidence {
	/// Transaction hash or payment reference, recorded on `PAID_ESCROW`.
	pub transaction_reference: Option<String>,
	/// Carrier tracking number, recorded on `SHIPPED`.
	pub tracking_number: Option<String>,
	pub wallet_used: Option<WalletKind>,
	pub escrow_address: Option<String>,
	pub payment_method: Option<PaymentMethod>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_privileged_actors() {
		assert!(Actor::System.is_privileged());
		assert!(Actor::user("ops", UserRole::Admin).is_privileged());
		assert!(!Actor::user("bob", UserRole::Vendor).is_privileged());
		assert!(Actor::user("bob", UserRole::Customer).is("bob"));
		assert!(!Actor::System.is("bob"));
	}
}
