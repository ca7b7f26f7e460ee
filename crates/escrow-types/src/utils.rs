//! Formatting and parsing helpers for identifiers and on-chain values.

use alloy_primitives::{Address, B256};
use std::str::FromStr;

/// Utility function to truncate an identifier for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}

/// Whether the string is a 0x-prefixed 20-byte EVM address.
pub fn is_evm_address(value: &str) -> bool {
	value.starts_with("0x") && Address::from_str(value).is_ok()
}

/// Whether the string is a 0x-prefixed 32-byte transaction hash.
pub fn is_transaction_hash(value: &str) -> bool {
	value.starts_with("0x") && B256::from_str(value).is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(truncate_id("123456789"), "12345678..");
		assert_eq!(truncate_id("0x1234567890abcdef"), "0x123456..");
	}

	#[test]
	fn test_evm_address() {
		assert!(is_evm_address("0x55d398326f99059fF775485246999027B3197955"));
		assert!(!is_evm_address("55d398326f99059fF775485246999027B3197955"));
		assert!(!is_evm_address("0x1234"));
		assert!(!is_evm_address("UQBvW8Z5huBkMJYdnfAEM5JqTNkuWX3diqYENkWsIL0XggGG"));
	}

	#[test]
	fn test_transaction_hash() {
		let hash = format!("0x{}", "ab".repeat(32));
		assert!(is_transaction_hash(&hash));
		assert!(!is_transaction_hash(&hash[2..]));
		assert!(!is_transaction_hash("0xzz"));
	}
}
