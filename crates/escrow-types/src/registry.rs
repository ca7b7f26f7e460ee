//! Registry trait for self-registering implementations.
//!
//! Pluggable backends (storage, ledger, mobile-money gateway) each expose a
//! `Registry` type implementing [`ImplementationRegistry`], so the builder can
//! map the `implementation` name in the TOML file to a factory function.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. `"explorer"` for `[ledger.networks.bsc] implementation = "explorer"`.
	const NAME: &'static str;

	/// The factory function type this implementation provides,
	/// such as `LedgerFactory` or `StorageFactory`.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
