//! Main entry point for the escrow settlement service.
//!
//! Loads the configuration, builds the engine from the configured storage,
//! ledger and mobile-money implementations, serves the HTTP API and shuts
//! everything down on Ctrl-C.

use clap::Parser;
use escrow_config::Config;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the escrow service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!("Failed to listen for shutdown signal: {}", e);
	}
	tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	// RUST_LOG wins over --log-level
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started escrow service");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(factory_registry::build_engine_from_config(config.clone()).await?);
	engine.initialize().await?;

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			server::start_server(api_config, engine.clone(), shutdown_signal()).await?;
			tracing::info!("API server finished");
		},
		None => {
			tracing::info!("API disabled, waiting for shutdown signal");
			shutdown_signal().await;
		},
	}

	engine.shutdown().await?;
	tracing::info!("Stopped escrow service");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["escrow"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["escrow", "--config", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[tokio::test]
	async fn test_engine_from_config_file() {
		let temp_dir = tempdir().unwrap();
		let config_path = temp_dir.path().join("escrow.toml");

		let config_content = r#"
[service]
id = "file-escrow"

[storage]
primary = "memory"
cleanup_interval_seconds = 120
[storage.implementations.memory]

[ledger]
[ledger.networks.bsc]
implementation = "mock"

[mobile_money]
primary = "mock"
[mobile_money.implementations.mock]

[[directory.users]]
id = "seller-1"
role = "vendor"

[[directory.products]]
id = "widget"
seller_id = "seller-1"
price = "12.50"
"#;
		std::fs::write(&config_path, config_content).unwrap();

		let config = Config::from_file(config_path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.service.id, "file-escrow");
		assert_eq!(config.payment.settlement_currency, "USDT");

		let engine = factory_registry::build_engine_from_config(config).await.unwrap();
		assert!(engine.user("seller-1").await.unwrap().is_some());
	}
}
