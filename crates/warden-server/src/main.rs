// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Warden credential lease broker binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_server::{shutdown_signal, Warden};
use warden_server_config::LoggingConfig;

/// Warden - brokers short-lived secrets-engine credentials.
#[derive(Parser, Debug)]
#[command(name = "warden-server", about = "Credential lease broker", version)]
struct Args {
	/// Path to the TOML config file (defaults to /etc/warden/server.toml)
	#[arg(long, env = "WARDEN_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
	/// Run a single renewal pass, print its report and exit
	Tick,
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);

	if logging.json {
		registry
			.with(tracing_subscriber::fmt::layer().json())
			.init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}
}

fn format_version_info() -> String {
	format!(
		"warden-server version: {}\nPlatform:              {}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH,
	)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => warden_server_config::load_config_with_file(path)?,
		None => warden_server_config::load_config()?,
	};

	init_tracing(&config.logging);

	tracing::info!(database = %config.database.url, "starting warden-server");

	let warden = Warden::build(&config).await?;

	if let Some(Command::Tick) = args.command {
		let report = warden.scheduler.tick().await;
		println!("{}", serde_json::to_string_pretty(&report)?);
		return Ok(());
	}

	warden.scheduler.start().await?;

	shutdown_signal().await;
	tracing::info!("Received shutdown signal");

	warden.scheduler.stop().await?;
	tracing::info!("Server shutdown complete");
	Ok(())
}
