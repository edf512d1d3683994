// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for Warden server.
//!
//! Configuration is layered from defaults, a TOML file and the environment
//! (`WARDEN_SERVER_*`), highest precedence last. The root key is only ever
//! read from `WARDEN_SERVER_ROOT_KEY` or `WARDEN_SERVER_ROOT_KEY_FILE`.

pub mod env;
pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use env::{load_secret_env, SecretEnvError};
pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};
use warden_common_secret::SecretString;

pub const ROOT_KEY_ENV: &str = "WARDEN_SERVER_ROOT_KEY";

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub engine: EngineConfig,
	pub renewal: RenewalConfig,
	pub keys: KeysConfig,
}

/// Load configuration from defaults, `/etc/warden/server.toml` and the environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let root_key = load_secret_env(ROOT_KEY_ENV)
		.map_err(|e| ConfigError::Secret(e.to_string()))?
		.ok_or_else(|| ConfigError::MissingSecret {
			var: ROOT_KEY_ENV.to_string(),
		})?;

	finalize(merged, root_key)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: ServerConfigLayer, root_key: SecretString) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		engine: layer.engine.unwrap_or_default().finalize(),
		renewal: layer.renewal.unwrap_or_default().finalize(),
		keys: layer.keys.unwrap_or_default().finalize(root_key),
	};

	validate_config(&config)?;

	info!(
		database = %config.database.url,
		log_json = config.logging.json,
		engine_timeout_secs = config.engine.request_timeout_secs,
		allow_insecure = config.engine.allow_insecure,
		retry_ceiling = config.renewal.retry_ceiling,
		key_id = %config.keys.key_id,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	let renewal = &config.renewal;
	if renewal.min_wake_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"renewal.min_wake_interval_secs must be at least 1".to_string(),
		));
	}
	if renewal.min_wake_interval_secs > renewal.max_wake_interval_secs {
		return Err(ConfigError::Validation(format!(
			"renewal.min_wake_interval_secs ({}) exceeds renewal.max_wake_interval_secs ({})",
			renewal.min_wake_interval_secs, renewal.max_wake_interval_secs
		)));
	}
	if renewal.base_backoff_secs > renewal.max_backoff_secs {
		return Err(ConfigError::Validation(format!(
			"renewal.base_backoff_secs ({}) exceeds renewal.max_backoff_secs ({})",
			renewal.base_backoff_secs, renewal.max_backoff_secs
		)));
	}
	if renewal.retry_ceiling == 0 {
		return Err(ConfigError::Validation(
			"renewal.retry_ceiling must be at least 1".to_string(),
		));
	}
	if config.engine.request_timeout_secs == 0 {
		return Err(ConfigError::Validation(
			"engine.request_timeout_secs must be at least 1".to_string(),
		));
	}
	// A renewal claim must stay fresh for longer than one engine call.
	if renewal.stale_claim_secs <= config.engine.request_timeout_secs {
		return Err(ConfigError::Validation(format!(
			"renewal.stale_claim_secs ({}) must exceed engine.request_timeout_secs ({})",
			renewal.stale_claim_secs, config.engine.request_timeout_secs
		)));
	}
	if config.keys.key_id.trim().is_empty() {
		return Err(ConfigError::Validation("keys.key_id must not be empty".to_string()));
	}
	if config.keys.root_key.is_blank() {
		return Err(ConfigError::Validation(format!("{ROOT_KEY_ENV} must not be empty")));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn root_key() -> SecretString {
		SecretString::new("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string())
	}

	#[test]
	fn test_defaults_resolve() {
		let config = finalize(ServerConfigLayer::default(), root_key()).unwrap();
		assert_eq!(config.database.url, "sqlite:./warden.db");
		assert_eq!(config.renewal, RenewalConfig::default());
		assert_eq!(config.keys.key_id, "root-1");
	}

	#[test]
	fn test_inverted_wake_bounds_rejected() {
		let layer: ServerConfigLayer = toml::from_str(
			r#"
[renewal]
min_wake_interval_secs = 600
max_wake_interval_secs = 60
"#,
		)
		.unwrap();
		let err = finalize(layer, root_key()).unwrap_err();
		assert!(err.to_string().contains("min_wake_interval_secs"));
	}

	#[test]
	fn test_inverted_backoff_rejected() {
		let layer = ServerConfigLayer {
			renewal: Some(RenewalConfigLayer {
				base_backoff_secs: Some(900),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(matches!(
			finalize(layer, root_key()),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn test_zero_retry_ceiling_rejected() {
		let layer = ServerConfigLayer {
			renewal: Some(RenewalConfigLayer {
				retry_ceiling: Some(0),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(finalize(layer, root_key()).is_err());
	}

	#[test]
	fn test_stale_claim_must_outlast_request_timeout() {
		let layer: ServerConfigLayer = toml::from_str(
			r#"
[renewal]
stale_claim_secs = 30

[engine]
request_timeout_secs = 30
"#,
		)
		.unwrap();
		let err = finalize(layer, root_key()).unwrap_err();
		assert!(err.to_string().contains("stale_claim_secs"));

		let layer = ServerConfigLayer {
			renewal: Some(RenewalConfigLayer {
				stale_claim_secs: Some(0),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(matches!(
			finalize(layer, root_key()),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn test_blank_root_key_rejected() {
		let err = finalize(ServerConfigLayer::default(), SecretString::new("  ".to_string()))
			.unwrap_err();
		assert!(err.to_string().contains(ROOT_KEY_ENV));
	}
}
