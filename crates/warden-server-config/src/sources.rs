// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, EngineConfigLayer, KeysConfigLayer, LoggingConfigLayer, RenewalConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/warden/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: WARDEN_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: env_var("WARDEN_SERVER_DATABASE_URL"),
			}),
			logging: Some(LoggingConfigLayer {
				level: env_var("WARDEN_SERVER_LOG_LEVEL"),
				json: env_bool("WARDEN_SERVER_LOG_JSON"),
			}),
			engine: Some(EngineConfigLayer {
				request_timeout_secs: env_u64("WARDEN_SERVER_ENGINE_REQUEST_TIMEOUT_SECS")?,
				allow_insecure: env_bool("WARDEN_SERVER_ENGINE_ALLOW_INSECURE"),
			}),
			renewal: Some(load_renewal_from_env()?),
			keys: Some(KeysConfigLayer {
				key_id: env_var("WARDEN_SERVER_ROOT_KEY_ID"),
			}),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_renewal_from_env() -> Result<RenewalConfigLayer, ConfigError> {
	Ok(RenewalConfigLayer {
		min_wake_interval_secs: env_u64("WARDEN_SERVER_RENEWAL_MIN_WAKE_INTERVAL_SECS")?,
		max_wake_interval_secs: env_u64("WARDEN_SERVER_RENEWAL_MAX_WAKE_INTERVAL_SECS")?,
		retry_ceiling: env_u32("WARDEN_SERVER_RENEWAL_RETRY_CEILING")?,
		base_backoff_secs: env_u64("WARDEN_SERVER_RENEWAL_BASE_BACKOFF_SECS")?,
		max_backoff_secs: env_u64("WARDEN_SERVER_RENEWAL_MAX_BACKOFF_SECS")?,
		stale_claim_secs: env_u64("WARDEN_SERVER_RENEWAL_STALE_CLAIM_SECS")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/warden.toml").load().unwrap();
		assert!(layer.database.is_none());
		assert!(layer.renewal.is_none());
	}

	#[test]
	fn test_toml_source_reads_sections() {
		let mut file = NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
[database]
url = "sqlite:/tmp/warden.db"

[renewal]
retry_ceiling = 3
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(
			layer.database.unwrap().url.as_deref(),
			Some("sqlite:/tmp/warden.db")
		);
		assert_eq!(layer.renewal.unwrap().retry_ceiling, Some(3));
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let mut file = NamedTempFile::new().unwrap();
		write!(file, "[renewal]\nretry_ceiling = \"many\"\n").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_invalid_number_in_env() {
		std::env::set_var("WARDEN_TEST_SOURCES_BAD_U64", "soon");
		let err = env_u64("WARDEN_TEST_SOURCES_BAD_U64").unwrap_err();
		assert!(err.to_string().contains("WARDEN_TEST_SOURCES_BAD_U64"));
		std::env::remove_var("WARDEN_TEST_SOURCES_BAD_U64");
	}
}
