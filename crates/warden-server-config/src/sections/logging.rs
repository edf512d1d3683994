// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logging configuration section.

use serde::{Deserialize, Serialize};

fn default_level() -> String {
	"info,warden=debug,sqlx=warn".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfigLayer {
	pub level: Option<String>,
	pub json: Option<bool>,
}

impl LoggingConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.level.is_some() {
			self.level = other.level;
		}
		if other.json.is_some() {
			self.json = other.json;
		}
	}

	pub fn finalize(self) -> LoggingConfig {
		LoggingConfig {
			level: self.level.unwrap_or_else(default_level),
			json: self.json.unwrap_or(false),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
	/// `EnvFilter` directive, used when `RUST_LOG` is unset.
	pub level: String,
	pub json: bool,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: default_level(),
			json: false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = LoggingConfigLayer::default().finalize();
		assert_eq!(config, LoggingConfig::default());
		assert!(!config.json);
	}

	#[test]
	fn test_merge_keeps_unset_fields() {
		let mut base = LoggingConfigLayer {
			level: Some("debug".to_string()),
			json: None,
		};
		base.merge(LoggingConfigLayer {
			level: None,
			json: Some(true),
		});
		assert_eq!(base.level.as_deref(), Some("debug"));
		assert_eq!(base.json, Some(true));
	}
}
