// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secrets engine client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfigLayer {
	pub request_timeout_secs: Option<u64>,
	pub allow_insecure: Option<bool>,
}

impl EngineConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.allow_insecure.is_some() {
			self.allow_insecure = other.allow_insecure;
		}
	}

	pub fn finalize(self) -> EngineConfig {
		EngineConfig {
			request_timeout_secs: self
				.request_timeout_secs
				.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
			allow_insecure: self.allow_insecure.unwrap_or(false),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
	pub request_timeout_secs: u64,
	/// Permit `http://` engine addresses. Local development only.
	pub allow_insecure: bool,
}

impl EngineConfig {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = EngineConfig::default();
		assert_eq!(config.request_timeout(), Duration::from_secs(30));
		assert!(!config.allow_insecure);
	}

	#[test]
	fn test_deserialize_partial() {
		let layer: EngineConfigLayer = toml::from_str("allow_insecure = true").unwrap();
		assert_eq!(layer.allow_insecure, Some(true));
		assert!(layer.request_timeout_secs.is_none());
	}
}
