// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key configuration.
//!
//! Only the key id may appear in a config file. The key material itself is
//! read from `WARDEN_SERVER_ROOT_KEY` or the file named by
//! `WARDEN_SERVER_ROOT_KEY_FILE`.

use serde::Deserialize;
use warden_common_secret::SecretString;

const DEFAULT_KEY_ID: &str = "root-1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysConfigLayer {
	#[serde(default)]
	pub key_id: Option<String>,
}

impl KeysConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.key_id.is_some() {
			self.key_id = other.key_id;
		}
	}

	pub fn finalize(self, root_key: SecretString) -> KeysConfig {
		KeysConfig {
			key_id: self.key_id.unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
			root_key,
		}
	}
}

#[derive(Debug, Clone)]
pub struct KeysConfig {
	pub key_id: String,
	/// Base64 encoding of the 32-byte root key.
	pub root_key: SecretString,
}
