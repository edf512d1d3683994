// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loading secrets from the environment with the `VAR` / `VAR_FILE` convention.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;
use warden_common_secret::SecretString;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Load a secret from `{var}_FILE` if set, otherwise from `{var}`.
///
/// A single trailing newline is stripped from file contents. Mounted secret
/// files (Docker, Kubernetes, Vault Agent) almost always carry one.
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| SecretEnvError::Io {
			path: path.clone(),
			source: e,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(SecretString::new(secret)));
	}

	if let Ok(value) = env::var(var) {
		if !value.is_empty() {
			return Ok(Some(SecretString::new(value)));
		}
	}

	Ok(None)
}
