// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Vault client.

use reqwest::StatusCode;
use thiserror::Error;
use warden_credentials_core::EngineError;

#[derive(Debug, Error)]
pub enum VaultClientError {
	/// Transport failure: connect, TLS handshake, timeout.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	/// Vault answered with a non-success status.
	#[error("vault returned {status}: {message}")]
	Status { status: StatusCode, message: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),

	#[error("configuration error: {0}")]
	Configuration(String),
}

pub type VaultClientResult<T> = Result<T, VaultClientError>;

impl From<VaultClientError> for EngineError {
	fn from(err: VaultClientError) -> Self {
		match err {
			VaultClientError::Http(e) if e.is_decode() => EngineError::Rejected(e.to_string()),
			VaultClientError::Http(e) => EngineError::Transient(e.to_string()),
			VaultClientError::Status { status, message } => {
				let message = format!("{status}: {message}");
				if status == StatusCode::FORBIDDEN {
					EngineError::TokenInvalid(message)
				} else if status.is_server_error()
					|| status == StatusCode::TOO_MANY_REQUESTS
					|| status == StatusCode::PRECONDITION_FAILED
				{
					EngineError::Transient(message)
				} else {
					EngineError::Rejected(message)
				}
			}
			VaultClientError::InvalidResponse(m) => EngineError::Rejected(m),
			VaultClientError::Configuration(m) => EngineError::Configuration(m),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn status(code: u16) -> EngineError {
		VaultClientError::Status {
			status: StatusCode::from_u16(code).unwrap(),
			message: "x".into(),
		}
		.into()
	}

	#[test]
	fn forbidden_means_token_invalid() {
		assert!(matches!(status(403), EngineError::TokenInvalid(_)));
	}

	#[test]
	fn server_errors_and_throttling_are_transient() {
		assert!(status(500).is_transient());
		assert!(status(503).is_transient());
		assert!(status(429).is_transient());
		assert!(status(412).is_transient());
	}

	#[test]
	fn other_client_errors_are_rejections() {
		assert!(matches!(status(400), EngineError::Rejected(_)));
		assert!(matches!(status(404), EngineError::Rejected(_)));
	}
}
