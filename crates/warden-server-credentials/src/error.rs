// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the credential lifecycle services.

use thiserror::Error;
use warden_credentials_core::{CredentialPurpose, EngineError, LibraryId, SessionId, StoreId};
use warden_server_db::DbError;

/// Result type alias for credential lifecycle operations.
pub type Result<T> = std::result::Result<T, CredentialsError>;

#[derive(Debug, Error)]
pub enum CredentialsError {
	// =========================================================================
	// Validation Errors
	// =========================================================================
	#[error("invalid request: {0}")]
	Validation(String),

	#[error("not found: {0}")]
	NotFound(String),

	// =========================================================================
	// Conflict Errors
	// =========================================================================
	#[error("conflict: {0}")]
	Conflict(String),

	#[error("session {session_id} already holds a {purpose} credential for library {library_id}")]
	BindingConflict {
		session_id: SessionId,
		library_id: LibraryId,
		purpose: CredentialPurpose,
	},

	// =========================================================================
	// Upstream Errors
	// =========================================================================
	#[error("store {0} has no usable token")]
	TokenUnavailable(StoreId),

	#[error("secrets engine unavailable: {0}")]
	EngineUnavailable(String),

	#[error("token rejected by secrets engine: {0}")]
	TokenInvalid(String),

	#[error("secrets engine rejected request: {0}")]
	EngineRejected(String),

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("database error: {0}")]
	Database(DbError),
}

impl CredentialsError {
	/// True for failures that may succeed if the same call is repeated later.
	pub fn is_retryable(&self) -> bool {
		matches!(self, CredentialsError::EngineUnavailable(_))
	}

	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			CredentialsError::Database(_)
				| CredentialsError::Encryption(_)
				| CredentialsError::Decryption(_)
		)
	}

	/// Returns the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			CredentialsError::Validation(_) => 400,
			CredentialsError::NotFound(_) => 404,
			CredentialsError::Conflict(_) | CredentialsError::BindingConflict { .. } => 409,
			CredentialsError::TokenInvalid(_) | CredentialsError::EngineRejected(_) => 502,
			CredentialsError::TokenUnavailable(_) | CredentialsError::EngineUnavailable(_) => 503,
			CredentialsError::Encryption(_)
			| CredentialsError::Decryption(_)
			| CredentialsError::Database(_) => 500,
		}
	}
}

impl From<DbError> for CredentialsError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::NotFound(what) => CredentialsError::NotFound(what),
			DbError::Conflict(what) => CredentialsError::Conflict(what),
			other => CredentialsError::Database(other),
		}
	}
}

impl From<EngineError> for CredentialsError {
	fn from(e: EngineError) -> Self {
		match e {
			EngineError::Transient(msg) => CredentialsError::EngineUnavailable(msg),
			EngineError::TokenInvalid(msg) => CredentialsError::TokenInvalid(msg),
			EngineError::Rejected(msg) => CredentialsError::EngineRejected(msg),
			EngineError::Configuration(msg) => CredentialsError::Validation(msg),
		}
	}
}
