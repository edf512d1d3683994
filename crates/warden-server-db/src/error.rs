// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub(crate) fn is_unique_constraint_error(e: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(ref db_err) = e {
		return db_err.message().contains("UNIQUE constraint failed")
			|| db_err.message().contains("PRIMARY KEY constraint failed");
	}
	false
}

pub(crate) fn is_foreign_key_error(e: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(ref db_err) = e {
		return db_err.message().contains("FOREIGN KEY constraint failed");
	}
	false
}
