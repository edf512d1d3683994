// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode, foreign keys and a busy timeout.
///
/// Several workers may share one database file; the busy timeout lets a
/// conditional update wait for a competing writer instead of failing.
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.foreign_keys(true)
		.busy_timeout(Duration::from_secs(5))
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}
