// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

/// Run all database migrations.
///
/// Migrations are idempotent and safe to run on every start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	let m1 = include_str!("../migrations/001_credential_vault.sql");
	for stmt in m1.split(';').filter(|s| !is_blank_statement(s)) {
		if let Err(e) = sqlx::query(stmt).execute(pool).await {
			let msg = e.to_string();
			if !msg.contains("already exists") {
				return Err(e.into());
			}
		}
	}

	tracing::debug!("migrations applied");
	Ok(())
}

fn is_blank_statement(stmt: &str) -> bool {
	stmt
		.lines()
		.map(str::trim)
		.all(|line| line.is_empty() || line.starts_with("--"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn comment_only_chunks_are_skipped() {
		assert!(is_blank_statement("\n-- trailing comment\n  "));
		assert!(!is_blank_statement("-- header\nCREATE TABLE t (x)"));
	}

	#[tokio::test]
	async fn migrations_are_idempotent() {
		let pool = crate::testing::create_test_pool().await;
		run_migrations(&pool).await.unwrap();

		let tables: Vec<String> = sqlx::query_scalar(
			"SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '%credential%' ORDER BY name",
		)
		.fetch_all(&pool)
		.await
		.unwrap();
		assert_eq!(
			tables,
			vec![
				"credential_vault_client_certificate",
				"credential_vault_credential",
				"credential_vault_library",
				"credential_vault_store",
				"credential_vault_token",
				"session_credential_dynamic",
			]
		);
	}
}
