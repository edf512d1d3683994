// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential store repository.
//!
//! Stores, their engine access tokens and their mTLS client certificates.
//! Every token state change is a conditional update on the current status,
//! so the returned `bool` tells the caller whether it won the transition.
//! Transitions out of `maintaining` also match the caller's claim time; a
//! worker whose claim was taken over cannot commit.
//! Secrets arrive here already encrypted; lookups use the token HMAC.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use warden_credentials_core::{Expiration, ScopeId, StoreId, TokenStatus};

use crate::error::{is_foreign_key_error, is_unique_constraint_error, DbError, Result};
use crate::time::{
	format_expiration, format_timestamp, parse_expiration, parse_optional_timestamp,
	parse_timestamp,
};

/// Mutable connection settings of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSettings {
	pub name: Option<String>,
	pub description: Option<String>,
	pub vault_address: String,
	pub namespace: Option<String>,
	pub ca_cert: Option<Vec<u8>>,
	pub tls_server_name: Option<String>,
	pub tls_skip_verify: bool,
}

#[derive(Debug, Clone)]
pub struct NewStore {
	pub public_id: StoreId,
	pub scope_id: ScopeId,
	pub settings: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct StoreRecord {
	pub public_id: StoreId,
	pub scope_id: ScopeId,
	pub settings: StoreSettings,
	pub version: i64,
	pub create_time: DateTime<Utc>,
	pub update_time: DateTime<Utc>,
}

/// An encrypted token ready to be inserted as `current`.
#[derive(Debug, Clone)]
pub struct NewToken {
	pub token_hmac: Vec<u8>,
	pub ciphertext: Vec<u8>,
	pub key_id: String,
	pub last_renewal_time: DateTime<Utc>,
	pub expiration: Expiration,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
	pub token_hmac: Vec<u8>,
	pub ciphertext: Vec<u8>,
	pub store_id: StoreId,
	pub key_id: String,
	pub status: TokenStatus,
	pub last_renewal_time: DateTime<Utc>,
	pub expiration: Expiration,
	/// Consecutive failed attempts: renewals while usable, revocations
	/// once in `revoke`.
	pub renewal_attempts: u32,
	/// Earliest instant a failed renewal or revocation may be retried.
	pub next_renewal_attempt: Option<DateTime<Utc>>,
	/// When the current `maintaining` claim was taken; `None` when unclaimed.
	pub claimed_at: Option<DateTime<Utc>>,
	pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewClientCertificate {
	pub certificate: Vec<u8>,
	pub certificate_key: Vec<u8>,
	pub certificate_key_hmac: Vec<u8>,
	pub key_id: String,
}

#[derive(Debug, Clone)]
pub struct ClientCertificateRecord {
	pub store_id: StoreId,
	pub certificate: Vec<u8>,
	/// Encrypted private key.
	pub certificate_key: Vec<u8>,
	pub certificate_key_hmac: Vec<u8>,
	pub key_id: String,
	pub update_time: DateTime<Utc>,
}

#[async_trait]
pub trait VaultStore: Send + Sync {
	async fn create_store(
		&self,
		store: &NewStore,
		token: &NewToken,
		certificate: Option<&NewClientCertificate>,
		now: DateTime<Utc>,
	) -> Result<StoreRecord>;
	async fn get_store(&self, id: &StoreId) -> Result<Option<StoreRecord>>;
	async fn list_stores(&self, scope_id: &ScopeId) -> Result<Vec<StoreRecord>>;
	async fn update_store(
		&self,
		id: &StoreId,
		settings: &StoreSettings,
		expected_version: i64,
		now: DateTime<Utc>,
	) -> Result<StoreRecord>;
	async fn delete_store(&self, id: &StoreId) -> Result<bool>;

	async fn rotate_token(&self, store_id: &StoreId, token: &NewToken, now: DateTime<Utc>)
		-> Result<u64>;
	async fn get_token(&self, token_hmac: &[u8]) -> Result<Option<TokenRecord>>;
	async fn get_usable_token(&self, store_id: &StoreId) -> Result<Option<TokenRecord>>;
	async fn list_tokens_for_store(&self, store_id: &StoreId) -> Result<Vec<TokenRecord>>;
	async fn list_tokens_by_status(&self, status: TokenStatus) -> Result<Vec<TokenRecord>>;
	async fn list_renewable_tokens(&self) -> Result<Vec<TokenRecord>>;
	async fn claim_token_for_renewal(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool>;
	async fn reclaim_token_for_retry(
		&self,
		token_hmac: &[u8],
		stale_before: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn complete_token_renewal(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		last_renewal_time: DateTime<Utc>,
		expiration: &Expiration,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn release_token_claim(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn revoke_claimed_token(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn defer_token_revocation(
		&self,
		token_hmac: &[u8],
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn mark_token_expired(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool>;

	async fn upsert_client_certificate(
		&self,
		store_id: &StoreId,
		certificate: &NewClientCertificate,
		now: DateTime<Utc>,
	) -> Result<ClientCertificateRecord>;
	async fn get_client_certificate(
		&self,
		store_id: &StoreId,
	) -> Result<Option<ClientCertificateRecord>>;
	async fn delete_client_certificate(&self, store_id: &StoreId) -> Result<bool>;
}

const STORE_COLUMNS: &str = "public_id, scope_id, name, description, vault_address, namespace, ca_cert, tls_server_name, tls_skip_verify, version, create_time, update_time";

const TOKEN_COLUMNS: &str = "token_hmac, token, store_id, key_id, status, last_renewal_time, expiration_time, renewal_attempts, next_renewal_attempt, claimed_at, create_time";

#[derive(Clone)]
pub struct VaultRepository {
	pool: SqlitePool,
}

impl VaultRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert a store together with its first token and optional certificate.
	///
	/// Returns `Err(DbError::Conflict)` if the id, the scope/name pair or the
	/// token HMAC is already taken.
	#[tracing::instrument(skip(self, store, token, certificate), fields(store_id = %store.public_id, scope_id = %store.scope_id))]
	pub async fn create_store(
		&self,
		store: &NewStore,
		token: &NewToken,
		certificate: Option<&NewClientCertificate>,
		now: DateTime<Utc>,
	) -> Result<StoreRecord> {
		let now_str = format_timestamp(now);
		let mut tx = self.pool.begin().await?;

		let settings = &store.settings;
		sqlx::query(
			r#"
			INSERT INTO credential_vault_store (public_id, scope_id, name, description, vault_address, namespace, ca_cert, tls_server_name, tls_skip_verify, version, create_time, update_time)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
			"#,
		)
		.bind(store.public_id.as_str())
		.bind(store.scope_id.as_str())
		.bind(&settings.name)
		.bind(&settings.description)
		.bind(&settings.vault_address)
		.bind(&settings.namespace)
		.bind(&settings.ca_cert)
		.bind(&settings.tls_server_name)
		.bind(settings.tls_skip_verify)
		.bind(&now_str)
		.bind(&now_str)
		.execute(&mut *tx)
		.await
		.map_err(|e| conflict_or(e, || format!("store already exists: {}", store.public_id)))?;

		insert_token(&mut tx, &store.public_id, token, &now_str).await?;

		if let Some(certificate) = certificate {
			upsert_certificate(&mut tx, &store.public_id, certificate, &now_str).await?;
		}

		tx.commit().await?;

		tracing::debug!(store_id = %store.public_id, "credential store created");
		Ok(StoreRecord {
			public_id: store.public_id.clone(),
			scope_id: store.scope_id.clone(),
			settings: store.settings.clone(),
			version: 1,
			create_time: parse_timestamp(&now_str)?,
			update_time: parse_timestamp(&now_str)?,
		})
	}

	#[tracing::instrument(skip(self), fields(store_id = %id))]
	pub async fn get_store(&self, id: &StoreId) -> Result<Option<StoreRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {STORE_COLUMNS} FROM credential_vault_store WHERE public_id = ?"
		))
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_store_row).transpose()
	}

	#[tracing::instrument(skip(self), fields(scope_id = %scope_id))]
	pub async fn list_stores(&self, scope_id: &ScopeId) -> Result<Vec<StoreRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {STORE_COLUMNS} FROM credential_vault_store WHERE scope_id = ? ORDER BY create_time, public_id"
		))
		.bind(scope_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_store_row).collect()
	}

	/// Replace a store's connection settings if its version still matches.
	///
	/// Returns `Err(DbError::NotFound)` for an unknown store and
	/// `Err(DbError::Conflict)` when another writer bumped the version first.
	#[tracing::instrument(skip(self, settings), fields(store_id = %id))]
	pub async fn update_store(
		&self,
		id: &StoreId,
		settings: &StoreSettings,
		expected_version: i64,
		now: DateTime<Utc>,
	) -> Result<StoreRecord> {
		let row = sqlx::query(&format!(
			r#"
			UPDATE credential_vault_store
			SET name = ?, description = ?, vault_address = ?, namespace = ?, ca_cert = ?,
			    tls_server_name = ?, tls_skip_verify = ?, version = version + 1, update_time = ?
			WHERE public_id = ? AND version = ?
			RETURNING {STORE_COLUMNS}
			"#
		))
		.bind(&settings.name)
		.bind(&settings.description)
		.bind(&settings.vault_address)
		.bind(&settings.namespace)
		.bind(&settings.ca_cert)
		.bind(&settings.tls_server_name)
		.bind(settings.tls_skip_verify)
		.bind(format_timestamp(now))
		.bind(id.as_str())
		.bind(expected_version)
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| conflict_or(e, || format!("store name already in use: {id}")))?;

		match row {
			Some(row) => parse_store_row(&row),
			None => match self.get_store(id).await? {
				Some(current) => Err(DbError::Conflict(format!(
					"store {id} is at version {}, expected {expected_version}",
					current.version
				))),
				None => Err(DbError::NotFound(id.to_string())),
			},
		}
	}

	/// Delete a store; tokens, certificate, libraries and leases cascade.
	#[tracing::instrument(skip(self), fields(store_id = %id))]
	pub async fn delete_store(&self, id: &StoreId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM credential_vault_store WHERE public_id = ?")
			.bind(id.as_str())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Supersede the store's usable token with a new `current` token.
	///
	/// Returns how many tokens moved to `revoke`.
	#[tracing::instrument(skip(self, token), fields(store_id = %store_id))]
	pub async fn rotate_token(
		&self,
		store_id: &StoreId,
		token: &NewToken,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let now_str = format_timestamp(now);
		let mut tx = self.pool.begin().await?;

		let exists: Option<i64> =
			sqlx::query_scalar("SELECT 1 FROM credential_vault_store WHERE public_id = ?")
				.bind(store_id.as_str())
				.fetch_optional(&mut *tx)
				.await?;
		if exists.is_none() {
			return Err(DbError::NotFound(store_id.to_string()));
		}

		let superseded = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET status = 'revoke', renewal_attempts = 0, next_renewal_attempt = NULL,
			    claimed_at = NULL, update_time = ?
			WHERE store_id = ? AND status IN ('current', 'maintaining')
			"#,
		)
		.bind(&now_str)
		.bind(store_id.as_str())
		.execute(&mut *tx)
		.await?
		.rows_affected();

		insert_token(&mut tx, store_id, token, &now_str).await?;
		sqlx::query(
			"UPDATE credential_vault_store SET version = version + 1, update_time = ? WHERE public_id = ?",
		)
		.bind(&now_str)
		.bind(store_id.as_str())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		tracing::debug!(store_id = %store_id, superseded, "store token rotated");
		Ok(superseded)
	}

	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn get_token(&self, token_hmac: &[u8]) -> Result<Option<TokenRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {TOKEN_COLUMNS} FROM credential_vault_token WHERE token_hmac = ?"
		))
		.bind(token_hmac)
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_token_row).transpose()
	}

	/// The token issuance should present: `current`, else `maintaining`.
	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn get_usable_token(&self, store_id: &StoreId) -> Result<Option<TokenRecord>> {
		let row = sqlx::query(&format!(
			r#"
			SELECT {TOKEN_COLUMNS} FROM credential_vault_token
			WHERE store_id = ? AND status IN ('current', 'maintaining')
			ORDER BY CASE status WHEN 'current' THEN 0 ELSE 1 END
			LIMIT 1
			"#
		))
		.bind(store_id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_token_row).transpose()
	}

	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn list_tokens_for_store(&self, store_id: &StoreId) -> Result<Vec<TokenRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {TOKEN_COLUMNS} FROM credential_vault_token WHERE store_id = ? ORDER BY create_time"
		))
		.bind(store_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_token_row).collect()
	}

	#[tracing::instrument(skip(self), fields(status = %status))]
	pub async fn list_tokens_by_status(&self, status: TokenStatus) -> Result<Vec<TokenRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {TOKEN_COLUMNS} FROM credential_vault_token WHERE status = ? ORDER BY update_time"
		))
		.bind(status.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_token_row).collect()
	}

	/// Tokens the scheduler must keep alive: usable and with a finite expiration.
	#[tracing::instrument(skip(self))]
	pub async fn list_renewable_tokens(&self) -> Result<Vec<TokenRecord>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {TOKEN_COLUMNS} FROM credential_vault_token
			WHERE status IN ('current', 'maintaining') AND expiration_time IS NOT NULL
			ORDER BY expiration_time
			"#
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_token_row).collect()
	}

	/// `current → maintaining`. Only one caller can win for a given token.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn claim_token_for_renewal(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool> {
		let now_str = format_timestamp(now);
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET status = 'maintaining', claimed_at = ?, update_time = ?
			WHERE token_hmac = ? AND status = 'current'
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.bind(token_hmac)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Take over a `maintaining` token whose claim was released after a
	/// failure or whose claimant went quiet before `stale_before`.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn reclaim_token_for_retry(
		&self,
		token_hmac: &[u8],
		stale_before: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let now_str = format_timestamp(now);
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET claimed_at = ?, update_time = ?
			WHERE token_hmac = ? AND status = 'maintaining'
			  AND (claimed_at IS NULL OR claimed_at <= ?)
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.bind(token_hmac)
		.bind(format_timestamp(stale_before))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// `maintaining → current` after a successful renewal, for the holder of
	/// the claim taken at `claimed_at`.
	#[tracing::instrument(skip(self, token_hmac, expiration))]
	pub async fn complete_token_renewal(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		last_renewal_time: DateTime<Utc>,
		expiration: &Expiration,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET status = 'current', last_renewal_time = ?, expiration_time = ?,
			    renewal_attempts = 0, next_renewal_attempt = NULL, claimed_at = NULL, update_time = ?
			WHERE token_hmac = ? AND status = 'maintaining' AND claimed_at = ?
			"#,
		)
		.bind(format_timestamp(last_renewal_time))
		.bind(format_expiration(expiration))
		.bind(format_timestamp(now))
		.bind(token_hmac)
		.bind(format_timestamp(claimed_at))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Record a failed renewal attempt, leaving the token in `maintaining`
	/// with its claim released until `next_attempt`.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn release_token_claim(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET renewal_attempts = renewal_attempts + 1, next_renewal_attempt = ?,
			    claimed_at = NULL, update_time = ?
			WHERE token_hmac = ? AND status = 'maintaining' AND claimed_at = ?
			"#,
		)
		.bind(format_timestamp(next_attempt))
		.bind(format_timestamp(now))
		.bind(token_hmac)
		.bind(format_timestamp(claimed_at))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// `maintaining → revoke` by the holder of the claim taken at `claimed_at`.
	/// The attempt counter restarts for revocation.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn revoke_claimed_token(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET status = 'revoke', renewal_attempts = 0, next_renewal_attempt = NULL,
			    claimed_at = NULL, update_time = ?
			WHERE token_hmac = ? AND status = 'maintaining' AND claimed_at = ?
			"#,
		)
		.bind(format_timestamp(now))
		.bind(token_hmac)
		.bind(format_timestamp(claimed_at))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Record a failed revocation; the token stays in `revoke` until `next_attempt`.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn defer_token_revocation(
		&self,
		token_hmac: &[u8],
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET renewal_attempts = renewal_attempts + 1, next_renewal_attempt = ?, update_time = ?
			WHERE token_hmac = ? AND status = 'revoke'
			"#,
		)
		.bind(format_timestamp(next_attempt))
		.bind(format_timestamp(now))
		.bind(token_hmac)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// `revoke → expired`. Terminal.
	#[tracing::instrument(skip(self, token_hmac))]
	pub async fn mark_token_expired(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_token
			SET status = 'expired', update_time = ?
			WHERE token_hmac = ? AND status = 'revoke'
			"#,
		)
		.bind(format_timestamp(now))
		.bind(token_hmac)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Insert or replace the store's client certificate.
	///
	/// Returns `Err(DbError::NotFound)` if the store does not exist.
	#[tracing::instrument(skip(self, certificate), fields(store_id = %store_id))]
	pub async fn upsert_client_certificate(
		&self,
		store_id: &StoreId,
		certificate: &NewClientCertificate,
		now: DateTime<Utc>,
	) -> Result<ClientCertificateRecord> {
		let mut tx = self.pool.begin().await?;
		let record =
			upsert_certificate(&mut tx, store_id, certificate, &format_timestamp(now)).await?;
		tx.commit().await?;

		tracing::debug!(store_id = %store_id, "client certificate stored");
		Ok(record)
	}

	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn get_client_certificate(
		&self,
		store_id: &StoreId,
	) -> Result<Option<ClientCertificateRecord>> {
		let row = sqlx::query(
			r#"
			SELECT store_id, certificate, certificate_key, certificate_key_hmac, key_id, update_time
			FROM credential_vault_client_certificate
			WHERE store_id = ?
			"#,
		)
		.bind(store_id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_certificate_row).transpose()
	}

	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn delete_client_certificate(&self, store_id: &StoreId) -> Result<bool> {
		let result =
			sqlx::query("DELETE FROM credential_vault_client_certificate WHERE store_id = ?")
				.bind(store_id.as_str())
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
impl VaultStore for VaultRepository {
	async fn create_store(
		&self,
		store: &NewStore,
		token: &NewToken,
		certificate: Option<&NewClientCertificate>,
		now: DateTime<Utc>,
	) -> Result<StoreRecord> {
		VaultRepository::create_store(self, store, token, certificate, now).await
	}

	async fn get_store(&self, id: &StoreId) -> Result<Option<StoreRecord>> {
		VaultRepository::get_store(self, id).await
	}

	async fn list_stores(&self, scope_id: &ScopeId) -> Result<Vec<StoreRecord>> {
		VaultRepository::list_stores(self, scope_id).await
	}

	async fn update_store(
		&self,
		id: &StoreId,
		settings: &StoreSettings,
		expected_version: i64,
		now: DateTime<Utc>,
	) -> Result<StoreRecord> {
		VaultRepository::update_store(self, id, settings, expected_version, now).await
	}

	async fn delete_store(&self, id: &StoreId) -> Result<bool> {
		VaultRepository::delete_store(self, id).await
	}

	async fn rotate_token(
		&self,
		store_id: &StoreId,
		token: &NewToken,
		now: DateTime<Utc>,
	) -> Result<u64> {
		VaultRepository::rotate_token(self, store_id, token, now).await
	}

	async fn get_token(&self, token_hmac: &[u8]) -> Result<Option<TokenRecord>> {
		VaultRepository::get_token(self, token_hmac).await
	}

	async fn get_usable_token(&self, store_id: &StoreId) -> Result<Option<TokenRecord>> {
		VaultRepository::get_usable_token(self, store_id).await
	}

	async fn list_tokens_for_store(&self, store_id: &StoreId) -> Result<Vec<TokenRecord>> {
		VaultRepository::list_tokens_for_store(self, store_id).await
	}

	async fn list_tokens_by_status(&self, status: TokenStatus) -> Result<Vec<TokenRecord>> {
		VaultRepository::list_tokens_by_status(self, status).await
	}

	async fn list_renewable_tokens(&self) -> Result<Vec<TokenRecord>> {
		VaultRepository::list_renewable_tokens(self).await
	}

	async fn claim_token_for_renewal(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool> {
		VaultRepository::claim_token_for_renewal(self, token_hmac, now).await
	}

	async fn reclaim_token_for_retry(
		&self,
		token_hmac: &[u8],
		stale_before: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		VaultRepository::reclaim_token_for_retry(self, token_hmac, stale_before, now).await
	}

	async fn complete_token_renewal(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		last_renewal_time: DateTime<Utc>,
		expiration: &Expiration,
		now: DateTime<Utc>,
	) -> Result<bool> {
		VaultRepository::complete_token_renewal(
			self,
			token_hmac,
			claimed_at,
			last_renewal_time,
			expiration,
			now,
		)
		.await
	}

	async fn release_token_claim(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		VaultRepository::release_token_claim(self, token_hmac, claimed_at, next_attempt, now).await
	}

	async fn revoke_claimed_token(
		&self,
		token_hmac: &[u8],
		claimed_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		VaultRepository::revoke_claimed_token(self, token_hmac, claimed_at, now).await
	}

	async fn defer_token_revocation(
		&self,
		token_hmac: &[u8],
		next_attempt: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		VaultRepository::defer_token_revocation(self, token_hmac, next_attempt, now).await
	}

	async fn mark_token_expired(&self, token_hmac: &[u8], now: DateTime<Utc>) -> Result<bool> {
		VaultRepository::mark_token_expired(self, token_hmac, now).await
	}

	async fn upsert_client_certificate(
		&self,
		store_id: &StoreId,
		certificate: &NewClientCertificate,
		now: DateTime<Utc>,
	) -> Result<ClientCertificateRecord> {
		VaultRepository::upsert_client_certificate(self, store_id, certificate, now).await
	}

	async fn get_client_certificate(
		&self,
		store_id: &StoreId,
	) -> Result<Option<ClientCertificateRecord>> {
		VaultRepository::get_client_certificate(self, store_id).await
	}

	async fn delete_client_certificate(&self, store_id: &StoreId) -> Result<bool> {
		VaultRepository::delete_client_certificate(self, store_id).await
	}
}

async fn insert_token(
	tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
	store_id: &StoreId,
	token: &NewToken,
	now_str: &str,
) -> Result<()> {
	sqlx::query(
		r#"
		INSERT INTO credential_vault_token (token_hmac, token, store_id, key_id, status, last_renewal_time, expiration_time, renewal_attempts, create_time, update_time)
		VALUES (?, ?, ?, ?, 'current', ?, ?, 0, ?, ?)
		"#,
	)
	.bind(&token.token_hmac)
	.bind(&token.ciphertext)
	.bind(store_id.as_str())
	.bind(&token.key_id)
	.bind(format_timestamp(token.last_renewal_time))
	.bind(format_expiration(&token.expiration))
	.bind(now_str)
	.bind(now_str)
	.execute(&mut **tx)
	.await
	.map_err(|e| conflict_or(e, || "token already registered".to_string()))?;

	Ok(())
}

async fn upsert_certificate(
	tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
	store_id: &StoreId,
	certificate: &NewClientCertificate,
	now_str: &str,
) -> Result<ClientCertificateRecord> {
	let row = sqlx::query(
		r#"
		INSERT INTO credential_vault_client_certificate (store_id, certificate, certificate_key, certificate_key_hmac, key_id, update_time)
		VALUES (?, ?, ?, ?, ?, ?)
		ON CONFLICT(store_id) DO UPDATE SET
			certificate = excluded.certificate,
			certificate_key = excluded.certificate_key,
			certificate_key_hmac = excluded.certificate_key_hmac,
			key_id = excluded.key_id,
			update_time = excluded.update_time
		RETURNING store_id, certificate, certificate_key, certificate_key_hmac, key_id, update_time
		"#,
	)
	.bind(store_id.as_str())
	.bind(&certificate.certificate)
	.bind(&certificate.certificate_key)
	.bind(&certificate.certificate_key_hmac)
	.bind(&certificate.key_id)
	.bind(now_str)
	.fetch_one(&mut **tx)
	.await
	.map_err(|e| {
		if is_foreign_key_error(&e) {
			DbError::NotFound(store_id.to_string())
		} else {
			DbError::Sqlx(e)
		}
	})?;

	parse_certificate_row(&row)
}

fn conflict_or(e: sqlx::Error, message: impl FnOnce() -> String) -> DbError {
	if is_unique_constraint_error(&e) {
		DbError::Conflict(message())
	} else {
		DbError::Sqlx(e)
	}
}

pub(crate) fn parse_store_id(value: String) -> Result<StoreId> {
	StoreId::parse(value).ok_or_else(|| DbError::Internal("blank store id".to_string()))
}

fn parse_store_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoreRecord> {
	Ok(StoreRecord {
		public_id: parse_store_id(row.try_get("public_id")?)?,
		scope_id: ScopeId::parse(row.try_get::<String, _>("scope_id")?)
			.ok_or_else(|| DbError::Internal("blank scope id".to_string()))?,
		settings: StoreSettings {
			name: row.try_get("name")?,
			description: row.try_get("description")?,
			vault_address: row.try_get("vault_address")?,
			namespace: row.try_get("namespace")?,
			ca_cert: row.try_get("ca_cert")?,
			tls_server_name: row.try_get("tls_server_name")?,
			tls_skip_verify: row.try_get("tls_skip_verify")?,
		},
		version: row.try_get("version")?,
		create_time: parse_timestamp(&row.try_get::<String, _>("create_time")?)?,
		update_time: parse_timestamp(&row.try_get::<String, _>("update_time")?)?,
	})
}

pub(crate) fn parse_token_status(value: &str) -> Result<TokenStatus> {
	value.parse::<TokenStatus>().map_err(DbError::Internal)
}

fn parse_token_row(row: &sqlx::sqlite::SqliteRow) -> Result<TokenRecord> {
	let attempts: i64 = row.try_get("renewal_attempts")?;
	Ok(TokenRecord {
		token_hmac: row.try_get("token_hmac")?,
		ciphertext: row.try_get("token")?,
		store_id: parse_store_id(row.try_get("store_id")?)?,
		key_id: row.try_get("key_id")?,
		status: parse_token_status(&row.try_get::<String, _>("status")?)?,
		last_renewal_time: parse_timestamp(&row.try_get::<String, _>("last_renewal_time")?)?,
		expiration: parse_expiration(row.try_get("expiration_time")?)?,
		renewal_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
		next_renewal_attempt: parse_optional_timestamp(row.try_get("next_renewal_attempt")?)?,
		claimed_at: parse_optional_timestamp(row.try_get("claimed_at")?)?,
		create_time: parse_timestamp(&row.try_get::<String, _>("create_time")?)?,
	})
}

fn parse_certificate_row(row: &sqlx::sqlite::SqliteRow) -> Result<ClientCertificateRecord> {
	Ok(ClientCertificateRecord {
		store_id: parse_store_id(row.try_get("store_id")?)?,
		certificate: row.try_get("certificate")?,
		certificate_key: row.try_get("certificate_key")?,
		certificate_key_hmac: row.try_get("certificate_key_hmac")?,
		key_id: row.try_get("key_id")?,
		update_time: parse_timestamp(&row.try_get::<String, _>("update_time")?)?,
	})
}
