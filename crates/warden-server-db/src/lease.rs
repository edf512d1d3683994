// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Libraries, dynamic credentials and session credential slots.
//!
//! A session opens one slot per (library, purpose). The slot is filled by
//! [`LeaseRepository::bind_session_credential`], a conditional update that
//! only succeeds while the slot is still empty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use warden_credentials_core::{
	CredentialId, CredentialPurpose, CredentialStatus, Expiration, HttpMethod, LibraryId,
	SessionId, StoreId, TokenStatus,
};

use crate::error::{is_foreign_key_error, is_unique_constraint_error, DbError, Result};
use crate::time::{format_expiration, format_timestamp, parse_expiration, parse_timestamp};
use crate::vault::{parse_store_id, parse_token_status};

#[derive(Debug, Clone)]
pub struct NewLibrary {
	pub public_id: LibraryId,
	pub store_id: StoreId,
	pub name: Option<String>,
	pub description: Option<String>,
	pub vault_path: String,
	pub http_method: HttpMethod,
	pub http_request_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LibraryRecord {
	pub public_id: LibraryId,
	pub store_id: StoreId,
	pub name: Option<String>,
	pub description: Option<String>,
	pub vault_path: String,
	pub http_method: HttpMethod,
	pub http_request_body: Option<String>,
	pub create_time: DateTime<Utc>,
}

/// The store's usable token as joined into a [`PrivateLibrary`].
#[derive(Debug, Clone)]
pub struct EncryptedToken {
	pub token_hmac: Vec<u8>,
	pub ciphertext: Vec<u8>,
	pub key_id: String,
	pub status: TokenStatus,
	pub expiration: Expiration,
}

#[derive(Debug, Clone)]
pub struct EncryptedCertificate {
	pub certificate: Vec<u8>,
	pub certificate_key: Vec<u8>,
	pub key_id: String,
}

/// A library with everything needed to call its engine, secrets still encrypted.
#[derive(Debug, Clone)]
pub struct PrivateLibrary {
	pub library: LibraryRecord,
	pub vault_address: String,
	pub namespace: Option<String>,
	pub ca_cert: Option<Vec<u8>>,
	pub tls_server_name: Option<String>,
	pub tls_skip_verify: bool,
	/// `None` when the store has no `current` or `maintaining` token.
	pub token: Option<EncryptedToken>,
	pub client_certificate: Option<EncryptedCertificate>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
	pub public_id: CredentialId,
	pub library_id: LibraryId,
	pub session_id: SessionId,
	pub token_hmac: Vec<u8>,
	pub external_id: String,
	pub is_renewable: bool,
	pub last_renewal_time: DateTime<Utc>,
	pub expiration: Expiration,
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
	pub public_id: CredentialId,
	pub library_id: LibraryId,
	pub session_id: SessionId,
	pub token_hmac: Vec<u8>,
	pub external_id: String,
	pub is_renewable: bool,
	pub status: CredentialStatus,
	pub last_renewal_time: DateTime<Utc>,
	pub expiration: Expiration,
	pub create_time: DateTime<Utc>,
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
	async fn create_library(&self, library: &NewLibrary, now: DateTime<Utc>) -> Result<()>;
	async fn get_library(&self, id: &LibraryId) -> Result<Option<LibraryRecord>>;
	async fn list_libraries(&self, store_id: &StoreId) -> Result<Vec<LibraryRecord>>;
	async fn list_private_libraries(&self, ids: &[LibraryId]) -> Result<Vec<PrivateLibrary>>;

	async fn create_session_credential_slot(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		now: DateTime<Utc>,
	) -> Result<()>;
	async fn get_bound_credential_id(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
	) -> Result<Option<CredentialId>>;
	async fn insert_credential(&self, credential: &NewCredential, now: DateTime<Utc>) -> Result<()>;
	async fn bind_session_credential(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		credential_id: &CredentialId,
	) -> Result<bool>;
	async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>>;
	async fn list_session_credentials(&self, session_id: &SessionId)
		-> Result<Vec<CredentialRecord>>;
	async fn list_credentials_by_status(
		&self,
		status: CredentialStatus,
		limit: i64,
	) -> Result<Vec<CredentialRecord>>;
	async fn update_credential_status(
		&self,
		id: &CredentialId,
		from: CredentialStatus,
		to: CredentialStatus,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn defer_credential_revocation(&self, id: &CredentialId, now: DateTime<Utc>)
		-> Result<bool>;
	async fn mark_session_credentials_for_revocation(
		&self,
		session_id: &SessionId,
		now: DateTime<Utc>,
	) -> Result<u64>;
	async fn expire_credentials(&self, now: DateTime<Utc>) -> Result<u64>;
}

const LIBRARY_COLUMNS: &str = "public_id, store_id, name, description, vault_path, http_method, http_request_body, create_time";

const CREDENTIAL_COLUMNS: &str = "public_id, library_id, session_id, token_hmac, external_id, is_renewable, status, last_renewal_time, expiration_time, create_time";

#[derive(Clone)]
pub struct LeaseRepository {
	pool: SqlitePool,
}

impl LeaseRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Returns `Err(DbError::NotFound)` if the store does not exist.
	#[tracing::instrument(skip(self, library), fields(library_id = %library.public_id, store_id = %library.store_id))]
	pub async fn create_library(&self, library: &NewLibrary, now: DateTime<Utc>) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO credential_vault_library (public_id, store_id, name, description, vault_path, http_method, http_request_body, create_time)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(library.public_id.as_str())
		.bind(library.store_id.as_str())
		.bind(&library.name)
		.bind(&library.description)
		.bind(&library.vault_path)
		.bind(library.http_method.as_str())
		.bind(&library.http_request_body)
		.bind(format_timestamp(now))
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_foreign_key_error(&e) {
				DbError::NotFound(library.store_id.to_string())
			} else if is_unique_constraint_error(&e) {
				DbError::Conflict(format!("library already exists: {}", library.public_id))
			} else {
				DbError::Sqlx(e)
			}
		})?;

		tracing::debug!(library_id = %library.public_id, "credential library created");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(library_id = %id))]
	pub async fn get_library(&self, id: &LibraryId) -> Result<Option<LibraryRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {LIBRARY_COLUMNS} FROM credential_vault_library WHERE public_id = ?"
		))
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(|r| parse_library_row(r, "")).transpose()
	}

	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn list_libraries(&self, store_id: &StoreId) -> Result<Vec<LibraryRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {LIBRARY_COLUMNS} FROM credential_vault_library WHERE store_id = ? ORDER BY create_time, public_id"
		))
		.bind(store_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(|r| parse_library_row(r, "")).collect()
	}

	/// Load libraries joined with their store, usable token and certificate.
	///
	/// Unknown ids are silently absent from the result.
	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn list_private_libraries(&self, ids: &[LibraryId]) -> Result<Vec<PrivateLibrary>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let placeholders = vec!["?"; ids.len()].join(", ");
		let query = format!(
			r#"
			SELECT l.public_id AS l_public_id, l.store_id AS l_store_id, l.name AS l_name,
			       l.description AS l_description, l.vault_path AS l_vault_path,
			       l.http_method AS l_http_method, l.http_request_body AS l_http_request_body,
			       l.create_time AS l_create_time,
			       s.vault_address, s.namespace, s.ca_cert, s.tls_server_name, s.tls_skip_verify,
			       t.token_hmac, t.token, t.key_id AS token_key_id, t.status AS token_status,
			       t.expiration_time AS token_expiration_time,
			       c.certificate, c.certificate_key, c.key_id AS certificate_key_id
			FROM credential_vault_library l
			JOIN credential_vault_store s ON s.public_id = l.store_id
			LEFT JOIN credential_vault_token t
			       ON t.store_id = l.store_id AND t.status IN ('current', 'maintaining')
			LEFT JOIN credential_vault_client_certificate c ON c.store_id = l.store_id
			WHERE l.public_id IN ({placeholders})
			ORDER BY l.public_id
			"#
		);

		let mut q = sqlx::query(&query);
		for id in ids {
			q = q.bind(id.as_str());
		}
		let rows = q.fetch_all(&self.pool).await?;

		rows.iter().map(parse_private_library_row).collect()
	}

	/// Open an empty slot for a session to be filled by issuance.
	#[tracing::instrument(skip(self), fields(session_id = %session_id, library_id = %library_id, purpose = %purpose))]
	pub async fn create_session_credential_slot(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		now: DateTime<Utc>,
	) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO session_credential_dynamic (session_id, library_id, credential_purpose, credential_id, create_time)
			VALUES (?, ?, ?, NULL, ?)
			"#,
		)
		.bind(session_id.as_str())
		.bind(library_id.as_str())
		.bind(purpose.as_str())
		.bind(format_timestamp(now))
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_foreign_key_error(&e) {
				DbError::NotFound(library_id.to_string())
			} else if is_unique_constraint_error(&e) {
				DbError::Conflict(format!(
					"slot already open for session {session_id}, library {library_id}, purpose {purpose}"
				))
			} else {
				DbError::Sqlx(e)
			}
		})?;

		Ok(())
	}

	/// Returns `Err(DbError::NotFound)` if the slot was never opened.
	#[tracing::instrument(skip(self), fields(session_id = %session_id, library_id = %library_id, purpose = %purpose))]
	pub async fn get_bound_credential_id(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
	) -> Result<Option<CredentialId>> {
		let row: Option<(Option<String>,)> = sqlx::query_as(
			r#"
			SELECT credential_id FROM session_credential_dynamic
			WHERE session_id = ? AND library_id = ? AND credential_purpose = ?
			"#,
		)
		.bind(session_id.as_str())
		.bind(library_id.as_str())
		.bind(purpose.as_str())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some((credential_id,)) => Ok(credential_id.and_then(CredentialId::parse)),
			None => Err(DbError::NotFound(format!(
				"no {purpose} slot for session {session_id} on library {library_id}"
			))),
		}
	}

	#[tracing::instrument(skip(self, credential), fields(credential_id = %credential.public_id, session_id = %credential.session_id))]
	pub async fn insert_credential(&self, credential: &NewCredential, now: DateTime<Utc>) -> Result<()> {
		let now_str = format_timestamp(now);
		sqlx::query(
			r#"
			INSERT INTO credential_vault_credential (public_id, library_id, session_id, token_hmac, external_id, is_renewable, status, last_renewal_time, expiration_time, create_time, update_time)
			VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)
			"#,
		)
		.bind(credential.public_id.as_str())
		.bind(credential.library_id.as_str())
		.bind(credential.session_id.as_str())
		.bind(&credential.token_hmac)
		.bind(&credential.external_id)
		.bind(credential.is_renewable)
		.bind(format_timestamp(credential.last_renewal_time))
		.bind(format_expiration(&credential.expiration))
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_foreign_key_error(&e) {
				DbError::NotFound(format!(
					"library {} or minting token",
					credential.library_id
				))
			} else if is_unique_constraint_error(&e) {
				DbError::Conflict(format!("credential already exists: {}", credential.public_id))
			} else {
				DbError::Sqlx(e)
			}
		})?;

		Ok(())
	}

	/// Fill an empty slot. Returns `false` if it was already filled or never opened.
	#[tracing::instrument(skip(self), fields(session_id = %session_id, library_id = %library_id, purpose = %purpose, credential_id = %credential_id))]
	pub async fn bind_session_credential(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		credential_id: &CredentialId,
	) -> Result<bool> {
		let bound: Option<String> = sqlx::query_scalar(
			r#"
			UPDATE session_credential_dynamic
			SET credential_id = ?
			WHERE library_id = ? AND session_id = ? AND credential_purpose = ? AND credential_id IS NULL
			RETURNING credential_id
			"#,
		)
		.bind(credential_id.as_str())
		.bind(library_id.as_str())
		.bind(session_id.as_str())
		.bind(purpose.as_str())
		.fetch_optional(&self.pool)
		.await?;

		Ok(bound.is_some())
	}

	#[tracing::instrument(skip(self), fields(credential_id = %id))]
	pub async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {CREDENTIAL_COLUMNS} FROM credential_vault_credential WHERE public_id = ?"
		))
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_credential_row).transpose()
	}

	#[tracing::instrument(skip(self), fields(session_id = %session_id))]
	pub async fn list_session_credentials(
		&self,
		session_id: &SessionId,
	) -> Result<Vec<CredentialRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {CREDENTIAL_COLUMNS} FROM credential_vault_credential WHERE session_id = ? ORDER BY create_time, public_id"
		))
		.bind(session_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_credential_row).collect()
	}

	#[tracing::instrument(skip(self), fields(status = %status))]
	pub async fn list_credentials_by_status(
		&self,
		status: CredentialStatus,
		limit: i64,
	) -> Result<Vec<CredentialRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {CREDENTIAL_COLUMNS} FROM credential_vault_credential WHERE status = ? ORDER BY update_time, public_id LIMIT ?"
		))
		.bind(status.as_str())
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_credential_row).collect()
	}

	/// Conditional `from → to` status change.
	#[tracing::instrument(skip(self), fields(credential_id = %id, from = %from, to = %to))]
	pub async fn update_credential_status(
		&self,
		id: &CredentialId,
		from: CredentialStatus,
		to: CredentialStatus,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE credential_vault_credential SET status = ?, update_time = ? WHERE public_id = ? AND status = ?",
		)
		.bind(to.as_str())
		.bind(format_timestamp(now))
		.bind(id.as_str())
		.bind(from.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Move a credential whose revocation failed to the back of the `revoke`
	/// queue, which is ordered by `update_time`.
	#[tracing::instrument(skip(self), fields(credential_id = %id))]
	pub async fn defer_credential_revocation(
		&self,
		id: &CredentialId,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE credential_vault_credential SET update_time = ? WHERE public_id = ? AND status = 'revoke'",
		)
		.bind(format_timestamp(now))
		.bind(id.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Flag every active credential of a session for upstream revocation.
	#[tracing::instrument(skip(self), fields(session_id = %session_id))]
	pub async fn mark_session_credentials_for_revocation(
		&self,
		session_id: &SessionId,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_credential
			SET status = 'revoke', update_time = ?
			WHERE session_id = ? AND status = 'active'
			"#,
		)
		.bind(format_timestamp(now))
		.bind(session_id.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	/// `active → expired` for finite leases past their expiration.
	#[tracing::instrument(skip(self))]
	pub async fn expire_credentials(&self, now: DateTime<Utc>) -> Result<u64> {
		let now_str = format_timestamp(now);
		let result = sqlx::query(
			r#"
			UPDATE credential_vault_credential
			SET status = 'expired', update_time = ?
			WHERE status = 'active' AND expiration_time IS NOT NULL AND expiration_time <= ?
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
impl LeaseStore for LeaseRepository {
	async fn create_library(&self, library: &NewLibrary, now: DateTime<Utc>) -> Result<()> {
		LeaseRepository::create_library(self, library, now).await
	}

	async fn get_library(&self, id: &LibraryId) -> Result<Option<LibraryRecord>> {
		LeaseRepository::get_library(self, id).await
	}

	async fn list_libraries(&self, store_id: &StoreId) -> Result<Vec<LibraryRecord>> {
		LeaseRepository::list_libraries(self, store_id).await
	}

	async fn list_private_libraries(&self, ids: &[LibraryId]) -> Result<Vec<PrivateLibrary>> {
		LeaseRepository::list_private_libraries(self, ids).await
	}

	async fn create_session_credential_slot(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		now: DateTime<Utc>,
	) -> Result<()> {
		LeaseRepository::create_session_credential_slot(self, session_id, library_id, purpose, now)
			.await
	}

	async fn get_bound_credential_id(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
	) -> Result<Option<CredentialId>> {
		LeaseRepository::get_bound_credential_id(self, session_id, library_id, purpose).await
	}

	async fn insert_credential(&self, credential: &NewCredential, now: DateTime<Utc>) -> Result<()> {
		LeaseRepository::insert_credential(self, credential, now).await
	}

	async fn bind_session_credential(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
		credential_id: &CredentialId,
	) -> Result<bool> {
		LeaseRepository::bind_session_credential(self, session_id, library_id, purpose, credential_id)
			.await
	}

	async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>> {
		LeaseRepository::get_credential(self, id).await
	}

	async fn list_session_credentials(
		&self,
		session_id: &SessionId,
	) -> Result<Vec<CredentialRecord>> {
		LeaseRepository::list_session_credentials(self, session_id).await
	}

	async fn list_credentials_by_status(
		&self,
		status: CredentialStatus,
		limit: i64,
	) -> Result<Vec<CredentialRecord>> {
		LeaseRepository::list_credentials_by_status(self, status, limit).await
	}

	async fn update_credential_status(
		&self,
		id: &CredentialId,
		from: CredentialStatus,
		to: CredentialStatus,
		now: DateTime<Utc>,
	) -> Result<bool> {
		LeaseRepository::update_credential_status(self, id, from, to, now).await
	}

	async fn defer_credential_revocation(
		&self,
		id: &CredentialId,
		now: DateTime<Utc>,
	) -> Result<bool> {
		LeaseRepository::defer_credential_revocation(self, id, now).await
	}

	async fn mark_session_credentials_for_revocation(
		&self,
		session_id: &SessionId,
		now: DateTime<Utc>,
	) -> Result<u64> {
		LeaseRepository::mark_session_credentials_for_revocation(self, session_id, now).await
	}

	async fn expire_credentials(&self, now: DateTime<Utc>) -> Result<u64> {
		LeaseRepository::expire_credentials(self, now).await
	}
}

fn parse_library_row(row: &sqlx::sqlite::SqliteRow, prefix: &str) -> Result<LibraryRecord> {
	let col = |name: &str| format!("{prefix}{name}");
	let method: String = row.try_get(col("http_method").as_str())?;
	Ok(LibraryRecord {
		public_id: LibraryId::parse(row.try_get::<String, _>(col("public_id").as_str())?)
			.ok_or_else(|| DbError::Internal("blank library id".to_string()))?,
		store_id: parse_store_id(row.try_get(col("store_id").as_str())?)?,
		name: row.try_get(col("name").as_str())?,
		description: row.try_get(col("description").as_str())?,
		vault_path: row.try_get(col("vault_path").as_str())?,
		http_method: method.parse().map_err(DbError::Internal)?,
		http_request_body: row.try_get(col("http_request_body").as_str())?,
		create_time: parse_timestamp(&row.try_get::<String, _>(col("create_time").as_str())?)?,
	})
}

fn parse_private_library_row(row: &sqlx::sqlite::SqliteRow) -> Result<PrivateLibrary> {
	let token_hmac: Option<Vec<u8>> = row.try_get("token_hmac")?;
	let token = match token_hmac {
		Some(token_hmac) => Some(EncryptedToken {
			token_hmac,
			ciphertext: row.try_get("token")?,
			key_id: row.try_get("token_key_id")?,
			status: parse_token_status(&row.try_get::<String, _>("token_status")?)?,
			expiration: parse_expiration(row.try_get("token_expiration_time")?)?,
		}),
		None => None,
	};

	let certificate: Option<Vec<u8>> = row.try_get("certificate")?;
	let client_certificate = match certificate {
		Some(certificate) => Some(EncryptedCertificate {
			certificate,
			certificate_key: row.try_get("certificate_key")?,
			key_id: row.try_get("certificate_key_id")?,
		}),
		None => None,
	};

	Ok(PrivateLibrary {
		library: parse_library_row(row, "l_")?,
		vault_address: row.try_get("vault_address")?,
		namespace: row.try_get("namespace")?,
		ca_cert: row.try_get("ca_cert")?,
		tls_server_name: row.try_get("tls_server_name")?,
		tls_skip_verify: row.try_get("tls_skip_verify")?,
		token,
		client_certificate,
	})
}

fn parse_credential_row(row: &sqlx::sqlite::SqliteRow) -> Result<CredentialRecord> {
	let status: String = row.try_get("status")?;
	Ok(CredentialRecord {
		public_id: CredentialId::parse(row.try_get::<String, _>("public_id")?)
			.ok_or_else(|| DbError::Internal("blank credential id".to_string()))?,
		library_id: LibraryId::parse(row.try_get::<String, _>("library_id")?)
			.ok_or_else(|| DbError::Internal("blank library id".to_string()))?,
		session_id: SessionId::parse(row.try_get::<String, _>("session_id")?)
			.ok_or_else(|| DbError::Internal("blank session id".to_string()))?,
		token_hmac: row.try_get("token_hmac")?,
		external_id: row.try_get("external_id")?,
		is_renewable: row.try_get("is_renewable")?,
		status: status.parse().map_err(DbError::Internal)?,
		last_renewal_time: parse_timestamp(&row.try_get::<String, _>("last_renewal_time")?)?,
		expiration: parse_expiration(row.try_get("expiration_time")?)?,
		create_time: parse_timestamp(&row.try_get::<String, _>("create_time")?)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, new_store, new_token, t0};
	use crate::vault::{NewClientCertificate, VaultRepository};
	use chrono::Duration;

	struct Fixture {
		vault: VaultRepository,
		leases: LeaseRepository,
		store_id: StoreId,
		token_hmac: Vec<u8>,
		library_id: LibraryId,
	}

	async fn fixture() -> Fixture {
		let pool = create_test_pool().await;
		let vault = VaultRepository::new(pool.clone());
		let leases = LeaseRepository::new(pool);

		let store = new_store("scope_1", None);
		let token = new_token(b"tok-1", t0(), Some(Duration::hours(1)));
		vault.create_store(&store, &token, None, t0()).await.unwrap();

		let library_id = LibraryId::generate();
		leases
			.create_library(
				&NewLibrary {
					public_id: library_id.clone(),
					store_id: store.public_id.clone(),
					name: Some("postgres".to_string()),
					description: None,
					vault_path: "database/creds/readonly".to_string(),
					http_method: HttpMethod::Get,
					http_request_body: None,
				},
				t0(),
			)
			.await
			.unwrap();

		Fixture {
			vault,
			leases,
			store_id: store.public_id,
			token_hmac: token.token_hmac,
			library_id,
		}
	}

	fn credential(f: &Fixture, session: &SessionId, expiration: Expiration) -> NewCredential {
		NewCredential {
			public_id: CredentialId::generate(),
			library_id: f.library_id.clone(),
			session_id: session.clone(),
			token_hmac: f.token_hmac.clone(),
			external_id: format!("database/creds/readonly/{}", CredentialId::generate()),
			is_renewable: true,
			last_renewal_time: t0(),
			expiration,
		}
	}

	#[tokio::test]
	async fn library_for_unknown_store_is_not_found() {
		let f = fixture().await;
		let err = f
			.leases
			.create_library(
				&NewLibrary {
					public_id: LibraryId::generate(),
					store_id: StoreId::generate(),
					name: None,
					description: None,
					vault_path: "kv/data/app".to_string(),
					http_method: HttpMethod::Get,
					http_request_body: None,
				},
				t0(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn private_library_joins_token_and_certificate() {
		let f = fixture().await;
		f.vault
			.upsert_client_certificate(
				&f.store_id,
				&NewClientCertificate {
					certificate: b"cert".to_vec(),
					certificate_key: b"enc-key".to_vec(),
					certificate_key_hmac: b"hmac".to_vec(),
					key_id: "k1".to_string(),
				},
				t0(),
			)
			.await
			.unwrap();

		let libs = f
			.leases
			.list_private_libraries(&[f.library_id.clone(), LibraryId::generate()])
			.await
			.unwrap();
		assert_eq!(libs.len(), 1);
		let lib = &libs[0];
		assert_eq!(lib.library.vault_path, "database/creds/readonly");
		assert_eq!(lib.vault_address, "https://vault.example.com:8200");
		let token = lib.token.as_ref().unwrap();
		assert_eq!(token.token_hmac, f.token_hmac);
		assert_eq!(token.status, TokenStatus::Current);
		assert_eq!(
			lib.client_certificate.as_ref().unwrap().certificate_key,
			b"enc-key"
		);
	}

	#[tokio::test]
	async fn private_library_without_usable_token() {
		let f = fixture().await;
		assert!(f.vault.claim_token_for_renewal(&f.token_hmac, t0()).await.unwrap());
		assert!(f
			.vault
			.revoke_claimed_token(&f.token_hmac, t0(), t0())
			.await
			.unwrap());

		let libs = f
			.leases
			.list_private_libraries(&[f.library_id.clone()])
			.await
			.unwrap();
		assert_eq!(libs.len(), 1);
		assert!(libs[0].token.is_none());
		assert!(libs[0].client_certificate.is_none());
	}

	#[tokio::test]
	async fn empty_id_list_short_circuits() {
		let f = fixture().await;
		assert!(f.leases.list_private_libraries(&[]).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn binding_happens_exactly_once() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		f.leases
			.create_session_credential_slot(&session, &f.library_id, CredentialPurpose::Brokered, t0())
			.await
			.unwrap();

		let first = credential(&f, &session, Expiration::Never);
		let second = credential(&f, &session, Expiration::Never);
		f.leases.insert_credential(&first, t0()).await.unwrap();
		f.leases.insert_credential(&second, t0()).await.unwrap();

		let (a, b) = tokio::join!(
			f.leases.bind_session_credential(
				&session,
				&f.library_id,
				CredentialPurpose::Brokered,
				&first.public_id
			),
			f.leases.bind_session_credential(
				&session,
				&f.library_id,
				CredentialPurpose::Brokered,
				&second.public_id
			)
		);
		let (a, b) = (a.unwrap(), b.unwrap());
		assert!(a ^ b);

		let winner = if a { &first.public_id } else { &second.public_id };
		let bound = f
			.leases
			.get_bound_credential_id(&session, &f.library_id, CredentialPurpose::Brokered)
			.await
			.unwrap();
		assert_eq!(bound.as_ref(), Some(winner));
	}

	#[tokio::test]
	async fn binding_requires_open_slot() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		let cred = credential(&f, &session, Expiration::Never);
		f.leases.insert_credential(&cred, t0()).await.unwrap();

		assert!(!f
			.leases
			.bind_session_credential(&session, &f.library_id, CredentialPurpose::Injected, &cred.public_id)
			.await
			.unwrap());
		let err = f
			.leases
			.get_bound_credential_id(&session, &f.library_id, CredentialPurpose::Injected)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn duplicate_slot_conflicts() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		f.leases
			.create_session_credential_slot(&session, &f.library_id, CredentialPurpose::Brokered, t0())
			.await
			.unwrap();
		let err = f
			.leases
			.create_session_credential_slot(&session, &f.library_id, CredentialPurpose::Brokered, t0())
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn expiry_skips_infinite_leases() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		let finite = credential(&f, &session, Expiration::At(t0() + Duration::minutes(5)));
		let infinite = credential(&f, &session, Expiration::Never);
		f.leases.insert_credential(&finite, t0()).await.unwrap();
		f.leases.insert_credential(&infinite, t0()).await.unwrap();

		assert_eq!(f.leases.expire_credentials(t0()).await.unwrap(), 0);
		let far_future = t0() + Duration::days(3650);
		assert_eq!(f.leases.expire_credentials(far_future).await.unwrap(), 1);

		let finite = f.leases.get_credential(&finite.public_id).await.unwrap().unwrap();
		assert_eq!(finite.status, CredentialStatus::Expired);
		let infinite = f.leases.get_credential(&infinite.public_id).await.unwrap().unwrap();
		assert_eq!(infinite.status, CredentialStatus::Active);
		assert_eq!(infinite.expiration, Expiration::Never);
	}

	#[tokio::test]
	async fn ending_session_flags_active_credentials() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		let other = SessionId::parse("s_2").unwrap();
		let a = credential(&f, &session, Expiration::Never);
		let b = credential(&f, &other, Expiration::Never);
		f.leases.insert_credential(&a, t0()).await.unwrap();
		f.leases.insert_credential(&b, t0()).await.unwrap();

		assert_eq!(
			f.leases
				.mark_session_credentials_for_revocation(&session, t0())
				.await
				.unwrap(),
			1
		);
		let pending = f
			.leases
			.list_credentials_by_status(CredentialStatus::Revoke, 10)
			.await
			.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].public_id, a.public_id);

		assert!(f
			.leases
			.update_credential_status(&a.public_id, CredentialStatus::Revoke, CredentialStatus::Revoked, t0())
			.await
			.unwrap());
		assert!(!f
			.leases
			.update_credential_status(&a.public_id, CredentialStatus::Revoke, CredentialStatus::Revoked, t0())
			.await
			.unwrap());
		assert_eq!(f.leases.list_session_credentials(&other).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn deferred_revocation_moves_to_back_of_queue() {
		let f = fixture().await;
		let session = SessionId::parse("s_1").unwrap();
		let a = credential(&f, &session, Expiration::Never);
		let b = credential(&f, &session, Expiration::Never);
		f.leases.insert_credential(&a, t0()).await.unwrap();
		f.leases.insert_credential(&b, t0()).await.unwrap();
		f.leases
			.mark_session_credentials_for_revocation(&session, t0())
			.await
			.unwrap();

		let head = f
			.leases
			.list_credentials_by_status(CredentialStatus::Revoke, 1)
			.await
			.unwrap()
			.remove(0);
		assert!(f
			.leases
			.defer_credential_revocation(&head.public_id, t0() + Duration::seconds(1))
			.await
			.unwrap());

		let next = f
			.leases
			.list_credentials_by_status(CredentialStatus::Revoke, 1)
			.await
			.unwrap();
		assert_eq!(next.len(), 1);
		assert_ne!(next[0].public_id, head.public_id);

		// Only credentials still waiting for revocation are touched.
		assert!(f
			.leases
			.update_credential_status(&head.public_id, CredentialStatus::Revoke, CredentialStatus::Revoked, t0())
			.await
			.unwrap());
		assert!(!f
			.leases
			.defer_credential_revocation(&head.public_id, t0())
			.await
			.unwrap());
	}
}
