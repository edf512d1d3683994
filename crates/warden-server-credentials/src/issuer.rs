// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dynamic credential issuance with exactly-once session binding.
//!
//! A session opens one empty slot per (library, purpose). Issuance mints a
//! lease, records it, and then fills the slot with a conditional update.
//! When two issuances race for the same slot the loser's lease is revoked
//! upstream in the background and the caller gets `BindingConflict`. A
//! lease that cannot be bound for any other reason is revoked the same way.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use warden_common_secret::SecretString;
use warden_credentials_core::{
	expiration_after, Clock, CredentialId, CredentialPurpose, CredentialStatus, EngineConnector,
	LibraryId, LibraryRequest, SecretEngine, SessionId, TokenStatus,
};
use warden_server_db::{CredentialRecord, LeaseStore, NewCredential, VaultStore};

use crate::connection::{self, with_timeout};
use crate::error::{CredentialsError, Result};
use crate::keys::KeyService;
use crate::notify::ScheduleNotifier;
use crate::policy::RenewalPolicy;

/// Attempts the background revoke makes before leaving the lease to the
/// scheduler's revocation pass.
const BACKGROUND_REVOKE_ATTEMPTS: u32 = 3;

/// Credentials handled per revocation pass.
const REVOCATION_BATCH: i64 = 100;

/// A credential handed to a session.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
	pub credential_id: CredentialId,
	pub library_id: LibraryId,
	pub session_id: SessionId,
	pub purpose: CredentialPurpose,
	/// The secret payload as returned by the engine.
	pub secret: SecretString,
	/// `None` when the lease never expires.
	pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialRevocationReport {
	pub revoked: u32,
	pub failed: u32,
}

pub struct CredentialIssuer {
	leases: Arc<dyn LeaseStore>,
	vault: Arc<dyn VaultStore>,
	connector: Arc<dyn EngineConnector>,
	keys: Arc<dyn KeyService>,
	clock: Arc<dyn Clock>,
	policy: RenewalPolicy,
	notifier: ScheduleNotifier,
}

impl CredentialIssuer {
	pub fn new(
		leases: Arc<dyn LeaseStore>,
		vault: Arc<dyn VaultStore>,
		connector: Arc<dyn EngineConnector>,
		keys: Arc<dyn KeyService>,
		clock: Arc<dyn Clock>,
		policy: RenewalPolicy,
		notifier: ScheduleNotifier,
	) -> Self {
		Self {
			leases,
			vault,
			connector,
			keys,
			clock,
			policy,
			notifier,
		}
	}

	/// Mint a credential from `library_id` and bind it to the session's slot.
	///
	/// Not idempotent: every successful call mints a new upstream lease.
	#[tracing::instrument(skip(self), fields(library_id = %library_id, session_id = %session_id, purpose = %purpose))]
	pub async fn issue(
		&self,
		library_id: &LibraryId,
		session_id: &SessionId,
		purpose: CredentialPurpose,
	) -> Result<IssuedCredential> {
		let binding_conflict = || CredentialsError::BindingConflict {
			session_id: session_id.clone(),
			library_id: library_id.clone(),
			purpose,
		};

		if self
			.leases
			.get_bound_credential_id(session_id, library_id, purpose)
			.await?
			.is_some()
		{
			return Err(binding_conflict());
		}

		let library = self
			.leases
			.list_private_libraries(std::slice::from_ref(library_id))
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| CredentialsError::NotFound(library_id.to_string()))?;
		let store_id = library.library.store_id.clone();

		let token = match &library.token {
			Some(token) if !token.expiration.is_expired(self.clock.now()) => token,
			_ => return Err(CredentialsError::TokenUnavailable(store_id)),
		};
		let secret_token =
			connection::decrypt_token(self.keys.as_ref(), &token.ciphertext, &token.key_id)?;
		let engine = self
			.connector
			.connect(&connection::for_library(self.keys.as_ref(), &library)?)?;

		let request = LibraryRequest {
			path: library.library.vault_path.clone(),
			method: library.library.http_method,
			body: library.library.http_request_body.clone(),
		};
		let minted = with_timeout(
			self.policy.request_timeout,
			engine.issue_dynamic_secret(&secret_token, &request),
		)
		.await?;

		let now = self.clock.now();
		let credential = NewCredential {
			public_id: CredentialId::generate(),
			library_id: library_id.clone(),
			session_id: session_id.clone(),
			token_hmac: token.token_hmac.clone(),
			external_id: minted.external_id.clone(),
			is_renewable: minted.renewable,
			last_renewal_time: now,
			expiration: expiration_after(now, minted.lease_duration),
		};

		if let Err(e) = self.leases.insert_credential(&credential, now).await {
			tracing::error!(external_id = %minted.external_id, error = %e, "failed to record minted credential, revoking lease");
			self.spawn_revoke(engine, secret_token, minted.external_id, None);
			return Err(e.into());
		}

		let bound = match self
			.leases
			.bind_session_credential(session_id, library_id, purpose, &credential.public_id)
			.await
		{
			Ok(bound) => bound,
			Err(e) => {
				tracing::error!(
					credential_id = %credential.public_id,
					error = %e,
					"failed to bind minted credential, revoking lease"
				);
				self.abandon_unbound(engine, secret_token, minted.external_id, credential.public_id)
					.await;
				return Err(e.into());
			}
		};
		if !bound {
			tracing::warn!(
				credential_id = %credential.public_id,
				"slot filled concurrently, revoking losing lease"
			);
			self.abandon_unbound(engine, secret_token, minted.external_id, credential.public_id)
				.await;
			return Err(binding_conflict());
		}

		tracing::info!(
			credential_id = %credential.public_id,
			store_id = %store_id,
			renewable = minted.renewable,
			"credential issued"
		);
		Ok(IssuedCredential {
			credential_id: credential.public_id,
			library_id: library_id.clone(),
			session_id: session_id.clone(),
			purpose,
			secret: minted.value,
			expiration: credential.expiration.as_option(),
		})
	}

	/// Flag a recorded credential that never made it into its slot and
	/// revoke its lease. Cleanup failures are logged; the caller's error wins.
	async fn abandon_unbound(
		&self,
		engine: Arc<dyn SecretEngine>,
		token: SecretString,
		lease_id: String,
		credential_id: CredentialId,
	) {
		if let Err(e) = self
			.leases
			.update_credential_status(
				&credential_id,
				CredentialStatus::Active,
				CredentialStatus::Revoke,
				self.clock.now(),
			)
			.await
		{
			tracing::warn!(credential_id = %credential_id, error = %e, "failed to flag unbound credential for revocation");
		}
		self.spawn_revoke(engine, token, lease_id, Some(credential_id));
	}

	/// Revoke a lease that must not outlive this call, off the request path.
	///
	/// On success the credential row (if recorded) moves `revoke → revoked`;
	/// otherwise it stays in `revoke` for the scheduler to retry.
	fn spawn_revoke(
		&self,
		engine: Arc<dyn SecretEngine>,
		token: SecretString,
		lease_id: String,
		credential_id: Option<CredentialId>,
	) {
		let leases = self.leases.clone();
		let clock = self.clock.clone();
		let policy = self.policy.clone();

		tokio::spawn(async move {
			for attempt in 1..=BACKGROUND_REVOKE_ATTEMPTS {
				let result = if lease_id.is_empty() {
					Ok(())
				} else {
					with_timeout(policy.request_timeout, engine.revoke_lease(&token, &lease_id)).await
				};
				match result {
					Ok(()) | Err(CredentialsError::EngineRejected(_)) => {
						if let Some(id) = &credential_id {
							if let Err(e) = leases
								.update_credential_status(
									id,
									CredentialStatus::Revoke,
									CredentialStatus::Revoked,
									clock.now(),
								)
								.await
							{
								tracing::warn!(credential_id = %id, error = %e, "failed to mark credential revoked");
							}
						}
						tracing::debug!(lease_id = %lease_id, "orphaned lease revoked");
						return;
					}
					Err(e) if e.is_retryable() && attempt < BACKGROUND_REVOKE_ATTEMPTS => {
						tokio::time::sleep(policy.jittered_backoff(attempt)).await;
					}
					Err(e) => {
						tracing::error!(lease_id = %lease_id, attempt, error = %e, "background lease revocation failed");
						return;
					}
				}
			}
		});
	}

	/// Flag every active credential of the session for revocation. The
	/// scheduler revokes them upstream.
	#[tracing::instrument(skip(self), fields(session_id = %session_id))]
	pub async fn end_session(&self, session_id: &SessionId) -> Result<u64> {
		let marked = self
			.leases
			.mark_session_credentials_for_revocation(session_id, self.clock.now())
			.await?;
		if marked > 0 {
			self.notifier.notify();
		}
		tracing::info!(session_id = %session_id, marked, "session ended");
		Ok(marked)
	}

	pub async fn list_session_credentials(&self, session_id: &SessionId) -> Result<Vec<CredentialRecord>> {
		Ok(self.leases.list_session_credentials(session_id).await?)
	}

	/// Revoke upstream credentials in `revoke` and mark them `revoked`.
	#[tracing::instrument(skip(self))]
	pub async fn revoke_pending_credentials(&self) -> Result<CredentialRevocationReport> {
		let pending = self
			.leases
			.list_credentials_by_status(CredentialStatus::Revoke, REVOCATION_BATCH)
			.await?;
		let mut report = CredentialRevocationReport::default();

		for credential in pending {
			match self.revoke_credential(&credential).await {
				Ok(true) => report.revoked += 1,
				Ok(false) => {}
				Err(e) => {
					report.failed += 1;
					tracing::warn!(
						credential_id = %credential.public_id,
						error = %e,
						"credential revocation failed, will retry"
					);
					// Let later credentials into the next batch.
					if let Err(e) = self
						.leases
						.defer_credential_revocation(&credential.public_id, self.clock.now())
						.await
					{
						tracing::warn!(credential_id = %credential.public_id, error = %e, "failed to requeue credential revocation");
					}
				}
			}
		}
		Ok(report)
	}

	async fn revoke_credential(&self, credential: &CredentialRecord) -> Result<bool> {
		let now = self.clock.now();
		if needs_upstream_revoke(credential, now) {
			let token = self.vault.get_token(&credential.token_hmac).await?;
			match token {
				// The engine revokes child leases together with their token.
				None => {}
				Some(t) if t.status == TokenStatus::Expired || t.expiration.is_expired(now) => {}
				Some(t) => {
					let store = self
						.vault
						.get_store(&t.store_id)
						.await?
						.ok_or_else(|| CredentialsError::NotFound(t.store_id.to_string()))?;
					let certificate = self.vault.get_client_certificate(&t.store_id).await?;
					let engine = self.connector.connect(&connection::for_store(
						self.keys.as_ref(),
						&store,
						certificate.as_ref(),
					)?)?;
					let secret = connection::decrypt_token(self.keys.as_ref(), &t.ciphertext, &t.key_id)?;
					match with_timeout(
						self.policy.request_timeout,
						engine.revoke_lease(&secret, &credential.external_id),
					)
					.await
					{
						Ok(()) => {}
						Err(CredentialsError::TokenInvalid(reason))
						| Err(CredentialsError::EngineRejected(reason)) => {
							tracing::debug!(credential_id = %credential.public_id, reason = %reason, "lease already gone upstream");
						}
						Err(e) => return Err(e),
					}
				}
			}
		}

		Ok(self
			.leases
			.update_credential_status(
				&credential.public_id,
				CredentialStatus::Revoke,
				CredentialStatus::Revoked,
				self.clock.now(),
			)
			.await?)
	}

	/// Mark finite credentials past their expiration as `expired`.
	#[tracing::instrument(skip(self))]
	pub async fn expire_credentials(&self) -> Result<u64> {
		let expired = self.leases.expire_credentials(self.clock.now()).await?;
		if expired > 0 {
			tracing::info!(expired, "credentials expired");
		}
		Ok(expired)
	}
}

/// Leases without an id (static secrets) and leases past expiry have nothing to revoke.
fn needs_upstream_revoke(credential: &CredentialRecord, now: DateTime<Utc>) -> bool {
	!credential.external_id.is_empty() && !credential.expiration.is_expired(now)
}
