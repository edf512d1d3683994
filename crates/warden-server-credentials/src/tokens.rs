// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Engine token lifecycle.
//!
//! ```text
//!   current ──claim──► maintaining ──renewed──► current
//!      │                  │  ▲
//!      │                  │  └── transient failure (backoff, retry)
//!      │                  ▼
//!      └──rotate──────► revoke ──revoked upstream / past expiry──► expired
//!                           │  ▲
//!                           └──┘ failed revocation (backoff, retry up to the ceiling)
//! ```
//!
//! Every transition is a conditional update in the database; when two
//! workers race for the same token exactly one of them sees its update
//! applied and the other skips the token.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use warden_common_secret::SecretString;
use warden_credentials_core::{
	expiration_after, renewal_due, ClientIdentity, Clock, EngineConnector, SecretEngine, StoreId,
	TokenLease, TokenStatus,
};
use warden_server_db::{NewToken, StoreSettings, TokenRecord, VaultStore};

use crate::connection::{self, token_label, with_timeout};
use crate::error::{CredentialsError, Result};
use crate::health::{HealthState, StoreHealth};
use crate::keys::KeyService;
use crate::notify::ScheduleNotifier;
use crate::policy::{to_chrono, RenewalPolicy};

/// What happened to one token during a renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
	Renewed,
	/// Failed transiently; left in `maintaining` until its backoff elapses.
	Retrying,
	/// Given up on and moved to `revoke`.
	Revoked,
	/// Another worker holds the token, or it changed state underneath us.
	Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
	pub renewed: u32,
	pub retrying: u32,
	pub revoked: u32,
	pub skipped: u32,
	/// Tokens whose attempt could not be recorded at all (database errors).
	pub failed: u32,
}

impl RenewalReport {
	fn record(&mut self, outcome: RenewalOutcome) {
		match outcome {
			RenewalOutcome::Renewed => self.renewed += 1,
			RenewalOutcome::Retrying => self.retrying += 1,
			RenewalOutcome::Revoked => self.revoked += 1,
			RenewalOutcome::Skipped => self.skipped += 1,
		}
	}
}

/// What happened to one token during a revocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationOutcome {
	/// Revoked upstream (or already unusable) and moved to `expired`.
	Expired,
	/// Failed; left in `revoke` until its backoff elapses.
	Deferred,
	/// Failed at the retry ceiling and moved to `expired` without upstream revocation.
	Abandoned,
	/// Another worker finished the token first.
	Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevocationReport {
	pub expired: u32,
	pub abandoned: u32,
	/// Attempts that failed upstream or could not be recorded.
	pub failed: u32,
}

impl RevocationReport {
	fn record(&mut self, outcome: RevocationOutcome) {
		match outcome {
			RevocationOutcome::Expired => self.expired += 1,
			RevocationOutcome::Deferred => self.failed += 1,
			RevocationOutcome::Abandoned => self.abandoned += 1,
			RevocationOutcome::Skipped => {}
		}
	}
}

/// When the scheduler should next renew `token`.
///
/// `None` for tokens that never expire and for tokens outside the renewal
/// cycle (`revoke`, `expired`).
pub fn token_due_at(token: &TokenRecord, policy: &RenewalPolicy) -> Option<DateTime<Utc>> {
	match token.status {
		TokenStatus::Current => renewal_due(token.last_renewal_time, &token.expiration),
		TokenStatus::Maintaining => match token.claimed_at {
			// In flight; only reclaimable once the claim goes stale.
			Some(claimed_at) => claimed_at.checked_add_signed(to_chrono(policy.stale_claim_after)),
			None => token
				.next_renewal_attempt
				.or_else(|| renewal_due(token.last_renewal_time, &token.expiration))
				.or(Some(token.last_renewal_time)),
		},
		TokenStatus::Revoke | TokenStatus::Expired => None,
	}
}

/// When a `revoke` token should next be revoked: right away, or after the
/// backoff of a failed attempt unless it expires first.
pub fn revocation_due_at(token: &TokenRecord, now: DateTime<Utc>) -> DateTime<Utc> {
	match (token.next_renewal_attempt, token.expiration.as_option()) {
		(Some(next), Some(expires)) => next.min(expires),
		(Some(next), None) => next,
		(None, _) => now,
	}
}

pub struct TokenLifecycleManager {
	vault: Arc<dyn VaultStore>,
	connector: Arc<dyn EngineConnector>,
	keys: Arc<dyn KeyService>,
	clock: Arc<dyn Clock>,
	policy: RenewalPolicy,
	notifier: ScheduleNotifier,
}

impl TokenLifecycleManager {
	pub fn new(
		vault: Arc<dyn VaultStore>,
		connector: Arc<dyn EngineConnector>,
		keys: Arc<dyn KeyService>,
		clock: Arc<dyn Clock>,
		policy: RenewalPolicy,
		notifier: ScheduleNotifier,
	) -> Self {
		Self {
			vault,
			connector,
			keys,
			clock,
			policy,
			notifier,
		}
	}

	pub fn policy(&self) -> &RenewalPolicy {
		&self.policy
	}

	/// Wake the scheduler so it recomputes its next deadline.
	pub fn notify_schedule_changed(&self) {
		self.notifier.notify();
	}

	/// Open an engine connection for settings that are not stored yet.
	pub(crate) fn connect(
		&self,
		settings: &StoreSettings,
		client_identity: Option<ClientIdentity>,
	) -> Result<Arc<dyn SecretEngine>> {
		let conn = connection::for_settings(settings, client_identity);
		Ok(self.connector.connect(&conn)?)
	}

	/// Look `token` up with the engine and seal it for storage.
	///
	/// Rejects tokens that will expire but cannot be renewed. Tokens without
	/// a ttl are stored with no expiration and never scheduled.
	pub(crate) async fn prepare_token(
		&self,
		engine: &dyn SecretEngine,
		token: &SecretString,
	) -> Result<NewToken> {
		if token.is_blank() {
			return Err(CredentialsError::Validation("token must not be empty".into()));
		}

		let TokenLease { ttl, renewable } =
			with_timeout(self.policy.request_timeout, engine.lookup_token(token)).await?;
		let now = self.clock.now();
		let expiration = expiration_after(now, ttl);
		if expiration.is_finite() && !renewable {
			return Err(CredentialsError::Validation(
				"token is not renewable and would expire".into(),
			));
		}

		let plaintext = token.expose().as_bytes();
		let sealed = self.keys.encrypt(plaintext)?;
		Ok(NewToken {
			token_hmac: self.keys.hmac(plaintext),
			ciphertext: sealed.ciphertext,
			key_id: sealed.key_id,
			last_renewal_time: now,
			expiration,
		})
	}

	async fn engine_for_store(&self, store_id: &StoreId) -> Result<Arc<dyn SecretEngine>> {
		let store = self
			.vault
			.get_store(store_id)
			.await?
			.ok_or_else(|| CredentialsError::NotFound(store_id.to_string()))?;
		let certificate = self.vault.get_client_certificate(store_id).await?;
		let conn = connection::for_store(self.keys.as_ref(), &store, certificate.as_ref())?;
		Ok(self.connector.connect(&conn)?)
	}

	/// Replace the store's token. Current and in-flight tokens move to
	/// `revoke` and are revoked upstream by the next revocation pass.
	#[tracing::instrument(skip(self, token), fields(store_id = %store_id))]
	pub async fn rotate_token(&self, store_id: &StoreId, token: &SecretString) -> Result<()> {
		if token.is_blank() {
			return Err(CredentialsError::Validation("token must not be empty".into()));
		}
		let engine = self.engine_for_store(store_id).await?;
		let new_token = self.prepare_token(engine.as_ref(), token).await?;

		let superseded = self
			.vault
			.rotate_token(store_id, &new_token, self.clock.now())
			.await?;
		self.notify_schedule_changed();

		tracing::info!(
			store_id = %store_id,
			token = %token_label(&new_token.token_hmac),
			superseded,
			"store token rotated"
		);
		Ok(())
	}

	/// Earliest instant the scheduler has work to do, `None` if there is none.
	#[tracing::instrument(skip(self))]
	pub async fn next_renewal_due(&self) -> Result<Option<DateTime<Utc>>> {
		let now = self.clock.now();
		let revocations = self.vault.list_tokens_by_status(TokenStatus::Revoke).await?;
		let renewals = self.vault.list_renewable_tokens().await?;

		let next_revocation = revocations.iter().map(|t| revocation_due_at(t, now)).min();
		let next_renewal = renewals
			.iter()
			.filter_map(|t| token_due_at(t, &self.policy))
			.min();
		Ok(next_revocation.into_iter().chain(next_renewal).min())
	}

	/// Renew every usable token whose renewal is due.
	#[tracing::instrument(skip(self))]
	pub async fn renew_due_tokens(&self) -> Result<RenewalReport> {
		let now = self.clock.now();
		let tokens = self.vault.list_renewable_tokens().await?;
		let mut report = RenewalReport::default();

		for token in tokens {
			match token_due_at(&token, &self.policy) {
				Some(due) if due <= now => {}
				_ => continue,
			}
			match self.renew(&token).await {
				Ok(outcome) => report.record(outcome),
				Err(e) => {
					report.failed += 1;
					tracing::error!(
						store_id = %token.store_id,
						token = %token_label(&token.token_hmac),
						error = %e,
						"failed to record token renewal"
					);
				}
			}
		}

		if report != RenewalReport::default() {
			tracing::debug!(?report, "token renewal pass finished");
		}
		Ok(report)
	}

	/// Claim `token` and renew it with the engine.
	///
	/// Engine failures are absorbed into the returned outcome; only failures
	/// to record the outcome are returned as errors.
	#[tracing::instrument(skip(self, token), fields(store_id = %token.store_id, token = %token_label(&token.token_hmac)))]
	pub async fn renew(&self, token: &TokenRecord) -> Result<RenewalOutcome> {
		// The claim time doubles as the fence for every later transition.
		let now = self.clock.now();
		let claimed = match token.status {
			TokenStatus::Current => self.vault.claim_token_for_renewal(&token.token_hmac, now).await?,
			TokenStatus::Maintaining => {
				self.vault
					.reclaim_token_for_retry(&token.token_hmac, self.policy.stale_before(now), now)
					.await?
			}
			TokenStatus::Revoke | TokenStatus::Expired => false,
		};
		if !claimed {
			tracing::debug!("token claimed elsewhere, skipping");
			return Ok(RenewalOutcome::Skipped);
		}

		let attempt = token.renewal_attempts.saturating_add(1);
		match self.call_renew(token).await {
			Ok(lease) => {
				let renewed_at = self.clock.now();
				let expiration = expiration_after(renewed_at, lease.ttl);
				if !self
					.vault
					.complete_token_renewal(&token.token_hmac, now, renewed_at, &expiration, renewed_at)
					.await?
				{
					tracing::info!("token superseded or taken over during renewal");
					return Ok(RenewalOutcome::Skipped);
				}
				tracing::info!(expiration = ?expiration.as_option(), "token renewed");
				Ok(RenewalOutcome::Renewed)
			}
			Err(CredentialsError::TokenInvalid(reason)) => {
				tracing::warn!(reason = %reason, "engine no longer accepts token");
				self.give_up(token, now).await
			}
			Err(e) if self.policy.is_exhausted(attempt) => {
				tracing::error!(attempt, error = %e, "token renewal retry ceiling reached");
				self.give_up(token, now).await
			}
			Err(e) => {
				let next_attempt = self.policy.next_attempt_at(self.clock.now(), attempt);
				if !self
					.vault
					.release_token_claim(&token.token_hmac, now, next_attempt, self.clock.now())
					.await?
				{
					tracing::info!("token superseded or taken over during renewal");
					return Ok(RenewalOutcome::Skipped);
				}
				tracing::warn!(attempt, %next_attempt, error = %e, "token renewal failed, will retry");
				Ok(RenewalOutcome::Retrying)
			}
		}
	}

	async fn call_renew(&self, token: &TokenRecord) -> Result<TokenLease> {
		let engine = self.engine_for_store(&token.store_id).await?;
		let secret = connection::decrypt_token(self.keys.as_ref(), &token.ciphertext, &token.key_id)?;
		with_timeout(self.policy.request_timeout, engine.renew_token(&secret)).await
	}

	async fn give_up(&self, token: &TokenRecord, claimed_at: DateTime<Utc>) -> Result<RenewalOutcome> {
		if self
			.vault
			.revoke_claimed_token(&token.token_hmac, claimed_at, self.clock.now())
			.await?
		{
			Ok(RenewalOutcome::Revoked)
		} else {
			Ok(RenewalOutcome::Skipped)
		}
	}

	/// Revoke upstream every due token in `revoke` and move it to `expired`.
	///
	/// Tokens already past their expiration are expired without an engine
	/// call. A failed revocation backs off like a failed renewal; at the
	/// retry ceiling the token is abandoned and expired anyway.
	#[tracing::instrument(skip(self))]
	pub async fn revoke_pending_tokens(&self) -> Result<RevocationReport> {
		let now = self.clock.now();
		let tokens = self.vault.list_tokens_by_status(TokenStatus::Revoke).await?;
		let mut report = RevocationReport::default();

		for token in tokens {
			if revocation_due_at(&token, now) > now {
				continue;
			}
			match self.revoke(&token).await {
				Ok(outcome) => report.record(outcome),
				Err(e) => {
					report.failed += 1;
					tracing::error!(
						store_id = %token.store_id,
						token = %token_label(&token.token_hmac),
						error = %e,
						"failed to record token revocation"
					);
				}
			}
		}
		Ok(report)
	}

	/// Revoke `token` upstream and expire it.
	///
	/// Failures are absorbed into the returned outcome; only failures to
	/// record the outcome are returned as errors.
	#[tracing::instrument(skip(self, token), fields(store_id = %token.store_id, token = %token_label(&token.token_hmac)))]
	pub async fn revoke(&self, token: &TokenRecord) -> Result<RevocationOutcome> {
		if !token.expiration.is_expired(self.clock.now()) {
			match self.call_revoke(token).await {
				Ok(()) => {}
				Err(CredentialsError::TokenInvalid(reason)) => {
					tracing::debug!(reason = %reason, "token already invalid upstream");
				}
				Err(e) => return self.defer_revocation(token, e).await,
			}
		}

		if !self
			.vault
			.mark_token_expired(&token.token_hmac, self.clock.now())
			.await?
		{
			return Ok(RevocationOutcome::Skipped);
		}
		tracing::info!("token revoked");
		Ok(RevocationOutcome::Expired)
	}

	async fn call_revoke(&self, token: &TokenRecord) -> Result<()> {
		let engine = self.engine_for_store(&token.store_id).await?;
		let secret = connection::decrypt_token(self.keys.as_ref(), &token.ciphertext, &token.key_id)?;
		with_timeout(self.policy.request_timeout, engine.revoke_token(&secret)).await
	}

	async fn defer_revocation(
		&self,
		token: &TokenRecord,
		error: CredentialsError,
	) -> Result<RevocationOutcome> {
		let attempt = token.renewal_attempts.saturating_add(1);
		let now = self.clock.now();

		if self.policy.is_exhausted(attempt) {
			tracing::error!(attempt, error = %error, "token revocation retry ceiling reached, abandoning token");
			return Ok(if self.vault.mark_token_expired(&token.token_hmac, now).await? {
				RevocationOutcome::Abandoned
			} else {
				RevocationOutcome::Skipped
			});
		}

		let next_attempt = self.policy.next_attempt_at(now, attempt);
		if !self
			.vault
			.defer_token_revocation(&token.token_hmac, next_attempt, now)
			.await?
		{
			return Ok(RevocationOutcome::Skipped);
		}
		tracing::warn!(attempt, %next_attempt, error = %error, "token revocation failed, will retry");
		Ok(RevocationOutcome::Deferred)
	}

	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn store_health(&self, store_id: &StoreId) -> Result<StoreHealth> {
		if self.vault.get_store(store_id).await?.is_none() {
			return Err(CredentialsError::NotFound(store_id.to_string()));
		}
		let now = self.clock.now();
		let tokens = self.vault.list_tokens_for_store(store_id).await?;
		let pending_revocations = tokens
			.iter()
			.filter(|t| t.status == TokenStatus::Revoke)
			.count() as u32;

		let usable = tokens.iter().find(|t| t.status.is_usable());
		let status = match usable {
			None => HealthState::Unhealthy,
			Some(t) if t.expiration.is_expired(now) => HealthState::Unhealthy,
			Some(t) if t.renewal_attempts > 0 => HealthState::Degraded,
			Some(_) => HealthState::Healthy,
		};

		Ok(StoreHealth {
			store_id: store_id.clone(),
			status,
			token_status: usable.map(|t| t.status),
			renewal_attempts: usable.map(|t| t.renewal_attempts).unwrap_or(0),
			expiration: usable.and_then(|t| t.expiration.as_option()),
			next_renewal_due: usable.and_then(|t| token_due_at(t, &self.policy)),
			pending_revocations,
		})
	}
}
