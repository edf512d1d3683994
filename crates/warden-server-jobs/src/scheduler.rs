// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The renewal scheduler.
//!
//! One background task runs a pass over every lifecycle queue, asks the token
//! manager when the next piece of work falls due, and sleeps until then. A
//! [`ScheduleNotifier`] cuts the sleep short whenever a store is created, a
//! token is rotated or a session ends.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use warden_credentials_core::{Clock, StoreId};
use warden_server_credentials::{
	CredentialIssuer, HealthState, ScheduleNotifier, TokenLifecycleManager,
};

use crate::error::{Result, SchedulerError};
use crate::health::{determine_health_state, HealthStatus, LastTickInfo, SchedulerHealth};
use crate::types::{SchedulerConfig, TickReport};

#[derive(Default)]
struct TickState {
	last_tick: Option<LastTickInfo>,
	consecutive_failures: u32,
	next_wake: Option<DateTime<Utc>>,
}

struct Inner {
	lifecycle: Arc<TokenLifecycleManager>,
	issuer: Arc<CredentialIssuer>,
	clock: Arc<dyn Clock>,
	notifier: ScheduleNotifier,
	config: SchedulerConfig,
	state: std::sync::Mutex<TickState>,
}

struct Running {
	cancellation_token: CancellationToken,
	handle: JoinHandle<()>,
}

pub struct RenewalScheduler {
	inner: Arc<Inner>,
	running: Mutex<Option<Running>>,
}

impl RenewalScheduler {
	pub fn new(
		lifecycle: Arc<TokenLifecycleManager>,
		issuer: Arc<CredentialIssuer>,
		clock: Arc<dyn Clock>,
		notifier: ScheduleNotifier,
		config: SchedulerConfig,
	) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			inner: Arc::new(Inner {
				lifecycle,
				issuer,
				clock,
				notifier,
				config,
				state: std::sync::Mutex::new(TickState::default()),
			}),
			running: Mutex::new(None),
		})
	}

	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut running = self.running.lock().await;
		if running.is_some() {
			return Err(SchedulerError::AlreadyRunning);
		}

		let cancellation_token = CancellationToken::new();
		let inner = Arc::clone(&self.inner);
		let token = cancellation_token.clone();
		let handle = tokio::spawn(async move { inner.run(token).await });

		*running = Some(Running {
			cancellation_token,
			handle,
		});
		info!(
			min_wake_secs = self.inner.config.min_wake_interval.as_secs(),
			max_wake_secs = self.inner.config.max_wake_interval.as_secs(),
			"Renewal scheduler started"
		);
		Ok(())
	}

	/// Stop the background task and wait for an in-flight pass to finish.
	#[instrument(skip(self))]
	pub async fn stop(&self) -> Result<()> {
		let running = self
			.running
			.lock()
			.await
			.take()
			.ok_or(SchedulerError::NotRunning)?;

		running.cancellation_token.cancel();
		running
			.handle
			.await
			.map_err(|e| SchedulerError::TaskFailed(e.to_string()))?;

		info!("Renewal scheduler stopped");
		Ok(())
	}

	pub async fn is_running(&self) -> bool {
		self.running.lock().await.is_some()
	}

	/// Run one pass immediately, outside the background loop.
	pub async fn tick(&self) -> TickReport {
		self.inner.tick().await
	}

	pub async fn health(&self) -> SchedulerHealth {
		let running = self.is_running().await;
		let state = self.inner.lock_state();
		SchedulerHealth {
			status: determine_health_state(state.last_tick.as_ref(), state.consecutive_failures),
			running,
			last_tick: state.last_tick.clone(),
			consecutive_failures: state.consecutive_failures,
			next_wake: state.next_wake,
		}
	}

	/// Scheduler health combined with the health of each store.
	///
	/// Stores that cannot be inspected are reported in the log and skipped.
	#[instrument(skip(self, store_ids))]
	pub async fn health_status(&self, store_ids: &[StoreId]) -> HealthStatus {
		let scheduler = self.health().await;
		let mut status = scheduler.status;
		let mut stores = Vec::with_capacity(store_ids.len());

		for store_id in store_ids {
			match self.inner.lifecycle.store_health(store_id).await {
				Ok(health) => {
					status = status.worst(health.status);
					stores.push(health);
				}
				Err(e) => {
					warn!(store_id = %store_id, error = %e, "Failed to read store health");
					status = status.worst(HealthState::Degraded);
				}
			}
		}

		HealthStatus {
			status,
			scheduler,
			stores,
		}
	}
}

impl Inner {
	fn lock_state(&self) -> std::sync::MutexGuard<'_, TickState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	async fn run(&self, cancellation_token: CancellationToken) {
		loop {
			self.tick().await;
			let sleep = self.next_sleep().await;

			tokio::select! {
				biased;
				_ = cancellation_token.cancelled() => break,
				_ = self.notifier.notified() => {}
				_ = tokio::time::sleep(sleep) => {}
			}
		}
		info!("Renewal scheduler loop exited");
	}

	async fn next_sleep(&self) -> Duration {
		let now = self.clock.now();
		let next_due = match self.lifecycle.next_renewal_due().await {
			Ok(due) => due,
			Err(e) => {
				error!(error = %e, "Failed to compute next renewal time");
				None
			}
		};
		let sleep = compute_sleep(now, next_due, &self.config);
		self.lock_state().next_wake = chrono::Duration::from_std(sleep)
			.ok()
			.and_then(|d| now.checked_add_signed(d));
		sleep
	}

	#[instrument(skip(self))]
	async fn tick(&self) -> TickReport {
		let started_at = self.clock.now();
		let started = std::time::Instant::now();
		let mut report = TickReport::default();

		match self.lifecycle.renew_due_tokens().await {
			Ok(r) => report.add_renewals(r),
			Err(e) => {
				report.pass_failures += 1;
				error!(error = %e, "Token renewal pass failed");
			}
		}
		match self.lifecycle.revoke_pending_tokens().await {
			Ok(r) => report.add_token_revocations(r),
			Err(e) => {
				report.pass_failures += 1;
				error!(error = %e, "Token revocation pass failed");
			}
		}
		match self.issuer.revoke_pending_credentials().await {
			Ok(r) => report.add_credential_revocations(r),
			Err(e) => {
				report.pass_failures += 1;
				error!(error = %e, "Credential revocation pass failed");
			}
		}
		match self.issuer.expire_credentials().await {
			Ok(n) => report.credentials_expired = n,
			Err(e) => {
				report.pass_failures += 1;
				error!(error = %e, "Credential expiration pass failed");
			}
		}

		let mut state = self.lock_state();
		if report.has_failures() {
			state.consecutive_failures += 1;
			warn!(
				?report,
				consecutive_failures = state.consecutive_failures,
				"Scheduler tick finished with failures"
			);
		} else {
			state.consecutive_failures = 0;
		}
		state.last_tick = Some(LastTickInfo {
			started_at,
			duration_ms: started.elapsed().as_millis() as i64,
			report,
		});
		report
	}
}

/// How long to sleep before the next pass, clamped to the configured bounds.
pub fn compute_sleep(
	now: DateTime<Utc>,
	next_due: Option<DateTime<Utc>>,
	config: &SchedulerConfig,
) -> Duration {
	let until = match next_due {
		None => return config.max_wake_interval,
		Some(due) => (due - now).to_std().unwrap_or(Duration::ZERO),
	};
	until.clamp(config.min_wake_interval, config.max_wake_interval)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration as ChronoDuration;
	use warden_common_secret::SecretString;
	use warden_credentials_core::{CredentialPurpose, EngineError, TokenStatus};
	use warden_server_credentials::testing::{eventually, TestHarness};
	use warden_server_credentials::CredentialsError;
	use warden_server_db::testing::t0;

	fn scheduler(h: &TestHarness) -> RenewalScheduler {
		RenewalScheduler::new(
			Arc::new(h.lifecycle()),
			Arc::new(h.issuer()),
			h.clock(),
			h.notifier.clone(),
			SchedulerConfig::default(),
		)
		.unwrap()
	}

	#[test]
	fn sleep_is_clamped() {
		let config = SchedulerConfig::default();
		let now = t0();

		assert_eq!(compute_sleep(now, None, &config), Duration::from_secs(300));
		assert_eq!(
			compute_sleep(now, Some(now + ChronoDuration::seconds(42)), &config),
			Duration::from_secs(42)
		);
		assert_eq!(
			compute_sleep(now, Some(now + ChronoDuration::hours(2)), &config),
			Duration::from_secs(300)
		);
		assert_eq!(
			compute_sleep(now, Some(now - ChronoDuration::seconds(10)), &config),
			Duration::from_secs(1)
		);
		assert_eq!(
			compute_sleep(now, Some(now + ChronoDuration::milliseconds(200)), &config),
			Duration::from_secs(1)
		);
	}

	#[tokio::test]
	async fn invalid_config_is_rejected_at_construction() {
		let h = TestHarness::new().await;
		let result = RenewalScheduler::new(
			Arc::new(h.lifecycle()),
			Arc::new(h.issuer()),
			h.clock(),
			h.notifier.clone(),
			SchedulerConfig {
				min_wake_interval: Duration::from_secs(600),
				max_wake_interval: Duration::from_secs(60),
			},
		);
		assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
	}

	#[tokio::test]
	async fn tick_renews_only_after_midpoint() {
		let h = TestHarness::new().await;
		h.seed_store(Some(3600)).await;
		let scheduler = scheduler(&h);

		let report = scheduler.tick().await;
		assert_eq!(report, TickReport::default());
		assert_eq!(h.engine.renew_calls(), 0);

		h.clock.advance(ChronoDuration::seconds(1800));
		let report = scheduler.tick().await;
		assert_eq!(report.tokens_renewed, 1);
		assert_eq!(h.engine.renew_calls(), 1);

		let health = scheduler.health().await;
		assert_eq!(health.status, HealthState::Healthy);
		assert!(!health.running);
		assert_eq!(health.last_tick.unwrap().started_at, t0() + ChronoDuration::seconds(1800));
	}

	#[tokio::test]
	async fn start_and_stop_are_guarded() {
		let h = TestHarness::new().await;
		let scheduler = scheduler(&h);

		assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
		scheduler.start().await.unwrap();
		assert!(scheduler.is_running().await);
		assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

		scheduler.stop().await.unwrap();
		assert!(!scheduler.is_running().await);
		assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
	}

	#[tokio::test]
	async fn notification_wakes_the_loop() {
		let h = TestHarness::new().await;
		h.seed_store(Some(3600)).await;
		let scheduler = scheduler(&h);
		scheduler.start().await.unwrap();

		// First pass runs immediately and finds nothing due.
		assert!(eventually(|| async { scheduler.health().await.last_tick.is_some() }).await);
		assert_eq!(h.engine.renew_calls(), 0);

		h.clock.advance(ChronoDuration::seconds(1800));
		h.notifier.notify();
		assert!(eventually(|| async { h.engine.renew_calls() == 1 }).await);

		let health = scheduler.health().await;
		assert!(health.running);
		assert!(health.next_wake.is_some());
		scheduler.stop().await.unwrap();
	}

	#[tokio::test]
	async fn repeated_failures_degrade_then_fail_health() {
		let h = TestHarness::new().await;
		let store = h.seed_store(Some(3600)).await;
		h.service()
			.rotate_token(&store.public_id, &SecretString::new("hvs.rotated".into()))
			.await
			.unwrap();
		let scheduler = scheduler(&h);

		for _ in 0..3 {
			h.engine.push_revoke_token(Err(EngineError::Transient("503".into())));
		}

		scheduler.tick().await;
		assert_eq!(scheduler.health().await.status, HealthState::Degraded);
		// Each retry waits out the revocation backoff.
		h.clock.advance(ChronoDuration::seconds(11));
		scheduler.tick().await;
		h.clock.advance(ChronoDuration::seconds(22));
		scheduler.tick().await;
		let health = scheduler.health().await;
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.consecutive_failures, 3);

		h.clock.advance(ChronoDuration::seconds(44));
		let report = scheduler.tick().await;
		assert_eq!(report.tokens_expired, 1);
		let health = scheduler.health().await;
		assert_eq!(health.status, HealthState::Healthy);
		assert_eq!(health.consecutive_failures, 0);
	}

	#[tokio::test]
	async fn exhausted_renewals_leave_store_without_token() {
		let h = TestHarness::new().await;
		let store = h.seed_store(Some(3600)).await;
		let library = h.seed_library(&store.public_id).await;
		let scheduler = scheduler(&h);
		h.clock.advance(ChronoDuration::seconds(1800));

		for _ in 0..5 {
			h.engine.push_renew(Err(EngineError::Transient("connection reset".into())));
		}
		let mut revoked = 0;
		let mut expired = 0;
		for _ in 0..5 {
			let report = scheduler.tick().await;
			revoked += report.tokens_revoked;
			expired += report.tokens_expired;
			h.clock.advance(ChronoDuration::seconds(301));
		}
		assert_eq!(revoked, 1);
		assert_eq!(expired, 1);

		let tokens = h.vault.list_tokens_for_store(&store.public_id).await.unwrap();
		assert_eq!(tokens.len(), 1);
		assert_eq!(tokens[0].status, TokenStatus::Expired);

		let session = h.open_slot(&library, CredentialPurpose::Brokered).await;
		let err = h
			.issuer()
			.issue(&library, &session, CredentialPurpose::Brokered)
			.await
			.unwrap_err();
		assert!(matches!(err, CredentialsError::TokenUnavailable(_)));

		let status = scheduler.health_status(&[store.public_id.clone()]).await;
		assert_eq!(status.status, HealthState::Unhealthy);
		assert_eq!(status.stores.len(), 1);
	}

	#[tokio::test]
	async fn ended_session_credentials_are_revoked_on_tick() {
		let h = TestHarness::new().await;
		let store = h.seed_store(Some(3600)).await;
		let library = h.seed_library(&store.public_id).await;
		let issuer = h.issuer();
		let session = h.open_slot(&library, CredentialPurpose::Brokered).await;
		issuer
			.issue(&library, &session, CredentialPurpose::Brokered)
			.await
			.unwrap();
		assert_eq!(issuer.end_session(&session).await.unwrap(), 1);

		let report = scheduler(&h).tick().await;
		assert_eq!(report.credentials_revoked, 1);
		assert_eq!(h.engine.revoked_leases(), vec!["database/creds/app/lease-1".to_string()]);
	}
}
