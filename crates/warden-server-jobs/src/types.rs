// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Serialize;
use std::time::Duration;
use warden_server_credentials::{CredentialRevocationReport, RenewalReport, RevocationReport};

use crate::error::{Result, SchedulerError};

pub const DEFAULT_MIN_WAKE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAKE_INTERVAL: Duration = Duration::from_secs(300);

/// Bounds on how long the scheduler sleeps between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
	pub min_wake_interval: Duration,
	pub max_wake_interval: Duration,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			min_wake_interval: DEFAULT_MIN_WAKE_INTERVAL,
			max_wake_interval: DEFAULT_MAX_WAKE_INTERVAL,
		}
	}
}

impl SchedulerConfig {
	pub fn validate(&self) -> Result<()> {
		if self.min_wake_interval.is_zero() {
			return Err(SchedulerError::InvalidConfig(
				"min_wake_interval must be positive".to_string(),
			));
		}
		if self.min_wake_interval > self.max_wake_interval {
			return Err(SchedulerError::InvalidConfig(
				"min_wake_interval must not exceed max_wake_interval".to_string(),
			));
		}
		Ok(())
	}
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
	pub tokens_renewed: u32,
	pub tokens_retrying: u32,
	pub tokens_revoked: u32,
	pub tokens_expired: u32,
	/// Tokens expired without upstream revocation after repeated failures.
	pub tokens_abandoned: u32,
	pub credentials_revoked: u32,
	pub credentials_expired: u64,
	/// Items whose processing failed and will be retried by a later tick.
	pub item_failures: u32,
	/// Passes that could not run at all (database errors).
	pub pass_failures: u32,
}

impl TickReport {
	pub(crate) fn add_renewals(&mut self, r: RenewalReport) {
		self.tokens_renewed += r.renewed;
		self.tokens_retrying += r.retrying;
		self.tokens_revoked += r.revoked;
		self.item_failures += r.failed;
	}

	pub(crate) fn add_token_revocations(&mut self, r: RevocationReport) {
		self.tokens_expired += r.expired;
		self.tokens_abandoned += r.abandoned;
		self.item_failures += r.failed + r.abandoned;
	}

	pub(crate) fn add_credential_revocations(&mut self, r: CredentialRevocationReport) {
		self.credentials_revoked += r.revoked;
		self.item_failures += r.failed;
	}

	pub fn has_failures(&self) -> bool {
		self.item_failures > 0 || self.pass_failures > 0
	}
}
