// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Token renewal and scheduler tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenewalConfigLayer {
	pub min_wake_interval_secs: Option<u64>,
	pub max_wake_interval_secs: Option<u64>,
	pub retry_ceiling: Option<u32>,
	pub base_backoff_secs: Option<u64>,
	pub max_backoff_secs: Option<u64>,
	pub stale_claim_secs: Option<u64>,
}

impl RenewalConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.min_wake_interval_secs.is_some() {
			self.min_wake_interval_secs = other.min_wake_interval_secs;
		}
		if other.max_wake_interval_secs.is_some() {
			self.max_wake_interval_secs = other.max_wake_interval_secs;
		}
		if other.retry_ceiling.is_some() {
			self.retry_ceiling = other.retry_ceiling;
		}
		if other.base_backoff_secs.is_some() {
			self.base_backoff_secs = other.base_backoff_secs;
		}
		if other.max_backoff_secs.is_some() {
			self.max_backoff_secs = other.max_backoff_secs;
		}
		if other.stale_claim_secs.is_some() {
			self.stale_claim_secs = other.stale_claim_secs;
		}
	}

	pub fn finalize(self) -> RenewalConfig {
		let defaults = RenewalConfig::default();
		RenewalConfig {
			min_wake_interval_secs: self
				.min_wake_interval_secs
				.unwrap_or(defaults.min_wake_interval_secs),
			max_wake_interval_secs: self
				.max_wake_interval_secs
				.unwrap_or(defaults.max_wake_interval_secs),
			retry_ceiling: self.retry_ceiling.unwrap_or(defaults.retry_ceiling),
			base_backoff_secs: self.base_backoff_secs.unwrap_or(defaults.base_backoff_secs),
			max_backoff_secs: self.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
			stale_claim_secs: self.stale_claim_secs.unwrap_or(defaults.stale_claim_secs),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenewalConfig {
	pub min_wake_interval_secs: u64,
	pub max_wake_interval_secs: u64,
	/// Failed renewal attempts before a token is given up and revoked.
	pub retry_ceiling: u32,
	pub base_backoff_secs: u64,
	pub max_backoff_secs: u64,
	/// Age after which an unresolved renewal claim may be taken over.
	pub stale_claim_secs: u64,
}

impl Default for RenewalConfig {
	fn default() -> Self {
		Self {
			min_wake_interval_secs: 1,
			max_wake_interval_secs: 300,
			retry_ceiling: 5,
			base_backoff_secs: 5,
			max_backoff_secs: 300,
			stale_claim_secs: 120,
		}
	}
}

impl RenewalConfig {
	pub fn min_wake_interval(&self) -> Duration {
		Duration::from_secs(self.min_wake_interval_secs)
	}

	pub fn max_wake_interval(&self) -> Duration {
		Duration::from_secs(self.max_wake_interval_secs)
	}

	pub fn base_backoff(&self) -> Duration {
		Duration::from_secs(self.base_backoff_secs)
	}

	pub fn max_backoff(&self) -> Duration {
		Duration::from_secs(self.max_backoff_secs)
	}

	pub fn stale_claim(&self) -> Duration {
		Duration::from_secs(self.stale_claim_secs)
	}
}
