// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_RETRY_CEILING: u32 = 5;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);
pub const DEFAULT_STALE_CLAIM_AFTER: Duration = Duration::from_secs(120);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_FACTOR: f64 = 2.0;
const MAX_JITTER_FRACTION: f64 = 0.1;

/// Tunables for renewal retries and engine calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalPolicy {
	/// Failed renewal attempts after which a token is given up and revoked.
	pub retry_ceiling: u32,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
	/// A `maintaining` claim older than this is assumed abandoned.
	pub stale_claim_after: Duration,
	/// Upper bound on every engine call.
	pub request_timeout: Duration,
}

impl Default for RenewalPolicy {
	fn default() -> Self {
		Self {
			retry_ceiling: DEFAULT_RETRY_CEILING,
			base_backoff: DEFAULT_BASE_BACKOFF,
			max_backoff: DEFAULT_MAX_BACKOFF,
			stale_claim_after: DEFAULT_STALE_CLAIM_AFTER,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

impl RenewalPolicy {
	/// Delay before retry number `attempt` (1-based), without jitter.
	pub fn backoff_delay(&self, attempt: u32) -> Duration {
		let exponent = attempt.max(1).saturating_sub(1).min(63) as i32;
		let delay = self.base_backoff.as_secs_f64() * RETRY_FACTOR.powi(exponent);
		let capped = delay.min(self.max_backoff.as_secs_f64());
		Duration::from_secs_f64(capped.max(0.0))
	}

	/// [`backoff_delay`](Self::backoff_delay) plus up to 10% random jitter.
	pub fn jittered_backoff(&self, attempt: u32) -> Duration {
		let delay = self.backoff_delay(attempt);
		delay + delay.mul_f64(fastrand::f64() * MAX_JITTER_FRACTION)
	}

	/// When a failed attempt number `attempt` may be retried.
	pub fn next_attempt_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
		now.checked_add_signed(to_chrono(self.jittered_backoff(attempt)))
			.unwrap_or(DateTime::<Utc>::MAX_UTC)
	}

	/// Claims taken at or before this instant are abandoned.
	pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
		now.checked_sub_signed(to_chrono(self.stale_claim_after))
			.unwrap_or(DateTime::<Utc>::MIN_UTC)
	}

	pub fn is_exhausted(&self, attempts: u32) -> bool {
		attempts >= self.retry_ceiling
	}
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
	chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn backoff_doubles_until_capped() {
		let policy = RenewalPolicy::default();
		assert_eq!(policy.backoff_delay(1), Duration::from_secs(5));
		assert_eq!(policy.backoff_delay(2), Duration::from_secs(10));
		assert_eq!(policy.backoff_delay(3), Duration::from_secs(20));
		assert_eq!(policy.backoff_delay(7), Duration::from_secs(300));
		assert_eq!(policy.backoff_delay(1000), Duration::from_secs(300));
	}

	#[test]
	fn attempt_zero_is_treated_as_first() {
		let policy = RenewalPolicy::default();
		assert_eq!(policy.backoff_delay(0), policy.backoff_delay(1));
	}

	#[test]
	fn ceiling_is_inclusive() {
		let policy = RenewalPolicy::default();
		assert!(!policy.is_exhausted(4));
		assert!(policy.is_exhausted(5));
	}

	proptest! {
		#[test]
		fn jitter_stays_within_ten_percent(attempt in 1u32..20) {
			let policy = RenewalPolicy::default();
			let base = policy.backoff_delay(attempt);
			let jittered = policy.jittered_backoff(attempt);
			prop_assert!(jittered >= base);
			prop_assert!(jittered <= base + base.mul_f64(MAX_JITTER_FRACTION));
		}
	}
}
