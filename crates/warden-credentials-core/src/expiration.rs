// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Expiration clock for tokens and leases.
//!
//! A token or lease is either bounded by an absolute instant or never expires.
//! Renewal is due at the midpoint between the last renewal and expiry, which
//! leaves half the lease as margin for engine outages.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// When a token or lease stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
	At(DateTime<Utc>),
	Never,
}

impl Expiration {
	/// Build from a nullable column value; `None` means the lease never expires.
	pub fn from_option(at: Option<DateTime<Utc>>) -> Self {
		match at {
			Some(at) => Expiration::At(at),
			None => Expiration::Never,
		}
	}

	pub fn as_option(&self) -> Option<DateTime<Utc>> {
		match self {
			Expiration::At(at) => Some(*at),
			Expiration::Never => None,
		}
	}

	pub fn is_finite(&self) -> bool {
		matches!(self, Expiration::At(_))
	}

	/// True when `now` is at or past the expiration instant.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		match self {
			Expiration::At(at) => now >= *at,
			Expiration::Never => false,
		}
	}

	/// Lifetime left at `now`. Zero once expired, `None` when the lease never expires.
	pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
		match self {
			Expiration::At(at) => Some((*at - now).to_std().unwrap_or(Duration::ZERO)),
			Expiration::Never => None,
		}
	}
}

/// Expiration for a lease granted at `now` with the given ttl.
///
/// A missing ttl, or a ttl of zero, denotes a lease that never expires.
pub fn expiration_after(now: DateTime<Utc>, ttl: Option<Duration>) -> Expiration {
	match ttl {
		Some(ttl) if !ttl.is_zero() => match ChronoDuration::from_std(ttl) {
			Ok(ttl) => now
				.checked_add_signed(ttl)
				.map(Expiration::At)
				.unwrap_or(Expiration::Never),
			Err(_) => Expiration::Never,
		},
		_ => Expiration::Never,
	}
}

/// The instant a token renewed at `last_renewal` becomes due for renewal again.
///
/// Returns `None` for tokens that never expire; they are never scheduled.
pub fn renewal_due(last_renewal: DateTime<Utc>, expiration: &Expiration) -> Option<DateTime<Utc>> {
	match expiration {
		Expiration::At(at) => {
			if *at <= last_renewal {
				return Some(*at);
			}
			Some(last_renewal + (*at - last_renewal) / 2)
		}
		Expiration::Never => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use proptest::prelude::*;

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
	}

	#[test]
	fn midpoint_of_hour_lease() {
		let exp = Expiration::At(t0() + ChronoDuration::hours(1));
		assert_eq!(
			renewal_due(t0(), &exp),
			Some(t0() + ChronoDuration::minutes(30))
		);
	}

	#[test]
	fn never_expiring_token_is_not_scheduled() {
		assert_eq!(renewal_due(t0(), &Expiration::Never), None);
	}

	#[test]
	fn already_expired_token_is_due_at_expiry() {
		let exp = Expiration::At(t0() - ChronoDuration::seconds(5));
		assert_eq!(renewal_due(t0(), &exp), Some(t0() - ChronoDuration::seconds(5)));
	}

	#[test]
	fn zero_ttl_never_expires() {
		assert_eq!(expiration_after(t0(), Some(Duration::ZERO)), Expiration::Never);
		assert_eq!(expiration_after(t0(), None), Expiration::Never);
	}

	#[test]
	fn remaining_saturates_at_zero() {
		let exp = Expiration::At(t0());
		assert_eq!(
			exp.remaining(t0() + ChronoDuration::minutes(1)),
			Some(Duration::ZERO)
		);
		assert!(exp.is_expired(t0()));
		assert_eq!(Expiration::Never.remaining(t0()), None);
	}

	#[test]
	fn option_round_trip() {
		assert_eq!(Expiration::from_option(None), Expiration::Never);
		let at = t0();
		assert_eq!(Expiration::from_option(Some(at)).as_option(), Some(at));
	}

	proptest! {
		#[test]
		fn renewal_is_strictly_before_expiry(ttl_secs in 2u64..10_000_000) {
			let exp = expiration_after(t0(), Some(Duration::from_secs(ttl_secs)));
			let due = renewal_due(t0(), &exp).unwrap();
			prop_assert!(due > t0());
			prop_assert!(Expiration::At(due) != exp);
			prop_assert!(!exp.is_expired(due));
		}

		#[test]
		fn remaining_never_exceeds_ttl(ttl_secs in 1u64..10_000_000, elapsed in 0i64..20_000_000) {
			let exp = expiration_after(t0(), Some(Duration::from_secs(ttl_secs)));
			let now = t0() + ChronoDuration::seconds(elapsed);
			let left = exp.remaining(now).unwrap();
			prop_assert!(left <= Duration::from_secs(ttl_secs));
			prop_assert_eq!(left.is_zero(), exp.is_expired(now));
		}
	}
}
