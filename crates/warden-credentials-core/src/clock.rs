// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Injectable wall clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time for expiry and scheduling decisions.
pub trait Clock: Send + Sync + 'static {
	fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
	now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			now: Arc::new(Mutex::new(start)),
		}
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}

	pub fn set(&self, to: DateTime<Utc>) {
		*self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn manual_clock_advances_across_clones() {
		let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		let shared = clock.clone();
		clock.advance(Duration::seconds(90));
		assert_eq!(shared.now(), start + Duration::seconds(90));

		shared.set(start);
		assert_eq!(clock.now(), start);
	}

	#[test]
	fn system_clock_moves_forward() {
		let a = SystemClock.now();
		let b = SystemClock.now();
		assert!(b >= a);
	}
}
