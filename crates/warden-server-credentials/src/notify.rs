// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use tokio::sync::Notify;

/// Wakes the renewal scheduler early when the token schedule changes.
///
/// A notification sent while the scheduler is busy is remembered and
/// consumed by its next wait, so changes between ticks are never lost.
#[derive(Debug, Clone, Default)]
pub struct ScheduleNotifier {
	inner: Arc<Notify>,
}

impl ScheduleNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn notify(&self) {
		self.inner.notify_one();
	}

	pub async fn notified(&self) {
		self.inner.notified().await;
	}
}
