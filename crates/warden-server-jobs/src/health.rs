// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;
pub use warden_server_credentials::HealthState;
use warden_server_credentials::StoreHealth;

use crate::types::TickReport;

#[derive(Debug, Clone, Serialize)]
pub struct LastTickInfo {
	pub started_at: DateTime<Utc>,
	pub duration_ms: i64,
	pub report: TickReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
	pub status: HealthState,
	pub running: bool,
	pub last_tick: Option<LastTickInfo>,
	pub consecutive_failures: u32,
	pub next_wake: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
	/// Worst state across the scheduler and every store.
	pub status: HealthState,
	pub scheduler: SchedulerHealth,
	pub stores: Vec<StoreHealth>,
}

pub(crate) fn determine_health_state(
	last_tick: Option<&LastTickInfo>,
	consecutive_failures: u32,
) -> HealthState {
	match last_tick {
		None => HealthState::Healthy,
		Some(tick) if !tick.report.has_failures() => HealthState::Healthy,
		Some(_) => {
			if consecutive_failures >= 3 {
				HealthState::Unhealthy
			} else if consecutive_failures >= 1 {
				HealthState::Degraded
			} else {
				HealthState::Healthy
			}
		}
	}
}
