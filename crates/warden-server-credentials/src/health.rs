// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_credentials_core::{StoreId, TokenStatus};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

impl HealthState {
	pub fn worst(self, other: HealthState) -> HealthState {
		self.max(other)
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
	pub store_id: StoreId,
	pub status: HealthState,
	/// Status of the token issuance would use, if any.
	pub token_status: Option<TokenStatus>,
	pub renewal_attempts: u32,
	pub expiration: Option<DateTime<Utc>>,
	pub next_renewal_due: Option<DateTime<Utc>>,
	/// Superseded tokens still waiting for upstream revocation.
	pub pending_revocations: u32,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn worst_prefers_unhealthy() {
		assert_eq!(HealthState::Healthy.worst(HealthState::Degraded), HealthState::Degraded);
		assert_eq!(HealthState::Unhealthy.worst(HealthState::Degraded), HealthState::Unhealthy);
		assert_eq!(HealthState::Healthy.worst(HealthState::Healthy), HealthState::Healthy);
	}

	#[test]
	fn serializes_snake_case() {
		assert_eq!(
			serde_json::to_string(&HealthState::Unhealthy).unwrap(),
			"\"unhealthy\""
		);
	}
}
