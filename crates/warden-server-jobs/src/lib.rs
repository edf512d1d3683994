// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background scheduling for token renewal, revocation and credential expiry.

pub mod error;
pub mod health;
pub mod scheduler;
pub mod types;

pub use error::{Result, SchedulerError};
pub use health::{HealthState, HealthStatus, LastTickInfo, SchedulerHealth};
pub use scheduler::{compute_sleep, RenewalScheduler};
pub use types::{SchedulerConfig, TickReport};
