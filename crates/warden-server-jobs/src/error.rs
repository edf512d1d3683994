// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("Scheduler already running")]
	AlreadyRunning,

	#[error("Scheduler not running")]
	NotRunning,

	#[error("Invalid scheduler configuration: {0}")]
	InvalidConfig(String),

	#[error("Scheduler task failed: {0}")]
	TaskFailed(String),
}
