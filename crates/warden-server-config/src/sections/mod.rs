// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for warden-server.

pub mod database;
pub mod engine;
pub mod keys;
pub mod logging;
pub mod renewal;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use engine::{EngineConfig, EngineConfigLayer};
pub use keys::{KeysConfig, KeysConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use renewal::{RenewalConfig, RenewalConfigLayer};
