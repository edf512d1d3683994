// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring for the warden-server binary.

pub mod app;

pub use app::{renewal_policy, scheduler_config, shutdown_signal, Warden};
