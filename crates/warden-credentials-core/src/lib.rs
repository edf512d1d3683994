// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Warden credential lease lifecycle.
//!
//! Everything in this crate is free of I/O:
//!
//! - **Identifiers**: prefixed public ids for stores, libraries, credentials and sessions
//! - **Statuses**: the token state machine and credential lease states
//! - **Expiration clock**: remaining lifetime and midpoint renewal deadlines
//! - **Wall clock**: an injectable [`Clock`] so every worker computes expiry the same way
//! - **Engine capability**: the [`SecretEngine`] trait a secrets backend implements

pub mod clock;
pub mod engine;
pub mod expiration;
pub mod ids;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
	ClientIdentity, DynamicSecret, EngineConnection, EngineConnector, EngineError, EngineResult,
	HttpMethod, LibraryRequest, SecretEngine, TokenLease,
};
pub use expiration::{expiration_after, renewal_due, Expiration};
pub use ids::{CredentialId, LibraryId, ScopeId, SessionId, StoreId};
pub use status::{CredentialPurpose, CredentialStatus, TokenStatus};
