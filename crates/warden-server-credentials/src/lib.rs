// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # warden-server-credentials
//!
//! Lifecycle services for brokered secrets-engine credentials:
//!
//! - [`TokenLifecycleManager`]: renews store tokens at their lease midpoint,
//!   retries with backoff, rotates and revokes them
//! - [`ClientCertificateRotator`]: idempotent upsert of a store's mTLS identity
//! - [`CredentialIssuer`]: mints dynamic secrets and binds each to exactly one
//!   session slot
//! - [`CredentialStoreService`]: store and library management
//!
//! Secrets never reach the database in plaintext; [`KeyService`] seals them
//! with AES-256-GCM and derives HMAC lookup handles.
//!
//! ## Errors
//!
//! | Variant | Retry? | When |
//! |---------|--------|------|
//! | `Validation` | no | Malformed input, rejected before any state change |
//! | `Conflict` / `BindingConflict` | no | A concurrent writer won |
//! | `TokenUnavailable` | no | Store has no `current`/`maintaining` token |
//! | `EngineUnavailable` | yes | Network error, timeout, 5xx, 429 |
//! | `TokenInvalid` / `EngineRejected` | no | The engine refused the call |

pub mod certificates;
mod connection;
pub mod error;
pub mod health;
pub mod issuer;
pub mod keys;
pub mod notify;
pub mod policy;
pub mod service;
pub mod tokens;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use certificates::ClientCertificateRotator;
pub use error::{CredentialsError, Result};
pub use health::{HealthState, StoreHealth};
pub use issuer::{CredentialIssuer, CredentialRevocationReport, IssuedCredential};
pub use keys::{EncryptedValue, KeyService, RootKeyService};
pub use notify::ScheduleNotifier;
pub use policy::RenewalPolicy;
pub use service::{
	ClientCertificateInput, CreateLibraryRequest, CreateStoreRequest, CredentialStoreService,
};
pub use tokens::{
	revocation_due_at, token_due_at, RenewalOutcome, RenewalReport, RevocationOutcome,
	RevocationReport, TokenLifecycleManager,
};
