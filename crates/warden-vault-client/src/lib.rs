// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HashiCorp Vault implementation of [`warden_credentials_core::SecretEngine`].
//!
//! Tokens are presented in the `X-Vault-Token` header and never logged.
//! HTTP statuses map onto the engine error taxonomy:
//!
//! | Vault answer | `EngineError` |
//! |--------------|---------------|
//! | connect/TLS/timeout failure, 5xx, 412, 429 | `Transient` |
//! | 403 | `TokenInvalid` |
//! | other 4xx, malformed body | `Rejected` |

mod client;
mod connector;
mod error;

pub use client::{ClientOptions, VaultClient, DEFAULT_TIMEOUT};
pub use connector::VaultConnector;
pub use error::{VaultClientError, VaultClientResult};
