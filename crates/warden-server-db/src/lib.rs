// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # warden-server-db
//!
//! Persistence for the credential lease lifecycle using SQLite via sqlx.
//!
//! Each domain has a `*Store` trait (the interface services depend on) and a
//! `*Repository` struct holding a `SqlitePool`:
//!
//! - [`VaultStore`] / [`VaultRepository`]: credential stores, engine tokens, client certificates
//! - [`LeaseStore`] / [`LeaseRepository`]: libraries, dynamic credentials, session slots
//!
//! ## Concurrency
//!
//! No method performs read-then-write. State transitions are single
//! `UPDATE ... WHERE status = ?` statements; callers learn whether they won
//! from the returned `bool`. Multi-row changes (store creation, token
//! rotation) run inside one transaction.
//!
//! ## Errors
//!
//! | Variant | When |
//! |---------|------|
//! | `NotFound` | A referenced parent (store, library, slot) does not exist |
//! | `Conflict` | Unique constraint violation or stale version |
//! | `Sqlx` | Unexpected database errors |
//! | `Internal` | Unparseable stored data |

mod error;
pub mod lease;
mod migrations;
pub mod pool;
pub mod time;
pub mod vault;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use lease::{
	CredentialRecord, EncryptedCertificate, EncryptedToken, LeaseRepository, LeaseStore,
	LibraryRecord, NewCredential, NewLibrary, PrivateLibrary,
};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use vault::{
	ClientCertificateRecord, NewClientCertificate, NewStore, NewToken, StoreRecord, StoreSettings,
	TokenRecord, VaultRepository, VaultStore,
};
