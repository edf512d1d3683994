// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixtures for tests in this and dependent crates.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use warden_credentials_core::{Expiration, ScopeId, StoreId};

use crate::vault::{NewStore, NewToken, StoreSettings};

/// In-memory database with the full schema.
///
/// A single connection is used so every query sees the same database.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")
		.unwrap()
		.foreign_keys(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	crate::run_migrations(&pool)
		.await
		.expect("Failed to run migrations");
	pool
}

/// A fixed instant used as "now" throughout tests.
pub fn t0() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn new_store(scope_id: &str, name: Option<&str>) -> NewStore {
	NewStore {
		public_id: StoreId::generate(),
		scope_id: ScopeId::parse(scope_id).unwrap(),
		settings: StoreSettings {
			name: name.map(str::to_string),
			description: None,
			vault_address: "https://vault.example.com:8200".to_string(),
			namespace: None,
			ca_cert: None,
			tls_server_name: None,
			tls_skip_verify: false,
		},
	}
}

/// A token with placeholder ciphertext. `ttl = None` never expires.
pub fn new_token(token_hmac: &[u8], last_renewal: DateTime<Utc>, ttl: Option<Duration>) -> NewToken {
	NewToken {
		token_hmac: token_hmac.to_vec(),
		ciphertext: [b"enc:".as_slice(), token_hmac].concat(),
		key_id: "test-key".to_string(),
		last_renewal_time: last_renewal,
		expiration: Expiration::from_option(ttl.map(|ttl| last_renewal + ttl)),
	}
}
