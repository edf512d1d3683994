// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timestamp encoding.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text with microsecond
//! precision, so `<` and `<=` in SQL compare them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use warden_credentials_core::Expiration;

use crate::error::{DbError, Result};

pub fn format_timestamp(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {s:?}: {e}")))
}

pub fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
	s.as_deref().map(parse_timestamp).transpose()
}

/// Column value for an expiration; `NULL` encodes "never expires".
pub fn format_expiration(expiration: &Expiration) -> Option<String> {
	expiration.as_option().map(format_timestamp)
}

pub fn parse_expiration(s: Option<String>) -> Result<Expiration> {
	Ok(Expiration::from_option(parse_optional_timestamp(s)?))
}
