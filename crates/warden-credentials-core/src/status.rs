// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Token and credential state machines.

use serde::{Deserialize, Serialize};

/// Status of a store's engine access token.
///
/// ```text
/// current ──claim──▶ maintaining ──renewed──▶ current
///    │                    │
///    └──rotate──▶ revoke ◀┴──invalid / retry ceiling
///                   │
///                   └──revoked upstream──▶ expired (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
	Current,
	Maintaining,
	Revoke,
	Expired,
}

impl TokenStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TokenStatus::Current => "current",
			TokenStatus::Maintaining => "maintaining",
			TokenStatus::Revoke => "revoke",
			TokenStatus::Expired => "expired",
		}
	}

	/// Whether a token in this status may be presented to the engine.
	pub fn is_usable(&self) -> bool {
		matches!(self, TokenStatus::Current | TokenStatus::Maintaining)
	}

	/// Whether `self → next` is an edge of the state machine.
	pub fn can_transition_to(&self, next: TokenStatus) -> bool {
		use TokenStatus::*;
		matches!(
			(self, next),
			(Current, Maintaining)
				| (Maintaining, Current)
				| (Current, Revoke)
				| (Maintaining, Revoke)
				| (Revoke, Expired)
		)
	}
}

impl std::fmt::Display for TokenStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for TokenStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"current" => Ok(TokenStatus::Current),
			"maintaining" => Ok(TokenStatus::Maintaining),
			"revoke" => Ok(TokenStatus::Revoke),
			"expired" => Ok(TokenStatus::Expired),
			_ => Err(format!("unknown token status: {s}")),
		}
	}
}

/// Status of an issued dynamic credential's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
	Active,
	/// Waiting for the lease to be revoked upstream.
	Revoke,
	Revoked,
	Expired,
}

impl CredentialStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			CredentialStatus::Active => "active",
			CredentialStatus::Revoke => "revoke",
			CredentialStatus::Revoked => "revoked",
			CredentialStatus::Expired => "expired",
		}
	}
}

impl std::fmt::Display for CredentialStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for CredentialStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"active" => Ok(CredentialStatus::Active),
			"revoke" => Ok(CredentialStatus::Revoke),
			"revoked" => Ok(CredentialStatus::Revoked),
			"expired" => Ok(CredentialStatus::Expired),
			_ => Err(format!("unknown credential status: {s}")),
		}
	}
}

/// The slot of a session a credential fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPurpose {
	/// Returned to the client which uses it against the target itself.
	Brokered,
	/// Injected by the proxy into the connection to the target.
	Injected,
}

impl CredentialPurpose {
	pub fn as_str(&self) -> &'static str {
		match self {
			CredentialPurpose::Brokered => "brokered",
			CredentialPurpose::Injected => "injected",
		}
	}
}

impl std::fmt::Display for CredentialPurpose {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for CredentialPurpose {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"brokered" => Ok(CredentialPurpose::Brokered),
			"injected" => Ok(CredentialPurpose::Injected),
			_ => Err(format!("unknown credential purpose: {s}")),
		}
	}
}
