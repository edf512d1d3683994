// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prefixed public identifiers.
//!
//! Ids are opaque strings of the form `<prefix>_<32 hex chars>`. Ids created
//! by other components (sessions, scopes) are accepted as long as they are
//! non-blank; only ids this system mints carry a checked prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_public_id {
	($name:ident, $prefix:expr, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			pub const PREFIX: &'static str = $prefix;

			/// Mint a new random id.
			pub fn generate() -> Self {
				Self(format!("{}_{}", Self::PREFIX, Uuid::new_v4().simple()))
			}

			/// Wrap an existing id. Returns `None` for blank input.
			pub fn parse(value: impl Into<String>) -> Option<Self> {
				let value = value.into();
				if value.trim().is_empty() {
					None
				} else {
					Some(Self(value))
				}
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
	};
}

define_public_id!(StoreId, "csvlt", "Id of a configured connection to a secrets engine.");
define_public_id!(LibraryId, "clvlt", "Id of a credential library (engine path + request shape).");
define_public_id!(CredentialId, "cdvlt", "Id of one dynamically issued credential.");
define_public_id!(SessionId, "s", "Id of a session requesting credentials.");
define_public_id!(ScopeId, "p", "Id of the scope that owns a credential store.");
