// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for sensitive material handled by the broker.
//!
//! Engine access tokens, client certificate private keys and the values of
//! issued dynamic credentials all travel through the code base as [`Secret`].
//! The wrapper:
//!
//! - prints `[REDACTED]` for `Debug`, `Display` and `Serialize`
//! - zeroizes its contents on drop
//! - only hands out the inner value through an explicit [`Secret::expose`]
//!
//! ```
//! use warden_common_secret::SecretString;
//!
//! let token = SecretString::new("hvs.CAESIJ".to_string());
//! assert_eq!(format!("{token}"), "[REDACTED]");
//! assert_eq!(token.expose(), "hvs.CAESIJ");
//! ```

use std::fmt;
use zeroize::Zeroize;

/// Placeholder printed in place of any secret value.
pub const REDACTED: &str = "[REDACTED]";

/// A value that must never reach logs, error messages or serialized output.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

/// Secret text, e.g. an engine token or PEM encoded private key.
pub type SecretString = Secret<String>;

/// Secret bytes, e.g. a decrypted ciphertext before UTF-8 validation.
pub type SecretBytes = Secret<Vec<u8>>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the protected value. Every call site is an audit point.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	/// Copy the protected value out, leaving the wrapper to be zeroized on drop.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl SecretString {
	/// True when the wrapped string is empty or whitespace only.
	pub fn is_blank(&self) -> bool {
		self.inner.trim().is_empty()
	}
}

impl SecretBytes {
	/// Interpret the bytes as UTF-8 text without leaking them on failure.
	pub fn into_secret_string(self) -> Result<SecretString, std::string::FromUtf8Error> {
		String::from_utf8(self.inner.clone()).map(SecretString::new)
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self::new(self.inner.clone())
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			T::deserialize(deserializer).map(Secret::new)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn token_is_redacted_in_debug_and_display() {
		let token = SecretString::new("hvs.super-secret".to_string());
		assert_eq!(format!("{token}"), REDACTED);
		assert!(!format!("{token:?}").contains("super-secret"));
	}

	#[test]
	fn optional_certificate_key_is_redacted() {
		let key: Option<SecretString> = Some(SecretString::new("-----BEGIN KEY-----".into()));
		assert!(!format!("{key:?}").contains("BEGIN"));
	}

	#[test]
	fn blank_detection() {
		assert!(SecretString::new("  \n".into()).is_blank());
		assert!(!SecretString::new("t".into()).is_blank());
	}

	#[test]
	fn bytes_convert_to_string() {
		let bytes = SecretBytes::new(b"lease-value".to_vec());
		let text = bytes.into_secret_string().unwrap();
		assert_eq!(text.expose(), "lease-value");
	}

	#[test]
	fn invalid_utf8_is_rejected() {
		let bytes = SecretBytes::new(vec![0xff, 0xfe]);
		assert!(bytes.into_secret_string().is_err());
	}

	#[cfg(feature = "serde")]
	#[test]
	fn serializes_as_placeholder_and_deserializes_value() {
		let secret = SecretString::new("engine-token".into());
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, format!("\"{REDACTED}\""));

		let parsed: SecretString = serde_json::from_str("\"engine-token\"").unwrap();
		assert_eq!(parsed, secret);
	}

	proptest! {
		#[test]
		fn display_never_leaks(inner in "[a-z0-9.]{4,40}") {
			prop_assume!(!REDACTED.contains(&inner) && !"Secret".contains(&inner));
			let secret = SecretString::new(inner.clone());
			let displayed = format!("{secret}");
			let debugged = format!("{secret:?}");
			prop_assert!(!displayed.contains(&inner));
			prop_assert!(!debugged.contains(&inner));
		}
	}
}
