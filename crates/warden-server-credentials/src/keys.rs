// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption of engine tokens and client certificate keys at rest.
//!
//! Ciphertexts are `nonce || AES-256-GCM(plaintext)` and are stored next to
//! the id of the root key that produced them, so a root key can be rotated
//! while older rows stay readable. Lookups never touch plaintext: tokens are
//! addressed by an HMAC-SHA256 keyed from the root key.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use warden_common_secret::SecretBytes;
use zeroize::Zeroizing;

use crate::error::{CredentialsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Size of root keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

const HMAC_KEY_CONTEXT: &[u8] = b"warden/hmac";

/// Ciphertext plus the id of the key that can open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
	pub ciphertext: Vec<u8>,
	pub key_id: String,
}

/// Wraps and unwraps secret material before it reaches the database.
pub trait KeyService: Send + Sync {
	fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedValue>;

	fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<SecretBytes>;

	/// Deterministic keyed digest used as a lookup handle for secret values.
	fn hmac(&self, data: &[u8]) -> Vec<u8>;
}

/// [`KeyService`] backed by a locally held 256-bit root key.
pub struct RootKeyService {
	active_id: String,
	keys: HashMap<String, Zeroizing<[u8; KEY_SIZE]>>,
	hmac: HmacSha256,
}

impl RootKeyService {
	pub fn from_bytes(key_id: impl Into<String>, key: &[u8]) -> Result<Self> {
		let key_id = key_id.into();
		if key_id.trim().is_empty() {
			return Err(CredentialsError::Validation("root key id must not be empty".into()));
		}
		let key = to_key(key)?;

		let mut derive = <HmacSha256 as Mac>::new_from_slice(key.as_slice())
			.map_err(|e| CredentialsError::Encryption(format!("hmac key derivation failed: {e}")))?;
		derive.update(HMAC_KEY_CONTEXT);
		let hmac_key = Zeroizing::new(derive.finalize().into_bytes().to_vec());
		let hmac = <HmacSha256 as Mac>::new_from_slice(&hmac_key)
			.map_err(|e| CredentialsError::Encryption(format!("hmac key derivation failed: {e}")))?;

		let mut keys = HashMap::new();
		keys.insert(key_id.clone(), key);
		Ok(Self {
			active_id: key_id,
			keys,
			hmac,
		})
	}

	/// Decode a base64 root key as found in configuration.
	pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self> {
		let bytes = Zeroizing::new(
			STANDARD
				.decode(encoded.trim())
				.map_err(|e| CredentialsError::Validation(format!("root key is not valid base64: {e}")))?,
		);
		Self::from_bytes(key_id, &bytes)
	}

	/// Keep a retired root key around so rows it encrypted can still be read.
	pub fn with_previous_key(mut self, key_id: impl Into<String>, key: &[u8]) -> Result<Self> {
		let key_id = key_id.into();
		if key_id == self.active_id {
			return Err(CredentialsError::Validation(format!(
				"previous key id {key_id} collides with the active key"
			)));
		}
		self.keys.insert(key_id, to_key(key)?);
		Ok(self)
	}

	pub fn active_key_id(&self) -> &str {
		&self.active_id
	}

	fn cipher(&self, key_id: &str) -> Result<Aes256Gcm> {
		let key = self
			.keys
			.get(key_id)
			.ok_or_else(|| CredentialsError::Decryption(format!("unknown key id: {key_id}")))?;
		Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice())))
	}
}

impl fmt::Debug for RootKeyService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RootKeyService")
			.field("active_id", &self.active_id)
			.field("key_count", &self.keys.len())
			.finish_non_exhaustive()
	}
}

impl KeyService for RootKeyService {
	fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedValue> {
		let cipher = self.cipher(&self.active_id)?;

		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let sealed = cipher
			.encrypt(nonce, plaintext)
			.map_err(|e| CredentialsError::Encryption(format!("value encryption failed: {e}")))?;

		let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
		ciphertext.extend_from_slice(&nonce_bytes);
		ciphertext.extend_from_slice(&sealed);

		Ok(EncryptedValue {
			ciphertext,
			key_id: self.active_id.clone(),
		})
	}

	fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<SecretBytes> {
		if ciphertext.len() <= NONCE_SIZE {
			return Err(CredentialsError::Decryption("ciphertext too short".into()));
		}
		let cipher = self.cipher(key_id)?;
		let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

		let plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), sealed)
			.map_err(|e| CredentialsError::Decryption(format!("value decryption failed: {e}")))?;

		Ok(SecretBytes::new(plaintext))
	}

	fn hmac(&self, data: &[u8]) -> Vec<u8> {
		let mut mac = self.hmac.clone();
		mac.update(data);
		mac.finalize().into_bytes().to_vec()
	}
}

fn to_key(bytes: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
	if bytes.len() != KEY_SIZE {
		return Err(CredentialsError::Validation(format!(
			"invalid key size: expected {KEY_SIZE}, got {}",
			bytes.len()
		)));
	}
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	key.copy_from_slice(bytes);
	Ok(key)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn service(fill: u8) -> RootKeyService {
		RootKeyService::from_bytes("k1", &[fill; KEY_SIZE]).unwrap()
	}

	#[test]
	fn encrypt_decrypt_roundtrip() {
		let keys = service(7);
		let sealed = keys.encrypt(b"hvs.token").unwrap();
		assert_eq!(sealed.key_id, "k1");
		assert_ne!(&sealed.ciphertext[NONCE_SIZE..], b"hvs.token");

		let opened = keys.decrypt(&sealed.ciphertext, "k1").unwrap();
		assert_eq!(opened.expose().as_slice(), b"hvs.token");
	}

	#[test]
	fn nonces_are_not_reused() {
		let keys = service(7);
		let a = keys.encrypt(b"same").unwrap();
		let b = keys.encrypt(b"same").unwrap();
		assert_ne!(a.ciphertext, b.ciphertext);
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let sealed = service(1).encrypt(b"secret").unwrap();
		assert!(matches!(
			service(2).decrypt(&sealed.ciphertext, "k1"),
			Err(CredentialsError::Decryption(_))
		));
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let keys = service(3);
		let mut sealed = keys.encrypt(b"secret").unwrap();
		let last = sealed.ciphertext.len() - 1;
		sealed.ciphertext[last] ^= 0xFF;
		assert!(keys.decrypt(&sealed.ciphertext, "k1").is_err());
	}

	#[test]
	fn unknown_key_id_and_short_input_are_rejected() {
		let keys = service(3);
		let sealed = keys.encrypt(b"secret").unwrap();
		assert!(keys.decrypt(&sealed.ciphertext, "k0").is_err());
		assert!(keys.decrypt(&[0u8; NONCE_SIZE], "k1").is_err());
	}

	#[test]
	fn previous_keys_still_decrypt() {
		let old = service(1);
		let sealed = old.encrypt(b"legacy").unwrap();

		let rotated = RootKeyService::from_bytes("k2", &[2; KEY_SIZE])
			.unwrap()
			.with_previous_key("k1", &[1; KEY_SIZE])
			.unwrap();
		assert_eq!(rotated.active_key_id(), "k2");
		assert_eq!(
			rotated.decrypt(&sealed.ciphertext, "k1").unwrap().expose().as_slice(),
			b"legacy"
		);
		assert_eq!(rotated.encrypt(b"new").unwrap().key_id, "k2");
	}

	#[test]
	fn invalid_key_size_is_rejected() {
		assert!(RootKeyService::from_bytes("k1", &[0u8; 16]).is_err());
		assert!(RootKeyService::from_bytes("", &[0u8; KEY_SIZE]).is_err());
	}

	#[test]
	fn base64_keys_are_decoded() {
		let encoded = STANDARD.encode([9u8; KEY_SIZE]);
		let keys = RootKeyService::from_base64("k1", &format!("{encoded}\n")).unwrap();
		assert_eq!(keys.hmac(b"x"), service(9).hmac(b"x"));
		assert!(RootKeyService::from_base64("k1", "not base64!").is_err());
	}

	#[test]
	fn debug_does_not_print_key_material() {
		let debug = format!("{:?}", service(0xAB));
		assert!(debug.contains("k1"));
		assert!(!debug.contains("171"));
	}

	proptest! {
		#[test]
		fn hmac_is_deterministic_and_keyed(data in proptest::collection::vec(any::<u8>(), 0..256)) {
			let a = service(1);
			let b = service(2);
			prop_assert_eq!(a.hmac(&data), a.hmac(&data));
			prop_assert_eq!(a.hmac(&data).len(), 32);
			prop_assert_ne!(a.hmac(&data), b.hmac(&data));
		}

		#[test]
		fn roundtrip_any_plaintext(data in proptest::collection::vec(any::<u8>(), 0..512)) {
			let keys = service(5);
			let sealed = keys.encrypt(&data).unwrap();
			prop_assert_eq!(sealed.ciphertext.len(), NONCE_SIZE + data.len() + 16);
			let opened = keys.decrypt(&sealed.ciphertext, &sealed.key_id).unwrap();
			prop_assert_eq!(opened.expose(), &data);
		}
	}
}
