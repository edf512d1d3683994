// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client certificate rotation.
//!
//! A store has at most one client certificate. Setting it is an upsert keyed
//! by store id, so repeating the same call leaves exactly one row with the
//! last value; there is no intermediate state to recover from.

use std::sync::Arc;
use warden_common_secret::SecretString;
use warden_credentials_core::{Clock, StoreId};
use warden_server_db::{ClientCertificateRecord, NewClientCertificate, VaultStore};

use crate::error::{CredentialsError, Result};
use crate::keys::KeyService;

const PEM_MARKER: &str = "-----BEGIN ";

pub struct ClientCertificateRotator {
	vault: Arc<dyn VaultStore>,
	keys: Arc<dyn KeyService>,
	clock: Arc<dyn Clock>,
}

impl ClientCertificateRotator {
	pub fn new(vault: Arc<dyn VaultStore>, keys: Arc<dyn KeyService>, clock: Arc<dyn Clock>) -> Self {
		Self { vault, keys, clock }
	}

	/// Encrypt and seal a certificate/key pair for insertion.
	pub fn seal(&self, certificate: &[u8], key: &SecretString) -> Result<NewClientCertificate> {
		validate_pem("certificate", certificate)?;
		validate_pem("certificate key", key.expose().as_bytes())?;

		let sealed = self.keys.encrypt(key.expose().as_bytes())?;
		Ok(NewClientCertificate {
			certificate: certificate.to_vec(),
			certificate_key: sealed.ciphertext,
			certificate_key_hmac: self.keys.hmac(key.expose().as_bytes()),
			key_id: sealed.key_id,
		})
	}

	/// Insert or replace the store's client certificate.
	#[tracing::instrument(skip(self, certificate, key), fields(store_id = %store_id))]
	pub async fn set(
		&self,
		store_id: &StoreId,
		certificate: &[u8],
		key: &SecretString,
	) -> Result<ClientCertificateRecord> {
		let sealed = self.seal(certificate, key)?;
		let record = self
			.vault
			.upsert_client_certificate(store_id, &sealed, self.clock.now())
			.await?;

		tracing::info!(store_id = %store_id, "client certificate set");
		Ok(record)
	}

	/// Remove the store's client certificate. Returns `false` if there was none.
	#[tracing::instrument(skip(self), fields(store_id = %store_id))]
	pub async fn clear(&self, store_id: &StoreId) -> Result<bool> {
		let removed = self.vault.delete_client_certificate(store_id).await?;
		if removed {
			tracing::info!(store_id = %store_id, "client certificate cleared");
		}
		Ok(removed)
	}

	pub async fn get(&self, store_id: &StoreId) -> Result<Option<ClientCertificateRecord>> {
		Ok(self.vault.get_client_certificate(store_id).await?)
	}
}

fn validate_pem(what: &str, bytes: &[u8]) -> Result<()> {
	let text = std::str::from_utf8(bytes)
		.map_err(|_| CredentialsError::Validation(format!("{what} must be PEM encoded")))?;
	if !text.contains(PEM_MARKER) {
		return Err(CredentialsError::Validation(format!("{what} must be PEM encoded")));
	}
	Ok(())
}
