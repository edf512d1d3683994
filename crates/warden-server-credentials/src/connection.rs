// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turning stored (encrypted) store settings into engine connections.

use std::future::Future;
use std::time::Duration;
use warden_common_secret::SecretString;
use warden_credentials_core::{ClientIdentity, EngineConnection, EngineResult};
use warden_server_db::{ClientCertificateRecord, PrivateLibrary, StoreRecord, StoreSettings};

use crate::error::{CredentialsError, Result};
use crate::keys::KeyService;

pub(crate) fn decrypt_token(
	keys: &dyn KeyService,
	ciphertext: &[u8],
	key_id: &str,
) -> Result<SecretString> {
	keys.decrypt(ciphertext, key_id)?
		.into_secret_string()
		.map_err(|_| CredentialsError::Decryption("stored token is not valid UTF-8".into()))
}

fn client_identity(
	keys: &dyn KeyService,
	certificate: &[u8],
	encrypted_key: &[u8],
	key_id: &str,
) -> Result<ClientIdentity> {
	let key = keys
		.decrypt(encrypted_key, key_id)?
		.into_secret_string()
		.map_err(|_| CredentialsError::Decryption("client certificate key is not valid UTF-8".into()))?;
	Ok(ClientIdentity {
		certificate: certificate.to_vec(),
		key,
	})
}

pub(crate) fn for_settings(
	settings: &StoreSettings,
	client_identity: Option<ClientIdentity>,
) -> EngineConnection {
	EngineConnection {
		address: settings.vault_address.clone(),
		namespace: settings.namespace.clone(),
		ca_cert: settings.ca_cert.clone(),
		tls_server_name: settings.tls_server_name.clone(),
		tls_skip_verify: settings.tls_skip_verify,
		client_identity,
	}
}

pub(crate) fn for_store(
	keys: &dyn KeyService,
	store: &StoreRecord,
	certificate: Option<&ClientCertificateRecord>,
) -> Result<EngineConnection> {
	let client_identity = certificate
		.map(|c| client_identity(keys, &c.certificate, &c.certificate_key, &c.key_id))
		.transpose()?;
	Ok(for_settings(&store.settings, client_identity))
}

pub(crate) fn for_library(keys: &dyn KeyService, library: &PrivateLibrary) -> Result<EngineConnection> {
	let client_identity = library
		.client_certificate
		.as_ref()
		.map(|c| client_identity(keys, &c.certificate, &c.certificate_key, &c.key_id))
		.transpose()?;
	Ok(EngineConnection {
		address: library.vault_address.clone(),
		namespace: library.namespace.clone(),
		ca_cert: library.ca_cert.clone(),
		tls_server_name: library.tls_server_name.clone(),
		tls_skip_verify: library.tls_skip_verify,
		client_identity,
	})
}

/// Run an engine call bounded by `timeout`; elapsing counts as unavailability.
pub(crate) async fn with_timeout<T>(
	timeout: Duration,
	call: impl Future<Output = EngineResult<T>>,
) -> Result<T> {
	match tokio::time::timeout(timeout, call).await {
		Ok(result) => result.map_err(CredentialsError::from),
		Err(_) => Err(CredentialsError::EngineUnavailable(format!(
			"engine call timed out after {}s",
			timeout.as_secs()
		))),
	}
}

/// Short, non-reversible label for a token in logs.
pub(crate) fn token_label(token_hmac: &[u8]) -> String {
	hex::encode(&token_hmac[..token_hmac.len().min(6)])
}
