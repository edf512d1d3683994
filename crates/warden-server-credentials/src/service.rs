// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential store and library management.

use std::sync::Arc;
use warden_common_secret::SecretString;
use warden_credentials_core::{
	ClientIdentity, Clock, CredentialPurpose, HttpMethod, LibraryId, ScopeId, SessionId, StoreId,
};
use warden_server_db::{
	LeaseStore, LibraryRecord, NewLibrary, NewStore, StoreRecord, StoreSettings, VaultStore,
};

use crate::certificates::ClientCertificateRotator;
use crate::error::{CredentialsError, Result};
use crate::tokens::TokenLifecycleManager;

const PEM_CERTIFICATE_MARKER: &str = "-----BEGIN CERTIFICATE-----";

#[derive(Debug, Clone)]
pub struct ClientCertificateInput {
	/// PEM encoded certificate chain.
	pub certificate: Vec<u8>,
	/// PEM encoded private key.
	pub key: SecretString,
}

#[derive(Debug, Clone)]
pub struct CreateStoreRequest {
	pub scope_id: ScopeId,
	pub settings: StoreSettings,
	pub token: SecretString,
	pub client_certificate: Option<ClientCertificateInput>,
}

#[derive(Debug, Clone)]
pub struct CreateLibraryRequest {
	pub store_id: StoreId,
	pub name: Option<String>,
	pub description: Option<String>,
	pub vault_path: String,
	pub http_method: HttpMethod,
	pub http_request_body: Option<String>,
}

pub struct CredentialStoreService {
	vault: Arc<dyn VaultStore>,
	leases: Arc<dyn LeaseStore>,
	lifecycle: Arc<TokenLifecycleManager>,
	certificates: Arc<ClientCertificateRotator>,
	clock: Arc<dyn Clock>,
}

impl CredentialStoreService {
	pub fn new(
		vault: Arc<dyn VaultStore>,
		leases: Arc<dyn LeaseStore>,
		lifecycle: Arc<TokenLifecycleManager>,
		certificates: Arc<ClientCertificateRotator>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			vault,
			leases,
			lifecycle,
			certificates,
			clock,
		}
	}

	/// Create a store with its first token and optional client certificate.
	///
	/// The token is looked up with the engine first, so a store is never
	/// created around a token the engine does not accept.
	#[tracing::instrument(skip(self, request), fields(scope_id = %request.scope_id))]
	pub async fn create_store(&self, request: CreateStoreRequest) -> Result<StoreRecord> {
		validate_settings(&request.settings)?;

		let identity = request
			.client_certificate
			.as_ref()
			.map(|c| ClientIdentity {
				certificate: c.certificate.clone(),
				key: c.key.clone(),
			});
		let engine = self.lifecycle.connect(&request.settings, identity)?;
		let token = self
			.lifecycle
			.prepare_token(engine.as_ref(), &request.token)
			.await?;
		let certificate = request
			.client_certificate
			.as_ref()
			.map(|c| self.certificates.seal(&c.certificate, &c.key))
			.transpose()?;

		let store = NewStore {
			public_id: StoreId::generate(),
			scope_id: request.scope_id,
			settings: request.settings,
		};
		let record = self
			.vault
			.create_store(&store, &token, certificate.as_ref(), self.clock.now())
			.await?;
		self.lifecycle.notify_schedule_changed();

		tracing::info!(store_id = %record.public_id, "credential store created");
		Ok(record)
	}

	pub async fn get_store(&self, id: &StoreId) -> Result<StoreRecord> {
		self.vault
			.get_store(id)
			.await?
			.ok_or_else(|| CredentialsError::NotFound(id.to_string()))
	}

	pub async fn list_stores(&self, scope_id: &ScopeId) -> Result<Vec<StoreRecord>> {
		Ok(self.vault.list_stores(scope_id).await?)
	}

	/// Replace the connection settings if the store is still at `expected_version`.
	#[tracing::instrument(skip(self, settings), fields(store_id = %id))]
	pub async fn update_store(
		&self,
		id: &StoreId,
		settings: StoreSettings,
		expected_version: i64,
	) -> Result<StoreRecord> {
		validate_settings(&settings)?;
		let record = self
			.vault
			.update_store(id, &settings, expected_version, self.clock.now())
			.await?;
		tracing::info!(store_id = %id, version = record.version, "credential store updated");
		Ok(record)
	}

	/// Delete a store with its tokens, certificate and libraries.
	///
	/// Tokens are not revoked upstream; rotate first to retire them cleanly.
	#[tracing::instrument(skip(self), fields(store_id = %id))]
	pub async fn delete_store(&self, id: &StoreId) -> Result<bool> {
		let deleted = self.vault.delete_store(id).await?;
		if deleted {
			tracing::info!(store_id = %id, "credential store deleted");
		}
		Ok(deleted)
	}

	pub async fn rotate_token(&self, id: &StoreId, token: &SecretString) -> Result<()> {
		self.lifecycle.rotate_token(id, token).await
	}

	pub async fn set_client_certificate(
		&self,
		id: &StoreId,
		certificate: &[u8],
		key: &SecretString,
	) -> Result<()> {
		self.certificates.set(id, certificate, key).await?;
		Ok(())
	}

	pub async fn clear_client_certificate(&self, id: &StoreId) -> Result<bool> {
		self.certificates.clear(id).await
	}

	#[tracing::instrument(skip(self, request), fields(store_id = %request.store_id))]
	pub async fn create_library(&self, request: CreateLibraryRequest) -> Result<LibraryRecord> {
		let vault_path = request.vault_path.trim().trim_start_matches('/');
		if vault_path.is_empty() {
			return Err(CredentialsError::Validation("library path must not be empty".into()));
		}
		if request.http_request_body.is_some() && request.http_method != HttpMethod::Post {
			return Err(CredentialsError::Validation(
				"a request body is only allowed with POST".into(),
			));
		}

		let library = NewLibrary {
			public_id: LibraryId::generate(),
			store_id: request.store_id,
			name: request.name,
			description: request.description,
			vault_path: vault_path.to_string(),
			http_method: request.http_method,
			http_request_body: request.http_request_body,
		};
		self.leases.create_library(&library, self.clock.now()).await?;

		tracing::info!(library_id = %library.public_id, "credential library created");
		self.leases
			.get_library(&library.public_id)
			.await?
			.ok_or_else(|| CredentialsError::NotFound(library.public_id.to_string()))
	}

	pub async fn list_libraries(&self, store_id: &StoreId) -> Result<Vec<LibraryRecord>> {
		Ok(self.leases.list_libraries(store_id).await?)
	}

	/// Open the empty slot a later issuance binds into.
	#[tracing::instrument(skip(self), fields(session_id = %session_id, library_id = %library_id, purpose = %purpose))]
	pub async fn open_session_slot(
		&self,
		session_id: &SessionId,
		library_id: &LibraryId,
		purpose: CredentialPurpose,
	) -> Result<()> {
		self.leases
			.create_session_credential_slot(session_id, library_id, purpose, self.clock.now())
			.await?;
		Ok(())
	}
}

fn validate_settings(settings: &StoreSettings) -> Result<()> {
	let address = settings.vault_address.trim();
	if address.is_empty() {
		return Err(CredentialsError::Validation("vault address must not be empty".into()));
	}
	if !(address.starts_with("https://") || address.starts_with("http://")) {
		return Err(CredentialsError::Validation(format!(
			"vault address must be an http(s) URL: {address}"
		)));
	}
	if matches!(&settings.namespace, Some(ns) if ns.trim().is_empty()) {
		return Err(CredentialsError::Validation("namespace must not be blank".into()));
	}
	if matches!(&settings.tls_server_name, Some(name) if name.trim().is_empty()) {
		return Err(CredentialsError::Validation("TLS server name must not be blank".into()));
	}
	if let Some(ca) = &settings.ca_cert {
		let pem = std::str::from_utf8(ca).unwrap_or_default();
		if !pem.contains(PEM_CERTIFICATE_MARKER) {
			return Err(CredentialsError::Validation(
				"CA certificate must be PEM encoded".into(),
			));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::KeyService;
	use crate::testing::{test_settings, TestHarness, TEST_CERT, TEST_CERT_KEY};
	use warden_credentials_core::{EngineError, TokenLease, TokenStatus};

	fn request(token: &str) -> CreateStoreRequest {
		CreateStoreRequest {
			scope_id: ScopeId::parse("p_1234567890").unwrap(),
			settings: test_settings(),
			token: SecretString::new(token.to_string()),
			client_certificate: None,
		}
	}

	#[tokio::test]
	async fn create_store_stores_encrypted_token() {
		let h = TestHarness::new().await;
		let store = h.service().create_store(request("hvs.first")).await.unwrap();
		assert_eq!(store.version, 1);

		let token = h.usable_token(&store.public_id).await;
		assert_eq!(token.status, TokenStatus::Current);
		assert_eq!(token.token_hmac, h.keys.hmac(b"hvs.first"));
		assert!(!token.ciphertext.windows(9).any(|w| w == b"hvs.first"));
		assert_eq!(h.reveal(&token), "hvs.first");
	}

	#[tokio::test]
	async fn create_store_with_certificate_presents_identity() {
		let h = TestHarness::new().await;
		let mut req = request("hvs.mtls");
		req.client_certificate = Some(ClientCertificateInput {
			certificate: TEST_CERT.as_bytes().to_vec(),
			key: SecretString::new(TEST_CERT_KEY.into()),
		});
		let store = h.service().create_store(req).await.unwrap();

		let connection = h.connector.connections().pop().unwrap();
		let identity = connection.client_identity.unwrap();
		assert_eq!(identity.key.expose(), TEST_CERT_KEY);
		assert!(h.vault.get_client_certificate(&store.public_id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn rejected_token_creates_nothing() {
		let h = TestHarness::new().await;
		h.engine.push_lookup(Err(EngineError::TokenInvalid("permission denied".into())));

		let err = h.service().create_store(request("hvs.bad")).await.unwrap_err();
		assert!(matches!(err, CredentialsError::TokenInvalid(_)));
		let scope = ScopeId::parse("p_1234567890").unwrap();
		assert!(h.service().list_stores(&scope).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn invalid_settings_are_rejected_before_any_call() {
		let h = TestHarness::new().await;
		let mut req = request("hvs.x");
		req.settings.vault_address = "vault.example.com".into();
		assert!(matches!(
			h.service().create_store(req).await,
			Err(CredentialsError::Validation(_))
		));

		let mut req = request("hvs.x");
		req.settings.ca_cert = Some(b"garbage".to_vec());
		assert!(h.service().create_store(req).await.is_err());
		assert!(h.engine.calls().is_empty());
	}

	#[tokio::test]
	async fn update_store_requires_current_version() {
		let h = TestHarness::new().await;
		let service = h.service();
		let store = h.seed_store(Some(3600)).await;

		let mut settings = store.settings.clone();
		settings.namespace = Some("team-a".into());
		let updated = service
			.update_store(&store.public_id, settings.clone(), store.version)
			.await
			.unwrap();
		assert_eq!(updated.version, store.version + 1);
		assert_eq!(updated.settings.namespace.as_deref(), Some("team-a"));

		let err = service
			.update_store(&store.public_id, settings, store.version)
			.await
			.unwrap_err();
		assert!(matches!(err, CredentialsError::Conflict(_)));
	}

	#[tokio::test]
	async fn delete_store_removes_everything() {
		let h = TestHarness::new().await;
		let service = h.service();
		let store = h.seed_store(Some(3600)).await;
		let library = h.seed_library(&store.public_id).await;

		assert!(service.delete_store(&store.public_id).await.unwrap());
		assert!(!service.delete_store(&store.public_id).await.unwrap());
		assert!(matches!(
			service.get_store(&store.public_id).await,
			Err(CredentialsError::NotFound(_))
		));
		assert!(h.leases.get_library(&library).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn library_validation() {
		let h = TestHarness::new().await;
		let service = h.service();
		let store = h.seed_store(Some(3600)).await;
		let base = CreateLibraryRequest {
			store_id: store.public_id.clone(),
			name: Some("db".into()),
			description: None,
			vault_path: "/database/creds/app".into(),
			http_method: HttpMethod::Get,
			http_request_body: None,
		};

		let created = service.create_library(base.clone()).await.unwrap();
		assert_eq!(created.vault_path, "database/creds/app");

		let mut body_on_get = base.clone();
		body_on_get.name = Some("db2".into());
		body_on_get.http_request_body = Some("{}".into());
		assert!(matches!(
			service.create_library(body_on_get.clone()).await,
			Err(CredentialsError::Validation(_))
		));
		body_on_get.http_method = HttpMethod::Post;
		assert!(service.create_library(body_on_get).await.is_ok());

		let mut unknown = base.clone();
		unknown.store_id = StoreId::generate();
		assert!(matches!(
			service.create_library(unknown).await,
			Err(CredentialsError::NotFound(_))
		));
		assert_eq!(service.list_libraries(&store.public_id).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn slots_open_once() {
		let h = TestHarness::new().await;
		let service = h.service();
		let store = h.seed_store(Some(3600)).await;
		let library = h.seed_library(&store.public_id).await;
		let session = SessionId::generate();

		service
			.open_session_slot(&session, &library, CredentialPurpose::Brokered)
			.await
			.unwrap();
		assert!(matches!(
			service
				.open_session_slot(&session, &library, CredentialPurpose::Brokered)
				.await,
			Err(CredentialsError::Conflict(_))
		));
		service
			.open_session_slot(&session, &library, CredentialPurpose::Injected)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn infinite_root_token_is_accepted() {
		let h = TestHarness::new().await;
		h.engine.push_lookup(Ok(TokenLease {
			ttl: None,
			renewable: false,
		}));
		let store = h.service().create_store(request("hvs.root")).await.unwrap();
		assert!(!h.usable_token(&store.public_id).await.expiration.is_finite());
	}
}
