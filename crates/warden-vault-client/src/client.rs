// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vault HTTP client.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use warden_common_secret::SecretString;
use warden_credentials_core::{
	DynamicSecret, EngineConnection, EngineResult, HttpMethod, LibraryRequest, SecretEngine,
	TokenLease,
};

use crate::error::{VaultClientError, VaultClientResult};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const REQUEST_HEADER: &str = "X-Vault-Request";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings that are not part of a store's connection record.
#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub timeout: Duration,
	/// Permit `http://` addresses. Intended for local development only.
	pub allow_insecure: bool,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
			allow_insecure: false,
		}
	}
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
	data: LookupData,
}

#[derive(Debug, Deserialize)]
struct LookupData {
	#[serde(default)]
	ttl: u64,
	#[serde(default)]
	renewable: bool,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
	auth: AuthData,
}

#[derive(Debug, Deserialize)]
struct AuthData {
	#[serde(default)]
	lease_duration: u64,
	#[serde(default)]
	renewable: bool,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
	#[serde(default)]
	lease_id: String,
	#[serde(default)]
	lease_duration: u64,
	#[serde(default)]
	renewable: bool,
	#[serde(default)]
	data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
	#[serde(default)]
	errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RevokeLeaseRequest<'a> {
	lease_id: &'a str,
}

/// A connection to one Vault server on behalf of one credential store.
pub struct VaultClient {
	http_client: reqwest::Client,
	base_url: String,
	namespace: Option<String>,
}

impl VaultClient {
	/// Build a client for `connection`.
	///
	/// # Security
	///
	/// `https://` is required unless `options.allow_insecure` is set. The
	/// client identity, if any, is presented for mutual TLS.
	pub fn new(connection: &EngineConnection, options: &ClientOptions) -> VaultClientResult<Self> {
		let address = connection.address.trim().trim_end_matches('/');
		let url = reqwest::Url::parse(address)
			.map_err(|e| VaultClientError::Configuration(format!("invalid vault address: {e}")))?;

		match url.scheme() {
			"https" => {}
			"http" if options.allow_insecure => {}
			"http" => {
				return Err(VaultClientError::Configuration(
					"vault address must use HTTPS (set allow_insecure for development)".into(),
				))
			}
			other => {
				return Err(VaultClientError::Configuration(format!(
					"unsupported vault address scheme: {other}"
				)))
			}
		}

		let mut builder = reqwest::Client::builder()
			.timeout(options.timeout)
			.redirect(reqwest::redirect::Policy::none())
			.use_rustls_tls();

		if let Some(ca_cert) = &connection.ca_cert {
			let certs = reqwest::Certificate::from_pem_bundle(ca_cert).map_err(|e| {
				VaultClientError::Configuration(format!("invalid CA certificate: {e}"))
			})?;
			if certs.is_empty() {
				return Err(VaultClientError::Configuration(
					"CA certificate bundle contains no certificates".into(),
				));
			}
			for cert in certs {
				builder = builder.add_root_certificate(cert);
			}
		}

		if let Some(identity) = &connection.client_identity {
			let mut pem = identity.certificate.clone();
			pem.push(b'\n');
			pem.extend_from_slice(identity.key.expose().as_bytes());
			let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
				VaultClientError::Configuration(format!("invalid client certificate: {e}"))
			})?;
			builder = builder.identity(identity);
		}

		if connection.tls_skip_verify {
			warn!(address = %address, "TLS verification disabled for vault connection");
			builder = builder.danger_accept_invalid_certs(true);
		}

		let mut base_url = address.to_string();
		if let Some(server_name) = connection
			.tls_server_name
			.as_deref()
			.filter(|s| !s.trim().is_empty())
		{
			let (resolved_url, host) = override_server_name(&url, server_name)?;
			builder = builder.dns_resolver(Arc::new(ServerNameResolver {
				server_name: server_name.to_string(),
				host,
			}));
			base_url = resolved_url;
		}

		let http_client = builder.build().map_err(|e| {
			VaultClientError::Configuration(format!("failed to create HTTP client: {e}"))
		})?;

		Ok(Self {
			http_client,
			base_url,
			namespace: connection.namespace.clone().filter(|n| !n.trim().is_empty()),
		})
	}

	fn request(&self, method: Method, path: &str, token: &SecretString) -> reqwest::RequestBuilder {
		let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
		let mut request = self
			.http_client
			.request(method, url)
			.header(TOKEN_HEADER, token.expose().as_str())
			.header(REQUEST_HEADER, "true");
		if let Some(namespace) = &self.namespace {
			request = request.header(NAMESPACE_HEADER, namespace.as_str());
		}
		request
	}

	/// `GET auth/token/lookup-self`
	#[instrument(skip(self, token))]
	pub async fn lookup_self(&self, token: &SecretString) -> VaultClientResult<TokenLease> {
		let response = self
			.request(Method::GET, "auth/token/lookup-self", token)
			.send()
			.await?;
		let body: LookupResponse = parse_json(response).await?;

		Ok(TokenLease {
			ttl: non_zero_secs(body.data.ttl),
			renewable: body.data.renewable,
		})
	}

	/// `POST auth/token/renew-self`
	#[instrument(skip(self, token))]
	pub async fn renew_self(&self, token: &SecretString) -> VaultClientResult<TokenLease> {
		let response = self
			.request(Method::POST, "auth/token/renew-self", token)
			.json(&serde_json::json!({}))
			.send()
			.await?;
		let body: AuthResponse = parse_json(response).await?;

		debug!(lease_duration = body.auth.lease_duration, "token renewed");
		Ok(TokenLease {
			ttl: non_zero_secs(body.auth.lease_duration),
			renewable: body.auth.renewable,
		})
	}

	/// `POST auth/token/revoke-self`
	#[instrument(skip(self, token))]
	pub async fn revoke_self(&self, token: &SecretString) -> VaultClientResult<()> {
		let response = self
			.request(Method::POST, "auth/token/revoke-self", token)
			.send()
			.await?;
		expect_success(response).await
	}

	/// Read (`GET`) or write (`POST`) a library path to mint a secret.
	#[instrument(skip(self, token, request), fields(path = %request.path, method = %request.method))]
	pub async fn read_secret(
		&self,
		token: &SecretString,
		request: &LibraryRequest,
	) -> VaultClientResult<DynamicSecret> {
		let builder = match request.method {
			HttpMethod::Get => self.request(Method::GET, &request.path, token),
			HttpMethod::Post => {
				let builder = self.request(Method::POST, &request.path, token);
				match &request.body {
					Some(body) => builder
						.header(reqwest::header::CONTENT_TYPE, "application/json")
						.body(body.clone()),
					None => builder,
				}
			}
		};

		let response = builder.send().await?;
		if response.status() == StatusCode::NO_CONTENT {
			return Err(VaultClientError::InvalidResponse(format!(
				"no secret returned from {}",
				request.path
			)));
		}
		let body: SecretResponse = parse_json(response).await?;
		let value = serde_json::to_string(&body.data)
			.map_err(|e| VaultClientError::InvalidResponse(e.to_string()))?;

		Ok(DynamicSecret {
			external_id: body.lease_id,
			value: SecretString::new(value),
			renewable: body.renewable,
			lease_duration: non_zero_secs(body.lease_duration),
		})
	}

	/// `PUT sys/leases/revoke`
	#[instrument(skip(self, token))]
	pub async fn revoke_lease(&self, token: &SecretString, lease_id: &str) -> VaultClientResult<()> {
		let response = self
			.request(Method::PUT, "sys/leases/revoke", token)
			.json(&RevokeLeaseRequest { lease_id })
			.send()
			.await?;
		expect_success(response).await
	}
}

#[async_trait]
impl SecretEngine for VaultClient {
	async fn lookup_token(&self, token: &SecretString) -> EngineResult<TokenLease> {
		Ok(self.lookup_self(token).await?)
	}

	async fn renew_token(&self, token: &SecretString) -> EngineResult<TokenLease> {
		Ok(self.renew_self(token).await?)
	}

	async fn revoke_token(&self, token: &SecretString) -> EngineResult<()> {
		Ok(self.revoke_self(token).await?)
	}

	async fn issue_dynamic_secret(
		&self,
		token: &SecretString,
		request: &LibraryRequest,
	) -> EngineResult<DynamicSecret> {
		Ok(self.read_secret(token, request).await?)
	}

	async fn revoke_lease(&self, token: &SecretString, lease_id: &str) -> EngineResult<()> {
		Ok(VaultClient::revoke_lease(self, token, lease_id).await?)
	}
}

impl std::fmt::Debug for VaultClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VaultClient")
			.field("base_url", &self.base_url)
			.field("namespace", &self.namespace)
			.finish()
	}
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
	(secs > 0).then(|| Duration::from_secs(secs))
}

/// Point the base URL at `server_name`, so certificate verification uses
/// it. Returns the new base URL and the configured host to connect to.
fn override_server_name(
	url: &reqwest::Url,
	server_name: &str,
) -> VaultClientResult<(String, String)> {
	let host = url
		.host_str()
		.ok_or_else(|| VaultClientError::Configuration("vault address has no host".into()))?
		.trim_start_matches('[')
		.trim_end_matches(']')
		.to_string();

	let mut rewritten = url.clone();
	rewritten
		.set_host(Some(server_name))
		.map_err(|e| VaultClientError::Configuration(format!("invalid TLS server name: {e}")))?;
	let base = rewritten.as_str().trim_end_matches('/').to_string();
	Ok((base, host))
}

/// Resolves `server_name` to the configured vault host at connect time.
/// Other names resolve as usual. Lookups run on tokio's resolver.
struct ServerNameResolver {
	server_name: String,
	host: String,
}

impl reqwest::dns::Resolve for ServerNameResolver {
	fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
		let target = if name.as_str().eq_ignore_ascii_case(&self.server_name) {
			self.host.clone()
		} else {
			name.as_str().to_string()
		};
		Box::pin(async move {
			// Port 0 lets the connector use the port from the URL.
			let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.as_str(), 0))
				.await
				.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?
				.collect();
			let addrs: reqwest::dns::Addrs = Box::new(addrs.into_iter());
			Ok(addrs)
		})
	}
}

async fn parse_json<T: serde::de::DeserializeOwned>(
	response: reqwest::Response,
) -> VaultClientResult<T> {
	let status = response.status();
	if !status.is_success() {
		return Err(status_error(status, response).await);
	}
	response
		.json()
		.await
		.map_err(|e| VaultClientError::InvalidResponse(e.to_string()))
}

async fn expect_success(response: reqwest::Response) -> VaultClientResult<()> {
	let status = response.status();
	if status.is_success() {
		Ok(())
	} else {
		Err(status_error(status, response).await)
	}
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> VaultClientError {
	let body = response.text().await.unwrap_or_default();
	let message = match serde_json::from_str::<ErrorResponse>(&body) {
		Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
		_ => sanitize_body_for_error(&body, 200),
	};
	warn!(status = %status, "vault request failed");
	VaultClientError::Status { status, message }
}

fn sanitize_body_for_error(body: &str, max_len: usize) -> String {
	let sanitized: String = body
		.chars()
		.filter(|c| !c.is_control() || *c == ' ')
		.take(max_len)
		.collect();
	if body.chars().count() > max_len {
		format!("{sanitized}...")
	} else {
		sanitized
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_credentials_core::EngineError;
	use wiremock::matchers::{body_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn insecure() -> ClientOptions {
		ClientOptions {
			timeout: Duration::from_secs(5),
			allow_insecure: true,
		}
	}

	fn token() -> SecretString {
		SecretString::new("hvs.test-token".to_string())
	}

	async fn client_for(server: &MockServer, namespace: Option<&str>) -> VaultClient {
		let connection = EngineConnection {
			address: server.uri(),
			namespace: namespace.map(str::to_string),
			..Default::default()
		};
		VaultClient::new(&connection, &insecure()).unwrap()
	}

	#[test]
	fn rejects_http_without_allow_insecure() {
		let connection = EngineConnection {
			address: "http://vault.local:8200".to_string(),
			..Default::default()
		};
		let err = VaultClient::new(&connection, &ClientOptions::default()).unwrap_err();
		assert!(matches!(err, VaultClientError::Configuration(_)));
	}

	#[test]
	fn rejects_garbage_ca_cert() {
		let connection = EngineConnection {
			address: "https://vault.local:8200".to_string(),
			ca_cert: Some(b"not a pem".to_vec()),
			..Default::default()
		};
		assert!(VaultClient::new(&connection, &ClientOptions::default()).is_err());
	}

	#[test]
	fn server_name_override_keeps_port() {
		let url = reqwest::Url::parse("https://127.0.0.1:8200").unwrap();
		let (base, host) = override_server_name(&url, "vault.internal").unwrap();
		assert_eq!(base, "https://vault.internal:8200");
		assert_eq!(host, "127.0.0.1");
	}

	#[test]
	fn server_name_override_does_not_resolve_eagerly() {
		let connection = EngineConnection {
			address: "https://vault.does-not-exist.invalid:8200".to_string(),
			tls_server_name: Some("vault.internal".to_string()),
			..Default::default()
		};
		assert!(VaultClient::new(&connection, &ClientOptions::default()).is_ok());
	}

	#[tokio::test]
	async fn server_name_override_connects_to_configured_host() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/auth/token/lookup-self"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"data": { "ttl": 60, "renewable": true }
			})))
			.mount(&server)
			.await;

		let connection = EngineConnection {
			address: server.uri(),
			tls_server_name: Some("vault.internal".to_string()),
			..Default::default()
		};
		let client = VaultClient::new(&connection, &insecure()).unwrap();
		assert!(client.base_url.starts_with("http://vault.internal:"));

		let lease = client.lookup_self(&token()).await.unwrap();
		assert_eq!(lease.ttl, Some(Duration::from_secs(60)));
	}

	#[test]
	fn debug_does_not_leak_token() {
		let connection = EngineConnection {
			address: "https://vault.local:8200".to_string(),
			..Default::default()
		};
		let client = VaultClient::new(&connection, &ClientOptions::default()).unwrap();
		assert!(!format!("{client:?}").contains("hvs."));
	}

	#[tokio::test]
	async fn lookup_reports_ttl_and_sends_headers() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/auth/token/lookup-self"))
			.and(header("X-Vault-Token", "hvs.test-token"))
			.and(header("X-Vault-Namespace", "team-a"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"data": { "ttl": 3600, "renewable": true }
			})))
			.mount(&server)
			.await;

		let client = client_for(&server, Some("team-a")).await;
		let lease = client.lookup_token(&token()).await.unwrap();
		assert_eq!(lease.ttl, Some(Duration::from_secs(3600)));
		assert!(lease.renewable);
	}

	#[tokio::test]
	async fn zero_ttl_means_never_expires() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/auth/token/lookup-self"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"data": { "ttl": 0, "renewable": false }
			})))
			.mount(&server)
			.await;

		let lease = client_for(&server, None).await.lookup_token(&token()).await.unwrap();
		assert_eq!(lease.ttl, None);
	}

	#[tokio::test]
	async fn renew_returns_new_lease() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/auth/token/renew-self"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"auth": { "lease_duration": 7200, "renewable": true }
			})))
			.mount(&server)
			.await;

		let lease = client_for(&server, None).await.renew_token(&token()).await.unwrap();
		assert_eq!(lease.ttl, Some(Duration::from_secs(7200)));
	}

	#[tokio::test]
	async fn forbidden_renewal_is_token_invalid() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/auth/token/renew-self"))
			.respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
				"errors": ["permission denied"]
			})))
			.mount(&server)
			.await;

		let err = client_for(&server, None).await.renew_token(&token()).await.unwrap_err();
		match err {
			EngineError::TokenInvalid(msg) => assert!(msg.contains("permission denied")),
			other => panic!("expected TokenInvalid, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn unavailable_vault_is_transient() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/auth/token/renew-self"))
			.respond_with(ResponseTemplate::new(503).set_body_string("sealed"))
			.mount(&server)
			.await;

		let err = client_for(&server, None).await.renew_token(&token()).await.unwrap_err();
		assert!(err.is_transient());
	}

	#[tokio::test]
	async fn unreachable_vault_is_transient() {
		let connection = EngineConnection {
			address: "http://127.0.0.1:1".to_string(),
			..Default::default()
		};
		let client = VaultClient::new(&connection, &insecure()).unwrap();
		let err = client.renew_token(&token()).await.unwrap_err();
		assert!(err.is_transient());
	}

	#[tokio::test]
	async fn issues_dynamic_secret_via_get() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/database/creds/readonly"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"lease_id": "database/creds/readonly/abc123",
				"lease_duration": 300,
				"renewable": true,
				"data": { "username": "v-token-readonly", "password": "s3cr3t" }
			})))
			.mount(&server)
			.await;

		let request = LibraryRequest {
			path: "database/creds/readonly".to_string(),
			method: HttpMethod::Get,
			body: None,
		};
		let secret = client_for(&server, None)
			.await
			.issue_dynamic_secret(&token(), &request)
			.await
			.unwrap();
		assert_eq!(secret.external_id, "database/creds/readonly/abc123");
		assert_eq!(secret.lease_duration, Some(Duration::from_secs(300)));
		assert!(secret.renewable);
		assert!(secret.value.expose().contains("v-token-readonly"));
	}

	#[tokio::test]
	async fn issues_dynamic_secret_via_post_with_body() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/pki/issue/web"))
			.and(body_json(serde_json::json!({ "common_name": "web.internal" })))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"lease_id": "",
				"lease_duration": 0,
				"renewable": false,
				"data": { "certificate": "-----BEGIN CERTIFICATE-----" }
			})))
			.mount(&server)
			.await;

		let request = LibraryRequest {
			path: "pki/issue/web".to_string(),
			method: HttpMethod::Post,
			body: Some(r#"{"common_name":"web.internal"}"#.to_string()),
		};
		let secret = client_for(&server, None)
			.await
			.issue_dynamic_secret(&token(), &request)
			.await
			.unwrap();
		assert_eq!(secret.lease_duration, None);
		assert!(!secret.renewable);
	}

	#[tokio::test]
	async fn unknown_path_is_rejected() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/nope"))
			.respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
				"errors": []
			})))
			.mount(&server)
			.await;

		let request = LibraryRequest {
			path: "nope".to_string(),
			method: HttpMethod::Get,
			body: None,
		};
		let err = client_for(&server, None)
			.await
			.issue_dynamic_secret(&token(), &request)
			.await
			.unwrap_err();
		assert!(matches!(err, EngineError::Rejected(_)));
	}

	#[tokio::test]
	async fn revokes_lease_and_token() {
		let server = MockServer::start().await;
		Mock::given(method("PUT"))
			.and(path("/v1/sys/leases/revoke"))
			.and(body_json(serde_json::json!({ "lease_id": "db/creds/x/1" })))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/v1/auth/token/revoke-self"))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, None).await;
		SecretEngine::revoke_lease(&client, &token(), "db/creds/x/1")
			.await
			.unwrap();
		client.revoke_token(&token()).await.unwrap();
	}

	#[test]
	fn sanitize_truncates_long_bodies() {
		let body = "x".repeat(300);
		let out = sanitize_body_for_error(&body, 200);
		assert_eq!(out.len(), 203);
		assert!(out.ends_with("..."));
	}
}
