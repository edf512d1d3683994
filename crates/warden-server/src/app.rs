// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use anyhow::Context;
use std::sync::Arc;
use warden_credentials_core::{Clock, EngineConnector, SystemClock};
use warden_server_config::{RenewalConfig, ServerConfig};
use warden_server_credentials::{
	ClientCertificateRotator, CredentialIssuer, CredentialStoreService, KeyService, RenewalPolicy,
	RootKeyService, ScheduleNotifier, TokenLifecycleManager,
};
use warden_server_db::{create_pool, run_migrations, LeaseRepository, VaultRepository};
use warden_server_jobs::{RenewalScheduler, SchedulerConfig};
use warden_vault_client::{ClientOptions, VaultConnector};

/// The assembled services of a running broker.
pub struct Warden {
	pub stores: Arc<CredentialStoreService>,
	pub lifecycle: Arc<TokenLifecycleManager>,
	pub issuer: Arc<CredentialIssuer>,
	pub scheduler: Arc<RenewalScheduler>,
}

impl Warden {
	/// Open the database, load the root key and wire every service.
	pub async fn build(config: &ServerConfig) -> anyhow::Result<Self> {
		let pool = create_pool(&config.database.url)
			.await
			.context("opening database")?;
		run_migrations(&pool).await.context("running migrations")?;

		let keys = RootKeyService::from_base64(
			config.keys.key_id.clone(),
			config.keys.root_key.expose(),
		)
		.context("loading root key")?;

		let connector = VaultConnector::new(ClientOptions {
			timeout: config.engine.request_timeout(),
			allow_insecure: config.engine.allow_insecure,
		});

		Self::assemble(
			Arc::new(VaultRepository::new(pool.clone())),
			Arc::new(LeaseRepository::new(pool)),
			Arc::new(connector),
			Arc::new(keys),
			Arc::new(SystemClock),
			config,
		)
	}

	fn assemble(
		vault: Arc<VaultRepository>,
		leases: Arc<LeaseRepository>,
		connector: Arc<dyn EngineConnector>,
		keys: Arc<dyn KeyService>,
		clock: Arc<dyn Clock>,
		config: &ServerConfig,
	) -> anyhow::Result<Self> {
		let policy = renewal_policy(config);
		let notifier = ScheduleNotifier::new();

		let lifecycle = Arc::new(TokenLifecycleManager::new(
			vault.clone(),
			connector.clone(),
			keys.clone(),
			clock.clone(),
			policy.clone(),
			notifier.clone(),
		));
		let issuer = Arc::new(CredentialIssuer::new(
			leases.clone(),
			vault.clone(),
			connector,
			keys.clone(),
			clock.clone(),
			policy,
			notifier.clone(),
		));
		let certificates = Arc::new(ClientCertificateRotator::new(
			vault.clone(),
			keys,
			clock.clone(),
		));
		let stores = Arc::new(CredentialStoreService::new(
			vault,
			leases,
			lifecycle.clone(),
			certificates,
			clock.clone(),
		));
		let scheduler = Arc::new(
			RenewalScheduler::new(
				lifecycle.clone(),
				issuer.clone(),
				clock,
				notifier,
				scheduler_config(&config.renewal),
			)
			.context("configuring renewal scheduler")?,
		);

		Ok(Self {
			stores,
			lifecycle,
			issuer,
			scheduler,
		})
	}
}

pub fn renewal_policy(config: &ServerConfig) -> RenewalPolicy {
	RenewalPolicy {
		retry_ceiling: config.renewal.retry_ceiling,
		base_backoff: config.renewal.base_backoff(),
		max_backoff: config.renewal.max_backoff(),
		stale_claim_after: config.renewal.stale_claim(),
		request_timeout: config.engine.request_timeout(),
	}
}

pub fn scheduler_config(renewal: &RenewalConfig) -> SchedulerConfig {
	SchedulerConfig {
		min_wake_interval: renewal.min_wake_interval(),
		max_wake_interval: renewal.max_wake_interval(),
	}
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
