// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use warden_credentials_core::{EngineConnection, EngineConnector, EngineResult, SecretEngine};

use crate::client::{ClientOptions, VaultClient};

/// Builds a [`VaultClient`] per store connection.
#[derive(Debug, Clone, Default)]
pub struct VaultConnector {
	options: ClientOptions,
}

impl VaultConnector {
	pub fn new(options: ClientOptions) -> Self {
		Self { options }
	}
}

impl EngineConnector for VaultConnector {
	fn connect(&self, connection: &EngineConnection) -> EngineResult<Arc<dyn SecretEngine>> {
		let client = VaultClient::new(connection, &self.options)?;
		Ok(Arc::new(client))
	}
}
