// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	DatabaseConfigLayer, EngineConfigLayer, KeysConfigLayer, LoggingConfigLayer, RenewalConfigLayer,
};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub engine: Option<EngineConfigLayer>,
	#[serde(default)]
	pub renewal: Option<RenewalConfigLayer>,
	#[serde(default)]
	pub keys: Option<KeysConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(
			&mut self.database,
			other.database,
			DatabaseConfigLayer::merge,
		);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_option(&mut self.engine, other.engine, EngineConfigLayer::merge);
		merge_option(&mut self.renewal, other.renewal, RenewalConfigLayer::merge);
		merge_option(&mut self.keys, other.keys, KeysConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
