// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Operator-tunable channel limits loaded from TOML
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: ChannelConfig, FullAction, ConfigError
//! DEPENDS_ON: serde, toml
//! INVARIANTS: 0 < warn_pending <= max_pending; max_endpoints >= 2
//!
//! Example:
//! ```toml
//! warn_pending = 1024
//! max_pending = 3500
//! full_action = "terminate"
//! max_endpoints = 65536
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default queue depth at which a warning is logged.
pub const DEFAULT_WARN_PENDING: usize = 1024;
/// Default queue depth above which the hard action fires.
pub const DEFAULT_MAX_PENDING: usize = 3500;
/// Default number of endpoints the object arena can hold.
pub const DEFAULT_MAX_ENDPOINTS: usize = 65_536;

/// What happens when a write pushes a queue past `max_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullAction {
    /// Enqueue, then report the writer's process to the resource policy for termination.
    #[default]
    Terminate,
    /// Refuse the write with `ShouldWait`.
    Reject,
}

/// Errors produced while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read channel config {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid TOML for this schema.
    #[error("failed to parse channel config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The values parsed but violate an invariant.
    #[error("invalid channel config: {0}")]
    Invalid(&'static str),
}

/// Channel backpressure and arena limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Queue depth that triggers a warning.
    pub warn_pending: usize,
    /// Queue depth beyond which `full_action` applies.
    pub max_pending: usize,
    /// Hard backpressure action.
    pub full_action: FullAction,
    /// Maximum number of live endpoints.
    pub max_endpoints: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            warn_pending: DEFAULT_WARN_PENDING,
            max_pending: DEFAULT_MAX_PENDING,
            full_action: FullAction::default(),
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
        }
    }
}

impl ChannelConfig {
    /// Parses and validates a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    /// Checks threshold ordering and arena size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warn_pending == 0 {
            return Err(ConfigError::Invalid("warn_pending must be non-zero"));
        }
        if self.warn_pending > self.max_pending {
            return Err(ConfigError::Invalid("warn_pending exceeds max_pending"));
        }
        if self.max_endpoints < 2 {
            return Err(ConfigError::Invalid("max_endpoints must allow one channel pair"));
        }
        Ok(())
    }
}
