// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NMT Configuration Library
//!
//! Centralized configuration for the admission queue, the batching scheduler,
//! the decoder pool and per-request limits.

mod decoder;
mod queue;
mod request;
mod scheduler;

pub use decoder::DecoderConfig;
pub use queue::QueueConfig;
pub use request::RequestConfig;
pub use scheduler::SchedulerConfig;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Json, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// System-wide configuration file, lowest-priority file source.
pub const SYSTEM_CONFIG_PATH: &str = "/opt/nmt/etc/nmt.toml";

/// Environment variable naming an additional TOML file.
pub const CONFIG_PATH_ENV: &str = "NMT_CONFIG_PATH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Configuration error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NmtConfig {
    #[validate(nested)]
    #[serde(default)]
    pub queue: QueueConfig,

    #[validate(nested)]
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[validate(nested)]
    #[serde(default)]
    pub decoder: DecoderConfig,

    #[validate(nested)]
    #[serde(default)]
    pub request: RequestConfig,
}

impl NmtConfig {
    /// Create a Figment configuration with all sources merged.
    ///
    /// Configuration sources in priority order (lowest to highest):
    /// 1. Code defaults
    /// 2. System config file at /opt/nmt/etc/nmt.toml
    /// 3. TOML file from NMT_CONFIG_PATH environment variable
    /// 4. Environment variables (NMT_* prefixed)
    pub fn figment() -> Figment {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(NmtConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH))
            .merge(Toml::file(&config_path))
            // NMT_QUEUE_HIGH, NMT_QUEUE_NORMAL, NMT_QUEUE_BACKGROUND
            .merge(
                Env::prefixed("NMT_QUEUE_")
                    .map(|k| format!("queue.{}", k.as_str().to_lowercase()).into()),
            )
            // NMT_SCHEDULER_MAX_BATCH_SIZE, NMT_SCHEDULER_MAX_BATCH_WAIT_MS, etc.
            .merge(
                Env::prefixed("NMT_SCHEDULER_")
                    .map(|k| format!("scheduler.{}", k.as_str().to_lowercase()).into()),
            )
            // NMT_DECODER_THREADS, NMT_DECODER_GPUS ("[0,1]"), NMT_DECODER_ECHO_SERVER
            .merge(
                Env::prefixed("NMT_DECODER_")
                    .map(|k| format!("decoder.{}", k.as_str().to_lowercase()).into()),
            )
            // NMT_REQUEST_MAX_SPLIT_LENGTH, NMT_REQUEST_NORMAL_TIMEOUT_MS, etc.
            .merge(
                Env::prefixed("NMT_REQUEST_")
                    .map(|k| format!("request.{}", k.as_str().to_lowercase()).into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract configuration from any provider and validate it.
    ///
    /// # Example
    /// ```rust,ignore
    /// let config = NmtConfig::extract_from(
    ///     NmtConfig::figment()
    ///         .merge(("scheduler.max_batch_size", 8usize))
    ///         .merge(("decoder.threads", 2usize))
    /// )?;
    /// ```
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a figment from defaults, then merge a custom provider with highest priority.
    pub fn figment_with<T: Provider>(extra: T) -> Figment {
        Self::figment().merge(extra)
    }

    /// Load configuration with JSON overrides on top of every other source.
    ///
    /// ```rust,ignore
    /// let json = r#"{"queue": {"high": 16}, "decoder": {"gpus": [0, 1]}}"#;
    /// let config = NmtConfig::from_figment_with_json(json)?;
    /// ```
    pub fn from_figment_with_json(json: &str) -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment().merge(Json::string(json)))
    }
}

/// Lets an `NmtConfig` act as a configuration source so dependent crates can
/// extract their own settings from the same Figment.
impl Provider for NmtConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("NmtConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}
