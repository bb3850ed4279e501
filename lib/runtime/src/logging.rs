// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! The level comes from `NMT_LOG` (default `info`). Per-target levels can be
//! set in a TOML file, read from `/opt/nmt/etc/logging.toml` and then from the
//! file named by `NMT_LOGGING_CONFIG_PATH`:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "nmt_runtime::scheduler" = "debug"
//! ```
//!
//! `NMT_LOGGING_JSONL=1` switches to JSON lines, `NMT_LOG_USE_LOCAL_TZ=1`
//! stamps events in local time and `NMT_DISABLE_ANSI_LOGGING=1` drops colors.

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt};

const FILTER_ENV: &str = "NMT_LOG";

const DEFAULT_FILTER_LEVEL: &str = "info";

const CONFIG_PATH_ENV: &str = "NMT_LOGGING_CONFIG_PATH";

const SYSTEM_CONFIG_PATH: &str = "/opt/nmt/etc/logging.toml";

static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::new(),
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter_layer = filters(load_config());
    let timer = TimeFormatter::new();

    // Each builder method returns a specialized type, hence the duplication.
    let installed = if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .with_current_span(true)
            .with_timer(timer)
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    } else {
        let l = fmt::layer()
            .with_ansi(!disable_ansi_logging())
            .event_format(fmt::format().compact().with_timer(timer))
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    };

    if let Err(e) = installed {
        eprintln!("Logging not initialized, a global subscriber is already set: {e}");
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config.log_level.parse::<Directive>().unwrap_or_else(|e| {
        eprintln!(
            "Failed parsing log level '{}': {e}; using {DEFAULT_FILTER_LEVEL}",
            config.log_level
        );
        tracing::Level::INFO.into()
    });

    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH));
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        figment = figment.merge(Toml::file(path));
    }

    figment.extract().unwrap_or_else(|e| {
        eprintln!("Invalid logging configuration, using defaults: {e}");
        LoggingConfig::default()
    })
}

/// Check if an environment variable is truthy
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Check if a string is truthy: `1`, `true`, `on` or `yes`, case-insensitively.
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Set `NMT_LOGGING_JSONL` to a [`is_truthy`] value for JSON lines output.
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy("NMT_LOGGING_JSONL")
}

pub fn disable_ansi_logging() -> bool {
    env_is_truthy("NMT_DISABLE_ANSI_LOGGING")
}

pub fn use_local_timezone() -> bool {
    env_is_truthy("NMT_LOG_USE_LOCAL_TZ")
}

struct TimeFormatter {
    use_local_tz: bool,
}

impl TimeFormatter {
    fn new() -> Self {
        Self {
            use_local_tz: use_local_timezone(),
        }
    }

    fn format_now(&self) -> String {
        if self.use_local_tz {
            chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
                .to_string()
        } else {
            chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string()
        }
    }
}

impl FormatTime for TimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.format_now())
    }
}
