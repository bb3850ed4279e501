// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduler configuration.

use std::time::Duration;

use derive_builder::Builder;

use crate::protocols::Priority;

/// Configuration for the scheduler.
///
/// Use [`SchedulerOptions::builder()`] to construct, or convert from the
/// file/env facing [`nmt_config::NmtConfig`]. Every field has a default.
///
/// - `capacities` - admission bucket capacity per priority, highest first
/// - `max_batch_size` - maximum splits per job
/// - `max_batch_wait` - how long the oldest split of a partial batch waits for company
/// - `batch_suggestions` - whether splits with different suggestion sets may share a job
/// - `max_batch_suggestions` - cap on a job's merged suggestion set
#[derive(Debug, Clone, Builder)]
#[builder(
    pattern = "owned",
    build_fn(error = "SchedulerOptionsBuilderError", validate = "Self::validate")
)]
pub struct SchedulerOptions {
    #[builder(default = "[128, 512, 1024]")]
    pub capacities: [usize; Priority::COUNT],

    #[builder(default = "32")]
    pub max_batch_size: usize,

    #[builder(default = "Duration::from_millis(5)")]
    pub max_batch_wait: Duration,

    #[builder(default = "true")]
    pub batch_suggestions: bool,

    #[builder(default = "64")]
    pub max_batch_suggestions: usize,
}

/// Error type for SchedulerOptionsBuilder.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerOptionsBuilderError {
    #[error("Uninitialized field: {0}")]
    UninitializedField(&'static str),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<derive_builder::UninitializedFieldError> for SchedulerOptionsBuilderError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        Self::UninitializedField(e.field_name())
    }
}

impl From<String> for SchedulerOptionsBuilderError {
    fn from(s: String) -> Self {
        Self::ValidationError(s)
    }
}

impl SchedulerOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == Some(0) {
            return Err("max_batch_size must be at least 1".to_string());
        }
        if self.capacities.is_some_and(|c| c.contains(&0)) {
            return Err("every priority bucket needs a capacity of at least 1".to_string());
        }
        Ok(())
    }
}

impl SchedulerOptions {
    pub fn builder() -> SchedulerOptionsBuilder {
        SchedulerOptionsBuilder::default()
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            capacities: [128, 512, 1024],
            max_batch_size: 32,
            max_batch_wait: Duration::from_millis(5),
            batch_suggestions: true,
            max_batch_suggestions: 64,
        }
    }
}

impl From<&nmt_config::NmtConfig> for SchedulerOptions {
    fn from(config: &nmt_config::NmtConfig) -> Self {
        Self {
            capacities: config.queue.capacities(),
            max_batch_size: config.scheduler.max_batch_size,
            max_batch_wait: Duration::from_millis(config.scheduler.max_batch_wait_ms),
            batch_suggestions: config.scheduler.batch_suggestions,
            max_batch_suggestions: config.scheduler.max_batch_suggestions,
        }
    }
}
