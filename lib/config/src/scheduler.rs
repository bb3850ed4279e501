// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Batching configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Controls how queued splits are coalesced into decoder jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of splits in one job.
    #[validate(range(min = 1, max = 4096))]
    pub max_batch_size: usize,

    /// How long the oldest split of a partial batch may wait for company, in milliseconds.
    pub max_batch_wait_ms: u64,

    /// Allow splits with different suggestion sets to share a job.
    /// Their suggestions are merged into one set.
    pub batch_suggestions: bool,

    /// Upper bound on the merged suggestion set of one job.
    #[validate(range(min = 1))]
    pub max_batch_suggestions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            max_batch_wait_ms: 5,
            batch_suggestions: true,
            max_batch_suggestions: 64,
        }
    }
}
