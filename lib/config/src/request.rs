// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request admission configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-request limits applied at submission time.
///
/// Timeouts are in milliseconds; `0` disables the deadline for that priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RequestConfig {
    /// Longest split handed to a decoder, in words.
    #[validate(range(min = 1))]
    pub max_split_length: usize,

    pub high_timeout_ms: u64,
    pub normal_timeout_ms: u64,
    pub background_timeout_ms: u64,
}

impl RequestConfig {
    /// Default deadlines ordered from highest to lowest priority.
    pub fn timeouts(&self) -> [Option<Duration>; 3] {
        [
            self.high_timeout_ms,
            self.normal_timeout_ms,
            self.background_timeout_ms,
        ]
        .map(|ms| (ms > 0).then(|| Duration::from_millis(ms)))
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_split_length: 100,
            high_timeout_ms: 10_000,
            normal_timeout_ms: 30_000,
            background_timeout_ms: 0,
        }
    }
}
