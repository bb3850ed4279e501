// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission queue configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Bucket capacity for each priority level of the admission queue.
///
/// Every bucket must hold at least one item; a full bucket rejects new
/// submissions at that priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the high priority bucket.
    #[validate(range(min = 1))]
    pub high: usize,

    /// Capacity of the normal priority bucket.
    #[validate(range(min = 1))]
    pub normal: usize,

    /// Capacity of the background priority bucket.
    #[validate(range(min = 1))]
    pub background: usize,
}

impl QueueConfig {
    /// Capacities ordered from highest to lowest priority.
    pub fn capacities(&self) -> [usize; 3] {
        [self.high, self.normal, self.background]
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high: 128,
            normal: 512,
            background: 1024,
        }
    }
}
