// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder pool configuration.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Decoder worker layout and translation-memory behaviour.
///
/// When `gpus` is set the pool holds one worker per listed device and
/// `threads` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_layout"))]
pub struct DecoderConfig {
    /// Number of CPU workers. None = available parallelism.
    #[validate(range(min = 1))]
    pub threads: Option<usize>,

    /// GPU device ids, one worker each.
    pub gpus: Option<Vec<u32>>,

    /// Maximum number of translation-memory suggestions fetched per sentence.
    pub suggestions_limit: usize,

    /// Return the best suggestion verbatim instead of decoding.
    pub echo_server: bool,
}

impl DecoderConfig {
    /// Number of worker slots the pool will hold.
    pub fn worker_slots(&self) -> usize {
        match &self.gpus {
            Some(gpus) => gpus.len(),
            None => self.threads.unwrap_or_else(default_threads),
        }
    }

    pub fn uses_gpus(&self) -> bool {
        self.gpus.is_some()
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: None,
            gpus: None,
            suggestions_limit: 4,
            echo_server: false,
        }
    }
}

fn validate_layout(config: &DecoderConfig) -> Result<(), ValidationError> {
    if let Some(gpus) = &config.gpus {
        if gpus.is_empty() {
            return Err(ValidationError::new("empty_gpu_list"));
        }
        let mut sorted = gpus.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != gpus.len() {
            return Err(ValidationError::new("duplicate_gpu_id"));
        }
    }
    Ok(())
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
