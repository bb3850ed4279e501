// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder workers and the pool that lends them out.
//!
//! A [`DecoderWorker`] is the only boundary to the inference backend. Workers
//! are bound to one device (a CPU slot or a GPU) and a fixed set of language
//! directions. The [`DecoderWorkerPool`] hands each worker to at most one
//! caller at a time through a [`WorkerLease`].

mod pool;

pub use pool::{Availability, DecoderWorkerPool, WorkerLease};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DecoderError;
use crate::protocols::{LanguageDirection, Sentence, Suggestion, Translation};

/// Hardware a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu(usize),
    Gpu(u32),
}

impl Device {
    /// One device per configured GPU, or one CPU slot per configured thread.
    pub fn from_config(config: &nmt_config::DecoderConfig) -> Vec<Device> {
        match &config.gpus {
            Some(gpus) => gpus.iter().copied().map(Device::Gpu).collect(),
            None => (0..config.worker_slots()).map(Device::Cpu).collect(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu(slot) => write!(f, "cpu:{slot}"),
            Device::Gpu(id) => write!(f, "gpu:{id}"),
        }
    }
}

/// Position of a worker in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A decoder process or model instance.
///
/// Both batch calls must return exactly one translation per input sentence,
/// in input order.
pub trait DecoderWorker: Send + 'static {
    fn device(&self) -> Device;

    /// Directions this worker can serve. Fixed for the worker's lifetime.
    fn directions(&self) -> &[LanguageDirection];

    fn supports(&self, direction: &LanguageDirection) -> bool {
        self.directions().contains(direction)
    }

    /// Translates a batch. `alternatives`, when given, holds the number of
    /// n-best alternatives wanted for each sentence.
    fn translate(
        &mut self,
        direction: &LanguageDirection,
        sentences: &[Arc<Sentence>],
        suggestions: Option<&[Suggestion]>,
        alternatives: Option<&[usize]>,
    ) -> Result<Vec<Translation>, DecoderError>;

    /// Aligns each sentence with its reference translation.
    fn align(
        &mut self,
        direction: &LanguageDirection,
        sentences: &[Arc<Sentence>],
        references: &[Arc<Sentence>],
    ) -> Result<Vec<Translation>, DecoderError>;

    /// Whether the backend is still usable. Checked every time the worker is returned.
    fn is_alive(&self) -> bool {
        true
    }

    /// Brings a dead worker back. Called off the request path.
    fn restart(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }

    /// Releases backend resources when the pool closes.
    fn shutdown(&mut self) {}
}
