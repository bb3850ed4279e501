// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduling core of a machine translation node.
//!
//! A request enters through [`TranslationService::submit`], is cut into
//! decoder-sized [`scheduler::TranslationSplit`]s and queued by priority. The
//! [`Scheduler`] batches compatible splits into [`scheduler::Job`]s, executor
//! threads run each job on a worker checked out from the
//! [`DecoderWorkerPool`], and the [`joiner`] reassembles the per-split results
//! into one [`Translation`]. Directions the local pool cannot serve are
//! forwarded to cluster peers by [`dispatch::DistributedTranslator`].

pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod joiner;
pub mod logging;
pub mod memory;
pub mod protocols;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod splitter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use decoder::{DecoderWorker, DecoderWorkerPool, Device};
pub use error::{DecoderError, TranslationError};
pub use protocols::{LanguageDirection, Priority, Sentence, Suggestion, Translation, Word};
pub use queue::PriorityBoundedQueue;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use service::{PendingTranslation, ServiceOptions, TranslationRequest, TranslationService};

pub use nmt_config::NmtConfig;
