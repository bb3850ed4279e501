// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Priority scheduling of translation splits.
//!
//! - **TranslationSplit**: one decoder-sized piece of a request, carrying its
//!   completion channel
//! - **Job**: a batch of compatible splits handed to a single decoder worker
//! - **Scheduler**: owns the [`PriorityBoundedQueue`](crate::queue::PriorityBoundedQueue)
//!   of splits and forms jobs from it
//!
//! Splits may share a job when they have the same language direction and the
//! same kind (translation or alignment). Unless `batch_suggestions` is enabled
//! they must also carry the same suggestion set; with it enabled the job gets
//! the merged set of all its splits.

mod config;
mod core;
mod job;
mod split;


pub use config::{SchedulerOptions, SchedulerOptionsBuilder, SchedulerOptionsBuilderError};
pub use self::core::Scheduler;
pub use job::{Job, JobKind, merge_suggestions};
pub use split::{
    CompletionReceiver, CompletionSender, SplitId, SplitOutcome, SplitOutput, SplitTask,
    SplitTimings, TranslationSplit,
};
