// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Executor threads: the loop that moves jobs from the scheduler onto workers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::decoder::{DecoderWorkerPool, WorkerLease};
use crate::error::{DecoderError, DecoderErrorType, TranslationError};
use crate::protocols::{Sentence, Suggestion, Translation};
use crate::scheduler::{Job, JobKind, Scheduler, TranslationSplit};

/// A fixed set of OS threads, each running `take job -> check out worker ->
/// decode -> report` until the scheduler shuts down.
pub struct DecoderExecutor {
    scheduler: Arc<Scheduler>,
    pool: DecoderWorkerPool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DecoderExecutor {
    /// Spawns `threads` executor loops. Usually one per worker slot.
    pub fn start(
        scheduler: Arc<Scheduler>,
        pool: DecoderWorkerPool,
        threads: usize,
    ) -> std::io::Result<Self> {
        let executor = Self {
            scheduler,
            pool,
            handles: Mutex::new(Vec::with_capacity(threads)),
        };

        for index in 0..threads {
            let scheduler = Arc::clone(&executor.scheduler);
            let pool = executor.pool.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("nmt-executor-{index}"))
                .spawn(move || run(&scheduler, &pool));

            match spawned {
                Ok(handle) => executor.handles.lock().push(handle),
                Err(e) => {
                    executor.shutdown();
                    return Err(e);
                }
            }
        }

        tracing::info!(threads, "decoder executor started");
        Ok(executor)
    }

    pub fn threads(&self) -> usize {
        self.handles.lock().len()
    }

    /// Stops the scheduler and the pool, then waits for every loop to exit.
    ///
    /// Jobs already running finish; queued splits fail with
    /// [`TranslationError::Shutdown`].
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.pool.close();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.join() {
                tracing::error!("Executor thread panicked during shutdown: {:?}", e);
            }
        }
    }
}

impl Drop for DecoderExecutor {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            self.shutdown();
        }
    }
}

fn run(scheduler: &Scheduler, pool: &DecoderWorkerPool) {
    tracing::debug!("executor loop started");
    while let Some(job) = scheduler.take() {
        execute(pool, job);
    }
    tracing::debug!("executor loop finished");
}

/// Runs one job to completion. Every split of the job is completed exactly once.
pub fn execute(pool: &DecoderWorkerPool, job: Job) {
    let Some(job) = job.filter(Instant::now()) else {
        return;
    };

    let direction = job.direction().clone();
    let mut lease = match pool.take(&direction) {
        Ok(lease) => lease,
        Err(err) => {
            tracing::warn!(%direction, error = %err, "no decoder worker for job");
            fail_all(job.into_splits(), err);
            return;
        }
    };

    let kind = job.kind();
    let sentences = job.sentences();
    let references = job.references();
    let alternatives = job.alternatives();
    let suggestions: Vec<_> = job.suggestions().to_vec();
    let priority = job.priority();

    let mut splits = job.into_splits();
    let begin = Instant::now();
    for split in splits.iter_mut() {
        split.begin(begin);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        decode(
            &mut lease,
            kind,
            &sentences,
            &references,
            &suggestions,
            alternatives.as_deref(),
        )
    }))
    .unwrap_or_else(|panic| {
        lease.mark_failed();
        Err(DecoderError::typed(
            DecoderErrorType::Crashed,
            format!("decoder panicked: {}", panic_message(&*panic)),
        ))
    })
    .and_then(|translations| match translations.len() == splits.len() {
        true => Ok(translations),
        false => Err(DecoderError::typed(
            DecoderErrorType::MalformedOutput,
            format!(
                "decoder returned {} translations for {} sentences",
                translations.len(),
                splits.len()
            ),
        )),
    });

    let worker = lease.id();
    // return the worker before waking callers
    drop(lease);

    match outcome {
        Ok(translations) => {
            tracing::debug!(
                %direction,
                %priority,
                %worker,
                size = splits.len(),
                decode_us = begin.elapsed().as_micros() as u64,
                "job decoded"
            );
            for (split, translation) in splits.into_iter().zip(translations) {
                split.complete(translation);
            }
        }
        Err(err) => {
            tracing::error!(%direction, %worker, size = splits.len(), error = %err, "decoder failed job");
            fail_all(splits, TranslationError::Decoder(err));
        }
    }
}

fn decode(
    lease: &mut WorkerLease,
    kind: JobKind,
    sentences: &[Arc<Sentence>],
    references: &[Arc<Sentence>],
    suggestions: &[Suggestion],
    alternatives: Option<&[usize]>,
) -> Result<Vec<Translation>, DecoderError> {
    let direction = lease.direction().clone();
    match kind {
        JobKind::Align => lease.align(&direction, sentences, references),
        JobKind::Translate => {
            let suggestions = (!suggestions.is_empty()).then_some(suggestions);
            lease.translate(&direction, sentences, suggestions, alternatives)
        }
    }
}

fn fail_all(splits: Vec<TranslationSplit>, error: TranslationError) {
    for split in splits {
        split.fail(error.clone());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
