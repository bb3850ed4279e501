// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::TranslationError;
use crate::protocols::{Priority, Suggestion};
use crate::queue::{BucketStats, BucketView, PriorityBoundedQueue, QueueError, Step};

use super::config::SchedulerOptions;
use super::job::{Job, merge_suggestions};
use super::split::{SplitTask, TranslationSplit};

enum Pass {
    Job(Job),
    Expired(Vec<TranslationSplit>),
    TimedOut,
}

/// Groups pending splits into decoder jobs.
///
/// Submissions never block: a full priority bucket rejects with
/// [`TranslationError::Saturated`]. [`Scheduler::take`] serves the highest
/// priority bucket first and tries to fill a batch of compatible splits, but
/// never holds the oldest split longer than `max_batch_wait`. Splits past their
/// deadline are failed with [`TranslationError::Timeout`] and never handed out.
pub struct Scheduler {
    queue: PriorityBoundedQueue<TranslationSplit>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Result<Self, QueueError> {
        Ok(Self {
            queue: PriorityBoundedQueue::new(options.capacities)?,
            options,
        })
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Enqueues one split, failing fast if its priority bucket is full.
    pub fn submit(&self, mut split: TranslationSplit) -> Result<(), TranslationError> {
        let priority = split.priority();
        split.mark_enqueued(Instant::now(), self.queue.len());

        self.queue.offer(split, priority).map_err(|rejected| {
            let full = rejected.is_full();
            self.reject(vec![rejected.into_inner()], priority, full)
        })
    }

    /// Enqueues every split of one request, or none of them.
    ///
    /// All splits must share a priority.
    pub fn submit_all(&self, mut splits: Vec<TranslationSplit>) -> Result<(), TranslationError> {
        let Some(priority) = splits.first().map(TranslationSplit::priority) else {
            return Ok(());
        };
        debug_assert!(splits.iter().all(|s| s.priority() == priority));

        let now = Instant::now();
        let depth = self.queue.len();
        for split in splits.iter_mut() {
            split.mark_enqueued(now, depth);
        }

        self.queue.offer_all(splits, priority).map_err(|rejected| {
            let full = rejected.is_full();
            self.reject(rejected.into_inner(), priority, full)
        })
    }

    /// Blocks until a job is ready. Returns `None` after [`shutdown`](Self::shutdown).
    pub fn take(&self) -> Option<Job> {
        self.next_job(None)
    }

    /// Like [`take`](Self::take), giving up after `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<Job> {
        self.next_job(Some(Instant::now() + timeout))
    }

    /// Fails and removes every queued split whose deadline has passed.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let expired = self.queue.remove_where(|split| split.is_expired(now));
        let count = expired.len();
        self.expire(expired);
        count
    }

    /// Removes every queued split of `request`, failing them as if their
    /// deadline had passed. Splits already handed to a worker are unaffected.
    pub fn cancel(&self, request: Uuid) -> usize {
        let removed = self.queue.remove_where(|split| split.id().request == request);
        let count = removed.len();
        if count > 0 {
            tracing::debug!(%request, count, "request cancelled in queue");
        }
        for split in removed {
            split.fail(TranslationError::Timeout);
        }
        count
    }

    /// Stops the scheduler. Queued splits fail with [`TranslationError::Shutdown`]
    /// and every blocked or future `take` returns `None`.
    pub fn shutdown(&self) {
        let pending = self.queue.close_and_drain();
        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), "scheduler shutting down with queued splits");
        }
        for split in pending {
            split.fail(TranslationError::Shutdown);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.is_closed()
    }

    /// Splits currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> Vec<(Priority, BucketStats)> {
        self.queue.stats()
    }

    fn next_job(&self, until: Option<Instant>) -> Option<Job> {
        loop {
            match self.queue.take_when(|view| self.select(view, until))? {
                Pass::Job(job) => return Some(job),
                Pass::Expired(splits) => self.expire(splits),
                Pass::TimedOut => return None,
            }
        }
    }

    fn select(
        &self,
        view: &mut BucketView<'_, TranslationSplit>,
        until: Option<Instant>,
    ) -> Step<Pass> {
        let now = Instant::now();

        let expired = view.extract_where(|split| split.is_expired(now));
        if !expired.is_empty() {
            return Step::Ready(Pass::Expired(expired));
        }
        if until.is_some_and(|until| now >= until) {
            return Step::Ready(Pass::TimedOut);
        }

        let mut wake = until;
        for priority in Priority::ALL {
            for deadline in view.iter(priority).filter_map(TranslationSplit::deadline) {
                wake = earliest(wake, deadline);
            }
        }

        for priority in Priority::ALL {
            let Some(anchor_enqueued) = view.iter(priority).next().map(|s| s.enqueued_at()) else {
                continue;
            };

            let positions = self.batch_positions(view, priority);
            let ready_at = anchor_enqueued + self.options.max_batch_wait;
            if positions.len() >= self.options.max_batch_size || now >= ready_at {
                let splits = view.extract(priority, &positions);
                let suggestions = self.job_suggestions(&splits);
                tracing::debug!(
                    %priority,
                    size = splits.len(),
                    waited_us = now.duration_since(anchor_enqueued).as_micros() as u64,
                    "job formed"
                );
                if let Some(job) = Job::new(priority, splits, suggestions) {
                    return Step::Ready(Pass::Job(job));
                }
            }

            // A batch is forming at this priority; lower buckets wait their turn.
            wake = earliest(wake, ready_at);
            break;
        }

        match wake {
            Some(deadline) => Step::WaitUntil(deadline),
            None => Step::Wait,
        }
    }

    /// Positions, in queue order, of the splits that can share a job with the
    /// oldest split of `priority`.
    fn batch_positions(
        &self,
        view: &BucketView<'_, TranslationSplit>,
        priority: Priority,
    ) -> Vec<usize> {
        let mut items = view.iter(priority);
        let Some(anchor) = items.next() else {
            return Vec::new();
        };

        let mut positions = vec![0];
        for (position, split) in items.enumerate() {
            if positions.len() >= self.options.max_batch_size {
                break;
            }
            if self.compatible(anchor, split) {
                positions.push(position + 1);
            }
        }
        positions
    }

    fn compatible(&self, anchor: &TranslationSplit, other: &TranslationSplit) -> bool {
        if anchor.direction() != other.direction() {
            return false;
        }
        match (anchor.task(), other.task()) {
            (SplitTask::Align { .. }, SplitTask::Align { .. }) => true,
            (
                SplitTask::Translate { suggestions: a, .. },
                SplitTask::Translate { suggestions: b, .. },
            ) => self.options.batch_suggestions || Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }

    fn job_suggestions(&self, splits: &[TranslationSplit]) -> Arc<[Suggestion]> {
        let sets: Vec<&Arc<[Suggestion]>> = splits
            .iter()
            .filter_map(|split| match split.task() {
                SplitTask::Translate { suggestions, .. } => Some(suggestions),
                SplitTask::Align { .. } => None,
            })
            .collect();

        match sets.as_slice() {
            [] => Arc::from(Vec::new()),
            [first, rest @ ..] if rest.iter().all(|s| Arc::ptr_eq(first, s) || first == s) => {
                Arc::clone(first)
            }
            _ => Arc::from(merge_suggestions(
                sets.iter().map(|s| &s[..]),
                self.options.max_batch_suggestions,
            )),
        }
    }

    fn expire(&self, splits: Vec<TranslationSplit>) {
        if splits.is_empty() {
            return;
        }
        tracing::warn!(count = splits.len(), "splits timed out in queue");
        for split in splits {
            split.fail(TranslationError::Timeout);
        }
    }

    fn reject(
        &self,
        splits: Vec<TranslationSplit>,
        priority: Priority,
        full: bool,
    ) -> TranslationError {
        let error = match full {
            true => TranslationError::Saturated { priority },
            false => TranslationError::Shutdown,
        };
        tracing::warn!(%priority, count = splits.len(), %error, "submission rejected");
        for split in splits {
            split.fail(error.clone());
        }
        error
    }
}

fn earliest(current: Option<Instant>, candidate: Instant) -> Option<Instant> {
    Some(match current {
        Some(current) => current.min(candidate),
        None => candidate,
    })
}
