// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::error::TranslationError;
use crate::protocols::{LanguageDirection, Priority, Sentence, Suggestion};

use super::split::{SplitTask, TranslationSplit};

/// Whether a job translates or aligns. Never mixed within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Translate,
    Align,
}

/// A batch of splits sharing a language direction, dispatched to one worker.
///
/// Formed atomically by the scheduler and not modified afterwards except by
/// [`Job::filter`], which consumes it.
#[derive(Debug)]
pub struct Job {
    direction: LanguageDirection,
    priority: Priority,
    kind: JobKind,
    suggestions: Arc<[Suggestion]>,
    splits: Vec<TranslationSplit>,
}

impl Job {
    pub(crate) fn new(
        priority: Priority,
        splits: Vec<TranslationSplit>,
        suggestions: Arc<[Suggestion]>,
    ) -> Option<Self> {
        let first = splits.first()?;
        let kind = match first.task() {
            SplitTask::Translate { .. } => JobKind::Translate,
            SplitTask::Align { .. } => JobKind::Align,
        };
        Some(Self {
            direction: first.direction().clone(),
            priority,
            kind,
            suggestions,
            splits,
        })
    }

    pub fn direction(&self) -> &LanguageDirection {
        &self.direction
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Aggregated suggestion set handed to the decoder.
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn splits(&self) -> &[TranslationSplit] {
        &self.splits
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Completes splits that must not reach a decoder: expired ones fail with
    /// [`TranslationError::Timeout`], empty ones get an empty translation.
    /// Returns the remaining job, if any split is left to decode.
    pub fn filter(self, now: Instant) -> Option<Job> {
        let Job {
            direction,
            priority,
            kind,
            suggestions,
            splits,
        } = self;

        let mut pending = Vec::with_capacity(splits.len());
        for split in splits {
            if split.is_expired(now) {
                tracing::debug!(request = %split.id().request, index = split.id().index, "split expired before decoding");
                split.fail(TranslationError::Timeout);
            } else if split.is_empty() {
                split.complete_empty();
            } else {
                pending.push(split);
            }
        }

        if pending.is_empty() {
            return None;
        }
        Some(Job {
            direction,
            priority,
            kind,
            suggestions,
            splits: pending,
        })
    }

    /// Source sentences in job order.
    pub fn sentences(&self) -> Vec<Arc<Sentence>> {
        self.splits.iter().map(|s| s.sentence().clone()).collect()
    }

    /// Reference sentences in job order. Empty for translation jobs.
    pub fn references(&self) -> Vec<Arc<Sentence>> {
        self.splits
            .iter()
            .filter_map(|s| match s.task() {
                SplitTask::Align { reference } => Some(reference.clone()),
                SplitTask::Translate { .. } => None,
            })
            .collect()
    }

    /// Requested alternative count per split, or `None` when no split wants any.
    pub fn alternatives(&self) -> Option<Vec<usize>> {
        let counts: Vec<usize> = self
            .splits
            .iter()
            .map(|s| match s.task() {
                SplitTask::Translate { alternatives, .. } => *alternatives,
                SplitTask::Align { .. } => 0,
            })
            .collect();
        counts.iter().any(|&n| n > 0).then_some(counts)
    }

    pub fn into_splits(self) -> Vec<TranslationSplit> {
        self.splits
    }
}

/// Union of suggestion sets: duplicates dropped, best score first, at most `limit`.
pub fn merge_suggestions<'a>(
    sets: impl IntoIterator<Item = &'a [Suggestion]>,
    limit: usize,
) -> Vec<Suggestion> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Suggestion> = Vec::new();
    for suggestion in sets.into_iter().flatten() {
        if seen.insert((suggestion.source.text(), suggestion.target.text())) {
            merged.push(suggestion.clone());
        }
    }
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(limit);
    merged
}
