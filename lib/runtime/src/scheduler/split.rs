// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A decoder-sized piece of a submitted sentence and its completion channel.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TranslationError;
use crate::protocols::{LanguageDirection, Priority, Sentence, Suggestion, Translation};

/// Identity of a split: owning request and position within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitId {
    pub request: Uuid,
    pub index: usize,
}

/// What the decoder is asked to do with a split.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitTask {
    /// Translate, optionally biased by suggestions and asking for n-best alternatives.
    Translate {
        suggestions: Arc<[Suggestion]>,
        alternatives: usize,
    },
    /// Align the split against a known reference translation.
    Align { reference: Arc<Sentence> },
}

impl SplitTask {
    pub fn is_alignment(&self) -> bool {
        matches!(self, SplitTask::Align { .. })
    }
}

/// Lifecycle timestamps of one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitTimings {
    pub enqueued_at: Instant,
    pub begin: Instant,
    pub end: Instant,
    /// Admission queue length observed at submission.
    pub queue_depth: usize,
}

/// A finished split as handed to the joiner.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub translation: Translation,
    pub timings: SplitTimings,
}

/// Message sent on the per-request completion channel, exactly once per split.
#[derive(Debug)]
pub struct SplitOutcome {
    pub id: SplitId,
    pub result: Result<SplitOutput, TranslationError>,
}

pub type CompletionSender = mpsc::UnboundedSender<SplitOutcome>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<SplitOutcome>;

/// One decoder-sized chunk of an original sentence.
///
/// Completing a split consumes it, so its outcome is reported exactly once. A
/// split dropped without being completed reports [`TranslationError::Shutdown`].
#[derive(Debug)]
pub struct TranslationSplit {
    id: SplitId,
    sentence: Arc<Sentence>,
    task: SplitTask,
    priority: Priority,
    direction: LanguageDirection,
    deadline: Option<Instant>,
    enqueued_at: Instant,
    begin: Option<Instant>,
    queue_depth: usize,
    completion: Option<CompletionSender>,
}

impl TranslationSplit {
    pub fn new(
        id: SplitId,
        sentence: Arc<Sentence>,
        task: SplitTask,
        priority: Priority,
        direction: LanguageDirection,
        deadline: Option<Instant>,
        completion: CompletionSender,
    ) -> Self {
        Self {
            id,
            sentence,
            task,
            priority,
            direction,
            deadline,
            enqueued_at: Instant::now(),
            begin: None,
            queue_depth: 0,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> SplitId {
        self.id
    }

    pub fn sentence(&self) -> &Arc<Sentence> {
        &self.sentence
    }

    pub fn task(&self) -> &SplitTask {
        &self.task
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn direction(&self) -> &LanguageDirection {
        &self.direction
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub fn is_empty(&self) -> bool {
        self.sentence.is_empty()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Restamps admission time and observed queue depth.
    pub(crate) fn mark_enqueued(&mut self, now: Instant, queue_depth: usize) {
        self.enqueued_at = now;
        self.queue_depth = queue_depth;
    }

    /// Stamps the moment the decoder started working on this split.
    pub fn begin(&mut self, now: Instant) {
        self.begin = Some(now);
    }

    /// Reports a successful translation.
    pub fn complete(self, translation: Translation) {
        self.finish(Ok(translation));
    }

    /// Reports a failure.
    pub fn fail(self, error: TranslationError) {
        self.finish(Err(error));
    }

    /// Completes a zero-word split with an empty translation.
    pub fn complete_empty(mut self) {
        self.begin(Instant::now());
        let translation = Translation::empty(self.sentence.clone());
        self.complete(translation);
    }

    fn finish(mut self, result: Result<Translation, TranslationError>) {
        let end = Instant::now();
        let timings = SplitTimings {
            enqueued_at: self.enqueued_at,
            begin: self.begin.unwrap_or(end),
            end,
            queue_depth: self.queue_depth,
        };
        self.send(result.map(|translation| SplitOutput {
            translation,
            timings,
        }));
    }

    fn send(&mut self, result: Result<SplitOutput, TranslationError>) {
        if let Some(completion) = self.completion.take() {
            // the submitter may have given up already
            let _ = completion.send(SplitOutcome {
                id: self.id,
                result,
            });
        }
    }
}

impl Drop for TranslationSplit {
    fn drop(&mut self) {
        if self.completion.is_some() {
            tracing::debug!(request = %self.id.request, index = self.id.index, "split dropped before completion");
            self.send(Err(TranslationError::Shutdown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn split(tx: CompletionSender, deadline: Option<Instant>) -> TranslationSplit {
        TranslationSplit::new(
            SplitId {
                request: Uuid::new_v4(),
                index: 0,
            },
            Arc::new(Sentence::from_text("hello world")),
            SplitTask::Translate {
                suggestions: Arc::from(Vec::new()),
                alternatives: 0,
            },
            Priority::Normal,
            LanguageDirection::new("en", "it"),
            deadline,
            tx,
        )
    }

    #[test]
    fn test_complete_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = split(tx, None);
        s.begin(Instant::now());
        let source = s.sentence().clone();
        s.complete(Translation::new(source, vec![]));

        let outcome = rx.try_recv().unwrap();
        let output = outcome.result.unwrap();
        assert!(output.timings.begin >= output.timings.enqueued_at);
        assert!(output.timings.end >= output.timings.begin);
        // sender consumed, nothing else arrives
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_reports_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(split(tx, None));
        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.result.unwrap_err(), TranslationError::Shutdown);
    }

    #[test]
    fn test_expiry() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let s = split(tx, Some(now + Duration::from_millis(1)));
        assert!(!s.is_expired(now));
        assert!(s.is_expired(now + Duration::from_millis(1)));
    }
}
