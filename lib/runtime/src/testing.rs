// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the decoder and translation-memory capabilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::decoder::{DecoderWorker, Device};
use crate::error::DecoderError;
use crate::memory::TranslationMemory;
use crate::protocols::{Alignment, LanguageDirection, Sentence, Suggestion, Translation, Word};

/// One decoder invocation as observed by a [`ScriptedWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub device: Device,
    pub started: Instant,
    pub finished: Instant,
    pub batch: usize,
}

/// Shared record of decoder calls across workers.
pub type CallLog = Arc<Mutex<Vec<CallRecord>>>;

/// True if some device served two calls whose intervals overlap.
pub fn has_overlapping_calls(log: &[CallRecord]) -> bool {
    let mut calls = log.to_vec();
    calls.sort_by_key(|call| (format!("{}", call.device), call.started));
    calls
        .windows(2)
        .any(|pair| pair[0].device == pair[1].device && pair[1].started < pair[0].finished)
}

/// A deterministic [`DecoderWorker`].
///
/// Translating upper-cases every word, aligns word `i` with word `i` and
/// reports a confidence of `0.9`. Alternative `k` appends `~k` to each word
/// and lowers the confidence by `0.1 * k`. Aligning returns the reference.
pub struct ScriptedWorker {
    device: Device,
    directions: Vec<LanguageDirection>,
    failure: Option<DecoderError>,
    panics: bool,
    drop_last: bool,
    dies_after: Option<usize>,
    restart_fails: bool,
    delay: Duration,
    calls: usize,
    log: CallLog,
    restarts: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    pub fn new(device: Device, directions: Vec<LanguageDirection>) -> Self {
        Self {
            device,
            directions,
            failure: None,
            panics: false,
            drop_last: false,
            dies_after: None,
            restart_fails: false,
            delay: Duration::ZERO,
            calls: 0,
            log: CallLog::default(),
            restarts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails with `error`.
    pub fn fail_with(mut self, error: DecoderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Every call panics.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Returns one translation fewer than asked for.
    pub fn drop_last_output(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Reports itself dead after `calls` calls until restarted.
    pub fn dies_after(mut self, calls: usize) -> Self {
        self.dies_after = Some(calls);
        self
    }

    pub fn restart_fails(mut self) -> Self {
        self.restart_fails = true;
        self
    }

    /// Sleeps this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Counter of successful restarts, shared with the caller.
    pub fn restarts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.restarts)
    }

    fn call<F>(&mut self, batch: usize, decode: F) -> Result<Vec<Translation>, DecoderError>
    where
        F: FnOnce() -> Vec<Translation>,
    {
        let started = Instant::now();
        self.calls += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panics {
            panic!("scripted decoder crash on {}", self.device);
        }

        let result = match &self.failure {
            Some(error) => Err(error.clone()),
            None => {
                let mut translations = decode();
                if self.drop_last {
                    translations.pop();
                }
                Ok(translations)
            }
        };

        self.log.lock().push(CallRecord {
            device: self.device,
            started,
            finished: Instant::now(),
            batch,
        });
        result
    }
}

fn scripted(sentence: &Arc<Sentence>, alternatives: usize) -> Translation {
    let render = |suffix: &str| -> Vec<Word> {
        sentence
            .words
            .iter()
            .map(|word| Word {
                text: format!("{}{suffix}", word.text.to_uppercase()),
                ..word.clone()
            })
            .collect()
    };
    let identity = Alignment::new((0..sentence.len()).map(|i| (i, i)).collect(), 1.0);

    let alternatives = (1..=alternatives)
        .map(|k| {
            Translation::new(Arc::clone(sentence), render(&format!("~{k}")))
                .with_alignment(identity.clone())
                .with_confidence((0.9 - 0.1 * k as f32).max(0.01))
        })
        .collect();

    Translation::new(Arc::clone(sentence), render(""))
        .with_alignment(identity)
        .with_confidence(0.9)
        .with_alternatives(alternatives)
}

impl DecoderWorker for ScriptedWorker {
    fn device(&self) -> Device {
        self.device
    }

    fn directions(&self) -> &[LanguageDirection] {
        &self.directions
    }

    fn translate(
        &mut self,
        _direction: &LanguageDirection,
        sentences: &[Arc<Sentence>],
        _suggestions: Option<&[Suggestion]>,
        alternatives: Option<&[usize]>,
    ) -> Result<Vec<Translation>, DecoderError> {
        self.call(sentences.len(), || {
            sentences
                .iter()
                .enumerate()
                .map(|(i, sentence)| {
                    let wanted = alternatives.and_then(|a| a.get(i).copied()).unwrap_or(0);
                    scripted(sentence, wanted)
                })
                .collect()
        })
    }

    fn align(
        &mut self,
        _direction: &LanguageDirection,
        sentences: &[Arc<Sentence>],
        references: &[Arc<Sentence>],
    ) -> Result<Vec<Translation>, DecoderError> {
        self.call(sentences.len(), || {
            sentences
                .iter()
                .zip(references)
                .map(|(sentence, reference)| {
                    let points = (0..sentence.len().min(reference.len()))
                        .map(|i| (i, i))
                        .collect();
                    Translation::new(Arc::clone(sentence), reference.words.clone())
                        .with_alignment(Alignment::new(points, 1.0))
                })
                .collect()
        })
    }

    fn is_alive(&self) -> bool {
        self.dies_after.is_none_or(|limit| self.calls < limit)
    }

    fn restart(&mut self) -> Result<(), DecoderError> {
        if self.restart_fails {
            return Err(DecoderError::msg("scripted restart failure"));
        }
        self.calls = 0;
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A translation memory answering from a fixed list of exact matches.
#[derive(Debug, Default)]
pub struct StaticMemory {
    entries: Vec<Suggestion>,
}

impl StaticMemory {
    pub fn new(entries: Vec<Suggestion>) -> Self {
        Self { entries }
    }
}

impl TranslationMemory for StaticMemory {
    fn search(
        &self,
        _direction: &LanguageDirection,
        sentence: &Sentence,
        limit: usize,
    ) -> Result<Vec<Suggestion>, DecoderError> {
        let text = sentence.text();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.source.text() == text)
            .take(limit)
            .cloned()
            .collect())
    }
}
