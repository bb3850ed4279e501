// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by the scheduler, the decoder workers and the joiner.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request priority. Lower discriminant means served first; each level maps
/// 1:1 onto a bucket of the admission queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Background = 2,
}

impl Priority {
    pub const COUNT: usize = 3;

    /// All levels, highest first.
    pub const ALL: [Priority; Priority::COUNT] =
        [Priority::High, Priority::Normal, Priority::Background];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Background => write!(f, "background"),
        }
    }
}

/// Source and target language of a translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageDirection {
    pub source: String,
    pub target: String,
}

impl LanguageDirection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LanguageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} > {}", self.source, self.target)
    }
}

/// A token together with its spacing information.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Whitespace emitted after this word, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_space: Option<String>,
    #[serde(default)]
    pub left_space_required: bool,
    #[serde(default)]
    pub right_space_required: bool,
}

impl Word {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A word followed by a single space.
    pub fn spaced(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            right_space: Some(" ".to_string()),
            ..Default::default()
        }
    }
}

/// An ordered sequence of words.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sentence {
    pub words: Vec<Word>,
}

impl Sentence {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    /// Whitespace tokenization. Every word but the last keeps a trailing space.
    pub fn from_text(text: &str) -> Self {
        let mut words: Vec<Word> = text.split_whitespace().map(Word::spaced).collect();
        if let Some(last) = words.last_mut() {
            last.right_space = None;
        }
        Self { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Detokenized text honouring each word's right space.
    pub fn text(&self) -> String {
        render(&self.words)
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

fn render(words: &[Word]) -> String {
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        out.push_str(&word.text);
        if i + 1 == words.len() {
            break;
        }
        match &word.right_space {
            Some(space) => out.push_str(space),
            None if word.right_space_required || words[i + 1].left_space_required => {
                out.push(' ')
            }
            None => {}
        }
    }
    out
}

/// Word alignment between a source and a target: `(source_index, target_index)` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub points: Vec<(usize, usize)>,
    pub score: f32,
}

impl Alignment {
    pub fn new(points: Vec<(usize, usize)>, score: f32) -> Self {
        Self { points, score }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Timing telemetry attached to a finished translation.
///
/// `queue_time + decode_time` always equals the measured wall-clock span of the
/// request. For batched jobs the split between the two is apportioned, not
/// measured, so treat it as approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranslationStats {
    /// Deepest admission queue observed by any split of the request.
    pub queue_length: usize,
    pub queue_time: Duration,
    pub decode_time: Duration,
}

/// A decoded sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub source: Arc<Sentence>,
    pub words: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    /// Ranked alternatives, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Translation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub stats: TranslationStats,
}

impl Translation {
    pub fn new(source: Arc<Sentence>, words: Vec<Word>) -> Self {
        Self {
            source,
            words,
            alignment: None,
            alternatives: Vec::new(),
            confidence: None,
            stats: TranslationStats::default(),
        }
    }

    /// The translation of a sentence without words.
    pub fn empty(source: Arc<Sentence>) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Translation>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn has_alignment(&self) -> bool {
        self.alignment.is_some()
    }

    pub fn text(&self) -> String {
        render(&self.words)
    }
}

/// A translation-memory match used to bias decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub source: Sentence,
    pub target: Sentence,
    /// Match quality in `[0, 1]`; `1.0` is a perfect match.
    pub score: f32,
}

impl Suggestion {
    pub fn new(source: Sentence, target: Sentence, score: f32) -> Self {
        Self {
            source,
            target,
            score,
        }
    }

    pub fn is_perfect_match(&self) -> bool {
        self.score >= 1.0
    }
}
