// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cutting long sentences into decoder-sized pieces.

use crate::protocols::{Sentence, Word};

const CLAUSE_PUNCTUATION: [char; 6] = [',', ';', ':', '.', '!', '?'];

/// Splits `sentence` into pieces of at most `max_length` words.
///
/// Inside each window the cut goes after the last word ending in clause
/// punctuation, as long as that keeps at least half a window; otherwise the
/// window is cut at `max_length`. A sentence that already fits is returned
/// as a single piece. Concatenating the pieces gives back the input words.
pub fn split(sentence: &Sentence, max_length: usize) -> Vec<Sentence> {
    let max_length = max_length.max(1);
    if sentence.len() <= max_length {
        return vec![sentence.clone()];
    }

    let words = &sentence.words;
    let mut pieces = Vec::with_capacity(words.len().div_ceil(max_length));
    let mut start = 0;
    while start < words.len() {
        let end = cut_point(&words[start..], max_length) + start;
        pieces.push(Sentence::new(words[start..end].to_vec()));
        start = end;
    }
    pieces
}

/// Length of the next piece taken from the front of `words`.
fn cut_point(words: &[Word], max_length: usize) -> usize {
    if words.len() <= max_length {
        return words.len();
    }
    let min_length = max_length.div_ceil(2);
    (min_length..max_length)
        .rev()
        .find(|&len| ends_clause(&words[len - 1]))
        .unwrap_or(max_length)
}

fn ends_clause(word: &Word) -> bool {
    word.text.ends_with(CLAUSE_PUNCTUATION)
}
