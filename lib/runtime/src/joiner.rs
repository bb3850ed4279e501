// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reassembly of per-split results into the translation of the original sentence.
//!
//! Everything here is pure: the caller hands over the finished splits of one
//! request in index order and gets back a single [`Translation`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TranslationError;
use crate::protocols::{Alignment, Sentence, Translation, TranslationStats, Word};
use crate::scheduler::SplitOutput;

/// One joined n-best candidate: for every split, `0` picks the primary result
/// and `k > 0` picks alternative `k - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub choice: Vec<usize>,
    pub confidence: f32,
}

/// Joins the results of one request's splits.
///
/// `outputs` must be ordered by split index. The returned translation points at
/// `original` and carries up to `alternatives_wanted` ranked alternatives.
pub fn join(
    original: Arc<Sentence>,
    outputs: Vec<SplitOutput>,
    alternatives_wanted: usize,
) -> Result<Translation, TranslationError> {
    let stats = stats(&outputs);

    let mut translation = match outputs.len() {
        0 => Translation::empty(original),
        1 => {
            let mut translation = outputs
                .into_iter()
                .next()
                .map(|output| output.translation)
                .unwrap_or_else(|| Translation::empty(original.clone()));
            translation.source = original.clone();
            translation.alternatives.truncate(alternatives_wanted);
            for alternative in translation.alternatives.iter_mut() {
                alternative.source = original.clone();
            }
            translation
        }
        _ => {
            let ranked = top_candidates(&outputs, alternatives_wanted.saturating_add(1));
            let mut candidates = ranked.iter();

            let Some(best) = candidates.next() else {
                return Ok(Translation::empty(original));
            };
            let mut primary = materialize(original.clone(), &outputs, best)?;
            primary.alternatives = candidates
                .map(|candidate| materialize(original.clone(), &outputs, candidate))
                .collect::<Result<_, _>>()?;
            primary
        }
    };

    translation.stats = stats;
    Ok(translation)
}

/// Number of distinct joined candidates: the product over all splits of one
/// plus the split's alternatives. `None` if it does not fit in a `usize`.
pub fn candidate_count(outputs: &[SplitOutput]) -> Option<usize> {
    if outputs.is_empty() {
        return Some(0);
    }
    outputs.iter().try_fold(1usize, |total, output| {
        total.checked_mul(output.translation.alternatives.len() + 1)
    })
}

/// An unexpanded point of the best-first search over choice vectors.
struct Frontier {
    /// Sum of the log confidences of the chosen pieces.
    score: f64,
    /// Position of each split's pick in its confidence-sorted options.
    ranks: Vec<usize>,
    choice: Vec<usize>,
}

impl Frontier {
    /// Mixed-radix position of the choice, split 0 being the least significant digit.
    fn enumeration_key(&self) -> impl Iterator<Item = &usize> {
        self.choice.iter().rev()
    }
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.enumeration_key().cmp(self.enumeration_key()))
    }
}

/// The `limit` best combinations of per-split choices, best first.
///
/// A candidate's confidence is the geometric mean of the chosen pieces'
/// confidences; pieces without a confidence count as `1.0`. The geometric
/// mean only grows when a single split's pick improves, so the search starts
/// from every split's best option and expands one split at a time, visiting
/// at most `limit` candidates instead of all [`candidate_count`] of them. The
/// all-primary candidate wins among equals.
pub fn top_candidates(outputs: &[SplitOutput], limit: usize) -> Vec<Candidate> {
    if outputs.is_empty() || limit == 0 {
        return Vec::new();
    }

    // (pick, log confidence) per split, best first; the sort is stable so the
    // primary result leads its ties.
    let options: Vec<Vec<(usize, f64)>> = outputs
        .iter()
        .map(|output| {
            let translation = &output.translation;
            let mut options: Vec<(usize, f64)> = std::iter::once(translation.confidence)
                .chain(translation.alternatives.iter().map(|a| a.confidence))
                .enumerate()
                .map(|(pick, confidence)| {
                    (pick, f64::from(confidence.unwrap_or(1.0).max(0.0)).ln())
                })
                .collect();
            options.sort_by(|a, b| b.1.total_cmp(&a.1));
            options
        })
        .collect();

    let frontier = |ranks: Vec<usize>| -> Frontier {
        let score = ranks.iter().zip(&options).map(|(&r, split)| split[r].1).sum();
        let choice = ranks.iter().zip(&options).map(|(&r, split)| split[r].0).collect();
        Frontier {
            score,
            ranks,
            choice,
        }
    };

    let start = vec![0; outputs.len()];
    let mut seen = HashSet::from([start.clone()]);
    let mut heap = BinaryHeap::from([frontier(start)]);
    let splits = outputs.len() as f64;

    let mut ranked = Vec::new();
    while ranked.len() < limit {
        let Some(best) = heap.pop() else {
            break;
        };
        for split in 0..best.ranks.len() {
            if best.ranks[split] + 1 < options[split].len() {
                let mut next = best.ranks.clone();
                next[split] += 1;
                if seen.insert(next.clone()) {
                    heap.push(frontier(next));
                }
            }
        }
        ranked.push(Candidate {
            choice: best.choice,
            confidence: (best.score / splits).exp() as f32,
        });
    }
    ranked
}

/// Builds the joined translation described by `candidate`.
///
/// Fails with [`TranslationError::MalformedAlternativeIndex`] if a choice
/// points past the alternatives a split actually produced.
pub fn materialize(
    original: Arc<Sentence>,
    outputs: &[SplitOutput],
    candidate: &Candidate,
) -> Result<Translation, TranslationError> {
    let mut pieces: Vec<(&Sentence, &Translation)> = Vec::with_capacity(outputs.len());
    for (split, (output, &index)) in outputs.iter().zip(&candidate.choice).enumerate() {
        let translation = &output.translation;
        let piece = match index {
            0 => translation,
            k => translation.alternatives.get(k - 1).ok_or(
                TranslationError::MalformedAlternativeIndex {
                    split,
                    index: k,
                    available: translation.alternatives.len(),
                },
            )?,
        };
        pieces.push((output.translation.source.as_ref(), piece));
    }

    let mut joined = Translation::new(original, concat_words(&pieces));
    joined.alignment = merge_alignments(&pieces);
    if outputs
        .iter()
        .any(|output| output.translation.confidence.is_some())
    {
        joined.confidence = Some(candidate.confidence);
    }
    Ok(joined)
}

fn concat_words(pieces: &[(&Sentence, &Translation)]) -> Vec<Word> {
    let mut words: Vec<Word> = Vec::new();
    for (_, piece) in pieces {
        let mut next = piece.words.iter().cloned();
        let Some(mut first) = next.next() else {
            continue;
        };
        if let Some(last) = words.last_mut() {
            last.right_space = Some(" ".to_string());
            last.right_space_required = true;
            first.left_space_required = true;
        }
        words.push(first);
        words.extend(next);
    }
    words
}

/// Shifts each piece's alignment by the words that precede it. Only produced
/// when every non-empty piece is aligned.
fn merge_alignments(pieces: &[(&Sentence, &Translation)]) -> Option<Alignment> {
    let mut points = Vec::new();
    let mut weighted = 0.0f64;
    let mut weight = 0usize;
    let mut source_offset = 0;
    let mut target_offset = 0;
    let mut any = false;

    for (source, piece) in pieces {
        match &piece.alignment {
            Some(alignment) => {
                any = true;
                points.extend(
                    alignment
                        .points
                        .iter()
                        .map(|&(s, t)| (s + source_offset, t + target_offset)),
                );
                let size = source.len() + piece.words.len();
                weighted += f64::from(alignment.score) * size as f64;
                weight += size;
            }
            None if source.is_empty() && piece.words.is_empty() => {}
            None => return None,
        }
        source_offset += source.len();
        target_offset += piece.words.len();
    }

    if !any {
        return None;
    }
    let score = match weight {
        0 => 0.0,
        w => (weighted / w as f64) as f32,
    };
    Some(Alignment::new(points, score))
}

/// Request-level timings.
///
/// Only the wall-clock span is measured. For batched splits the decode part is
/// apportioned by the share of per-split decode time in per-split total time,
/// so the queue/decode split is approximate; the two always sum to the span.
pub fn stats(outputs: &[SplitOutput]) -> TranslationStats {
    let (Some(start), Some(end)) = (
        outputs.iter().map(|o| o.timings.enqueued_at).min(),
        outputs.iter().map(|o| o.timings.end).max(),
    ) else {
        return TranslationStats::default();
    };

    let span = end.saturating_duration_since(start);
    let compute: Duration = outputs
        .iter()
        .map(|o| o.timings.end.saturating_duration_since(o.timings.enqueued_at))
        .sum();
    let decoding: Duration = outputs
        .iter()
        .map(|o| o.timings.end.saturating_duration_since(o.timings.begin))
        .sum();

    let decode_time = match compute.as_nanos() {
        0 => Duration::ZERO,
        compute => {
            let nanos = span.as_nanos() * decoding.as_nanos() / compute;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)).min(span)
        }
    };

    TranslationStats {
        queue_length: outputs
            .iter()
            .map(|o| o.timings.queue_depth)
            .max()
            .unwrap_or(0),
        queue_time: span - decode_time,
        decode_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SplitTimings;
    use std::time::Instant;

    fn timings(base: Instant, enqueued: u64, begin: u64, end: u64, depth: usize) -> SplitTimings {
        SplitTimings {
            enqueued_at: base + Duration::from_millis(enqueued),
            begin: base + Duration::from_millis(begin),
            end: base + Duration::from_millis(end),
            queue_depth: depth,
        }
    }

    fn output(source: &str, target: &str, confidence: Option<f32>) -> SplitOutput {
        let mut translation = Translation::new(
            Arc::new(Sentence::from_text(source)),
            Sentence::from_text(target).words,
        );
        translation.confidence = confidence;
        SplitOutput {
            translation,
            timings: timings(Instant::now(), 0, 0, 0, 0),
        }
    }

    fn alternative(source: &str, target: &str, confidence: f32) -> Translation {
        Translation::new(
            Arc::new(Sentence::from_text(source)),
            Sentence::from_text(target).words,
        )
        .with_confidence(confidence)
    }

    #[test]
    fn test_single_split_is_identity() {
        let mut split = output("a b", "x y", Some(0.8));
        split.translation.alignment = Some(Alignment::new(vec![(0, 1), (1, 0)], 0.5));
        let expected = split.translation.clone();
        let original = Arc::new(Sentence::from_text("a b"));

        let joined = join(original.clone(), vec![split], 3).unwrap();
        assert!(Arc::ptr_eq(&joined.source, &original));
        assert_eq!(joined.words, expected.words);
        assert_eq!(joined.alignment, expected.alignment);
        assert_eq!(joined.confidence, expected.confidence);
    }

    #[test]
    fn test_alignment_offsets() {
        let mut first = output("a b c", "w x y z", None);
        first.translation.alignment = Some(Alignment::new(vec![(0, 0), (1, 1)], 1.0));
        let mut second = output("d e", "v", None);
        second.translation.alignment = Some(Alignment::new(vec![(0, 0)], 0.5));

        let original = Arc::new(Sentence::from_text("a b c d e"));
        let joined = join(original, vec![first, second], 0).unwrap();

        let alignment = joined.alignment.unwrap();
        assert_eq!(alignment.points, vec![(0, 0), (1, 1), (3, 4)]);
        // (1.0 * 7 + 0.5 * 3) / 10
        assert!((alignment.score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_alignment_dropped_unless_every_split_has_one() {
        let mut first = output("a", "x", None);
        first.translation.alignment = Some(Alignment::new(vec![(0, 0)], 1.0));
        let second = output("b", "y", None);

        let joined = join(Arc::new(Sentence::from_text("a b")), vec![first, second], 0).unwrap();
        assert_eq!(joined.alignment, None);
    }

    #[test]
    fn test_boundary_space_is_forced() {
        let mut first = output("a", "x", None);
        // decoder emitted no trailing space on the last word
        first.translation.words[0].right_space = None;
        let second = output("b", "y", None);

        let joined = join(Arc::new(Sentence::from_text("a b")), vec![first, second], 0).unwrap();
        assert_eq!(joined.text(), "x y");
        assert!(joined.words[0].right_space_required);
        assert!(joined.words[1].left_space_required);
    }

    #[test]
    fn test_nbest_candidate_count() {
        let mut a = output("a", "x", Some(0.9));
        a.translation.alternatives = vec![alternative("a", "x1", 0.5)];
        let mut b = output("b", "y", Some(0.8));
        b.translation.alternatives = vec![alternative("b", "y1", 0.7), alternative("b", "y2", 0.1)];
        let outputs = vec![a, b];

        assert_eq!(candidate_count(&outputs), Some(6));
        let ranked = top_candidates(&outputs, usize::MAX);
        assert_eq!(ranked.len(), 6);
        assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert_eq!(ranked[0].choice, vec![0, 0]);
        assert!((ranked[0].confidence - (0.9f32 * 0.8).sqrt()).abs() < 1e-6);

        let joined = join(Arc::new(Sentence::from_text("a b")), outputs, 10).unwrap();
        assert_eq!(joined.text(), "x y");
        assert_eq!(joined.alternatives.len(), 5);
        assert_eq!(joined.alternatives[0].text(), "x y1");
        assert_eq!(joined.alternatives[4].text(), "x1 y2");
    }

    /// Every combination, ranked by brute force.
    fn every_candidate(outputs: &[SplitOutput]) -> Vec<Candidate> {
        let radices: Vec<usize> = outputs
            .iter()
            .map(|o| o.translation.alternatives.len() + 1)
            .collect();
        let total: usize = radices.iter().product();
        let mut all: Vec<Candidate> = (0..total)
            .map(|mut n| {
                let mut choice = Vec::new();
                let mut product = 1.0f64;
                for (output, &radix) in outputs.iter().zip(&radices) {
                    let pick = n % radix;
                    n /= radix;
                    let confidence = match pick {
                        0 => output.translation.confidence,
                        k => output.translation.alternatives[k - 1].confidence,
                    };
                    product *= f64::from(confidence.unwrap_or(1.0));
                    choice.push(pick);
                }
                Candidate {
                    choice,
                    confidence: product.powf(1.0 / outputs.len() as f64) as f32,
                }
            })
            .collect();
        all.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        all
    }

    #[test]
    fn test_best_first_matches_full_ranking() {
        let mut a = output("a", "x", Some(0.6));
        a.translation.alternatives = vec![alternative("a", "x1", 0.95), alternative("a", "x2", 0.3)];
        let mut b = output("b", "y", Some(0.85));
        b.translation.alternatives = vec![alternative("b", "y1", 0.45)];
        let mut c = output("c", "z", Some(0.7));
        c.translation.alternatives = vec![
            alternative("c", "z1", 0.65),
            alternative("c", "z2", 0.2),
            alternative("c", "z3", 0.9),
        ];
        let outputs = vec![a, b, c];

        let expected = every_candidate(&outputs);
        assert_eq!(expected.len(), 24);
        for limit in [1, 5, 24] {
            let ranked = top_candidates(&outputs, limit);
            assert_eq!(ranked.len(), limit);
            for (got, want) in ranked.iter().zip(&expected) {
                assert_eq!(got.choice, want.choice);
                assert!((got.confidence - want.confidence).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_many_splits_with_alternatives() {
        // 5^30 combinations, far beyond usize
        let outputs: Vec<SplitOutput> = (0..30)
            .map(|i| {
                let word = format!("w{i}");
                let mut split = output(&word, &word.to_uppercase(), Some(0.9));
                split.translation.alternatives = (1..=4)
                    .map(|k| alternative(&word, &format!("{word}~{k}"), 0.9 - 0.1 * k as f32))
                    .collect();
                split
            })
            .collect();
        assert_eq!(candidate_count(&outputs), None);

        let original = Arc::new(Sentence::from_text(
            &(0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" "),
        ));
        let joined = join(original, outputs, 4).unwrap();
        assert_eq!(joined.words.len(), 30);
        assert_eq!(joined.alternatives.len(), 4);
        assert!(joined.words.iter().all(|w| !w.text.contains('~')));
        // every runner-up swaps exactly one split for its first alternative
        for alternative in &joined.alternatives {
            let swapped = alternative.words.iter().filter(|w| w.text.contains('~')).count();
            assert_eq!(swapped, 1);
            assert!(alternative.words.iter().all(|w| !w.text.contains('~') || w.text.ends_with("~1")));
        }
        let confidences: Vec<f32> = std::iter::once(&joined)
            .chain(&joined.alternatives)
            .filter_map(|t| t.confidence)
            .collect();
        assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_single_split_alternatives_limited_to_wanted() {
        let mut split = output("a b", "x y", Some(0.9));
        split.translation.alternatives = vec![
            alternative("a b", "x1 y", 0.8),
            alternative("a b", "x2 y", 0.7),
            alternative("a b", "x3 y", 0.6),
        ];
        let original = Arc::new(Sentence::from_text("a b"));

        let joined = join(original.clone(), vec![split], 2).unwrap();
        assert_eq!(joined.alternatives.len(), 2);
        assert_eq!(joined.alternatives[1].text(), "x2 y");
        assert!(joined.alternatives.iter().all(|a| Arc::ptr_eq(&a.source, &original)));
    }

    #[test]
    fn test_alternatives_limited_to_wanted() {
        let mut a = output("a", "x", Some(0.9));
        a.translation.alternatives = vec![alternative("a", "x1", 0.5)];
        let b = output("b", "y", Some(0.8));

        let joined = join(Arc::new(Sentence::from_text("a b")), vec![a, b], 0).unwrap();
        assert!(joined.alternatives.is_empty());
    }

    #[test]
    fn test_malformed_alternative_index() {
        let outputs = vec![output("a", "x", None), output("b", "y", None)];
        let candidate = Candidate {
            choice: vec![0, 2],
            confidence: 1.0,
        };

        let err = materialize(Arc::new(Sentence::from_text("a b")), &outputs, &candidate)
            .unwrap_err();
        assert_eq!(
            err,
            TranslationError::MalformedAlternativeIndex {
                split: 1,
                index: 2,
                available: 0
            }
        );
    }

    #[test]
    fn test_stats_apportion_span() {
        let base = Instant::now();
        let mut first = output("a", "x", None);
        first.timings = timings(base, 0, 10, 20, 3);
        let mut second = output("b", "y", None);
        second.timings = timings(base, 5, 10, 30, 7);

        let stats = stats(&[first, second]);
        assert_eq!(stats.queue_length, 7);
        // span 30ms, decode share (10 + 20) / (20 + 25)
        assert_eq!(stats.queue_time + stats.decode_time, Duration::from_millis(30));
        assert_eq!(stats.decode_time, Duration::from_millis(20));
    }
}
