// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::DecoderError;
use crate::protocols::{LanguageDirection, Sentence, Suggestion};

/// Read-only source of translation-memory matches.
///
/// Results bias decoding; they are never required for it. Implementations
/// return at most `limit` suggestions, best first.
pub trait TranslationMemory: Send + Sync {
    fn search(
        &self,
        direction: &LanguageDirection,
        sentence: &Sentence,
        limit: usize,
    ) -> Result<Vec<Suggestion>, DecoderError>;
}
