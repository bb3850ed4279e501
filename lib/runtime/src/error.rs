// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by the translation runtime.
//!
//! - [`DecoderError`] is what a decoder backend reports. It is categorized by
//!   [`DecoderErrorType`], chainable through [`std::error::Error::source()`] and
//!   serializable so it can travel back from a cluster peer.
//! - [`TranslationError`] is what a caller of the submission API receives.
//!   [`TranslationError::kind()`] maps it onto the four handling classes
//!   (admission, timeout, backend, join) plus pool unavailability.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::protocols::{LanguageDirection, Priority};

/// Category of a decoder backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderErrorType {
    /// Uncategorized failure.
    Unknown,
    /// The decoder process crashed or panicked mid-call.
    Crashed,
    /// The decoder returned output that does not match its input.
    MalformedOutput,
    /// Translation-memory lookup failed.
    Memory,
}

impl fmt::Display for DecoderErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderErrorType::Unknown => write!(f, "Unknown"),
            DecoderErrorType::Crashed => write!(f, "Crashed"),
            DecoderErrorType::MalformedOutput => write!(f, "MalformedOutput"),
            DecoderErrorType::Memory => write!(f, "Memory"),
        }
    }
}

/// A serializable, chainable decoder failure.
///
/// `Display` shows only this error; walk `source()` for the causes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderError {
    error_type: DecoderErrorType,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caused_by: Option<Box<DecoderError>>,
}

impl DecoderError {
    /// Create a new error. A non-`DecoderError` cause is flattened into an
    /// `Unknown` chain link carrying its display string.
    pub fn new(
        error_type: DecoderErrorType,
        message: impl Into<String>,
        cause: Option<impl std::error::Error + 'static>,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            caused_by: cause
                .map(|e| Box::new(DecoderError::from(&e as &(dyn std::error::Error + 'static)))),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::typed(DecoderErrorType::Unknown, message)
    }

    pub fn typed(error_type: DecoderErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            caused_by: None,
        }
    }

    pub fn error_type(&self) -> DecoderErrorType {
        self.error_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for DecoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.caused_by
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl<'a> From<&'a (dyn std::error::Error + 'static)> for DecoderError {
    fn from(err: &'a (dyn std::error::Error + 'static)) -> Self {
        if let Some(decoder_err) = err.downcast_ref::<DecoderError>() {
            return decoder_err.clone();
        }

        Self {
            error_type: DecoderErrorType::Unknown,
            message: err.to_string(),
            caused_by: err.source().map(|s| Box::new(DecoderError::from(s))),
        }
    }
}

impl From<anyhow::Error> for DecoderError {
    fn from(err: anyhow::Error) -> Self {
        DecoderError::from(err.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Handling class of a [`TranslationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any decoder resource was touched. Never retried.
    Admission,
    /// A split waited past its deadline.
    Timeout,
    /// The decoder call failed; every split of the job shares the failure.
    Backend,
    /// Result assembly found inconsistent per-split output. A defect upstream.
    Join,
    /// No decoder can currently serve requests, or the runtime is shutting down.
    Unavailable,
}

/// Failure reported to a submitter.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TranslationError {
    #[error("unsupported language direction: {0}")]
    UnsupportedLanguage(LanguageDirection),

    #[error("scheduler saturated at {priority} priority")]
    Saturated { priority: Priority },

    #[error("translation timed out in queue")]
    Timeout,

    #[error("decoder failure: {0}")]
    Decoder(#[source] DecoderError),

    #[error(
        "malformed alternative index {index} for split {split}: only {available} alternatives available"
    )]
    MalformedAlternativeIndex {
        split: usize,
        index: usize,
        available: usize,
    },

    #[error("no decoder available")]
    DecoderUnavailable,

    #[error("translation runtime is shutting down")]
    Shutdown,

    #[error("cluster dispatch failed: {0}")]
    Dispatch(String),
}

impl TranslationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslationError::UnsupportedLanguage(_) | TranslationError::Saturated { .. } => {
                ErrorKind::Admission
            }
            TranslationError::Timeout => ErrorKind::Timeout,
            TranslationError::Decoder(_) | TranslationError::Dispatch(_) => ErrorKind::Backend,
            TranslationError::MalformedAlternativeIndex { .. } => ErrorKind::Join,
            TranslationError::DecoderUnavailable | TranslationError::Shutdown => {
                ErrorKind::Unavailable
            }
        }
    }
}

impl From<DecoderError> for TranslationError {
    fn from(err: DecoderError) -> Self {
        TranslationError::Decoder(err)
    }
}
