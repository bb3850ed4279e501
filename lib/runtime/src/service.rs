// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Submission API.
//!
//! [`TranslationService`] wires the scheduler, the decoder pool and the
//! executor threads together. A submitted sentence is split, enqueued at its
//! priority and answered through a [`PendingTranslation`], which collects the
//! per-split outcomes from the request's completion channel and joins them.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use derive_builder::Builder;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::decoder::{Availability, DecoderWorker, DecoderWorkerPool, Device};
use crate::error::{DecoderError, TranslationError};
use crate::executor::DecoderExecutor;
use crate::joiner;
use crate::memory::TranslationMemory;
use crate::protocols::{LanguageDirection, Priority, Sentence, Suggestion, Translation};
use crate::queue::QueueError;
use crate::scheduler::{
    CompletionReceiver, Scheduler, SchedulerOptions, SplitId, SplitOutcome, SplitOutput,
    SplitTask, TranslationSplit, merge_suggestions,
};
use crate::splitter;

/// Errors raised while starting a [`TranslationService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid queue layout: {0}")]
    Queue(#[from] QueueError),

    #[error("decoder pool failed to start: {0}")]
    Decoder(#[from] DecoderError),

    #[error("failed to spawn executor threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Service-level knobs. Built from [`nmt_config::NmtConfig`] or by hand.
#[derive(Debug, Clone, Builder)]
#[builder(
    pattern = "owned",
    build_fn(error = "ServiceOptionsBuilderError", validate = "Self::validate")
)]
pub struct ServiceOptions {
    /// Longest split handed to a decoder, in words.
    #[builder(default = "100")]
    pub max_split_length: usize,

    /// Default queue deadline per priority, highest first. `None` waits forever.
    #[builder(default = "[Some(Duration::from_secs(10)), Some(Duration::from_secs(30)), None]")]
    pub timeouts: [Option<Duration>; Priority::COUNT],

    #[builder(default = "4")]
    pub suggestions_limit: usize,

    /// Answer with the best suggestion instead of decoding.
    #[builder(default = "false")]
    pub echo_server: bool,

    #[builder(default)]
    pub scheduler: SchedulerOptions,
}

/// Error type for ServiceOptionsBuilder.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceOptionsBuilderError {
    #[error("Uninitialized field: {0}")]
    UninitializedField(&'static str),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<derive_builder::UninitializedFieldError> for ServiceOptionsBuilderError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        Self::UninitializedField(e.field_name())
    }
}

impl From<String> for ServiceOptionsBuilderError {
    fn from(s: String) -> Self {
        Self::ValidationError(s)
    }
}

impl ServiceOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_split_length == Some(0) {
            return Err("max_split_length must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ServiceOptions {
    pub fn builder() -> ServiceOptionsBuilder {
        ServiceOptionsBuilder::default()
    }

    pub fn timeout_for(&self, priority: Priority) -> Option<Duration> {
        self.timeouts[priority.index()]
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_split_length: 100,
            timeouts: [
                Some(Duration::from_secs(10)),
                Some(Duration::from_secs(30)),
                None,
            ],
            suggestions_limit: 4,
            echo_server: false,
            scheduler: SchedulerOptions::default(),
        }
    }
}

impl From<&nmt_config::NmtConfig> for ServiceOptions {
    fn from(config: &nmt_config::NmtConfig) -> Self {
        Self {
            max_split_length: config.request.max_split_length,
            timeouts: config.request.timeouts(),
            suggestions_limit: config.decoder.suggestions_limit,
            echo_server: config.decoder.echo_server,
            scheduler: SchedulerOptions::from(config),
        }
    }
}

/// One sentence to translate, or to align when `reference` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub direction: LanguageDirection,
    pub sentence: Sentence,
    pub priority: Priority,
    /// Caller supplied suggestions. When `None` the translation memory is queried.
    pub suggestions: Option<Vec<Suggestion>>,
    /// Number of ranked alternatives wanted besides the primary translation.
    pub alternatives: usize,
    /// Overrides the per-priority default deadline.
    pub timeout: Option<Duration>,
    pub reference: Option<Sentence>,
}

impl TranslationRequest {
    pub fn new(direction: LanguageDirection, sentence: Sentence) -> Self {
        Self {
            direction,
            sentence,
            priority: Priority::default(),
            suggestions: None,
            alternatives: 0,
            timeout: None,
            reference: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn with_alternatives(mut self, alternatives: usize) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_reference(mut self, reference: Sentence) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// The translation side of a node: scheduler, decoder pool and executor threads.
pub struct TranslationService {
    scheduler: Arc<Scheduler>,
    pool: DecoderWorkerPool,
    executor: DecoderExecutor,
    memory: Option<Arc<dyn TranslationMemory>>,
    options: ServiceOptions,
}

impl TranslationService {
    /// Starts executor threads over an existing pool, one per worker.
    pub fn start(
        options: ServiceOptions,
        pool: DecoderWorkerPool,
        memory: Option<Arc<dyn TranslationMemory>>,
    ) -> Result<Self, ServiceError> {
        let scheduler = Arc::new(Scheduler::new(options.scheduler.clone())?);
        let executor = DecoderExecutor::start(Arc::clone(&scheduler), pool.clone(), pool.size())?;

        tracing::info!(
            workers = pool.size(),
            max_split_length = options.max_split_length,
            max_batch_size = options.scheduler.max_batch_size,
            "translation service started"
        );

        Ok(Self {
            scheduler,
            pool,
            executor,
            memory,
            options,
        })
    }

    /// Starts one worker per configured device through `factory`, then the service.
    pub fn from_config<F>(
        config: &nmt_config::NmtConfig,
        factory: F,
        memory: Option<Arc<dyn TranslationMemory>>,
    ) -> Result<Self, ServiceError>
    where
        F: Fn(Device) -> Result<Box<dyn DecoderWorker>, DecoderError> + Sync,
    {
        let devices = Device::from_config(&config.decoder);
        let pool = DecoderWorkerPool::start(&devices, factory)?;
        Self::start(ServiceOptions::from(config), pool, memory)
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &DecoderWorkerPool {
        &self.pool
    }

    pub fn supports(&self, direction: &LanguageDirection) -> bool {
        self.pool.supports(direction)
    }

    pub fn availability(&self) -> watch::Receiver<Availability> {
        self.pool.subscribe()
    }

    /// Admits a request.
    ///
    /// Admission failures (unsupported direction, saturated bucket, a deadline
    /// already in the past, shutdown) are returned here; everything after
    /// admission is reported through the returned [`PendingTranslation`].
    pub fn submit(&self, request: TranslationRequest) -> Result<PendingTranslation, TranslationError> {
        let TranslationRequest {
            direction,
            sentence,
            priority,
            suggestions,
            alternatives,
            timeout,
            reference,
        } = request;

        if !self.pool.supports(&direction) {
            return Err(TranslationError::UnsupportedLanguage(direction));
        }
        if self.scheduler.is_shutdown() {
            return Err(TranslationError::Shutdown);
        }

        let timeout = timeout.or(self.options.timeout_for(priority));
        if timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(TranslationError::Timeout);
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let id = Uuid::new_v4();
        let original = Arc::new(sentence);
        if original.is_empty() {
            return Ok(PendingTranslation::ready(id, Translation::empty(original)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let splits = match reference {
            Some(reference) => vec![TranslationSplit::new(
                SplitId { request: id, index: 0 },
                Arc::clone(&original),
                SplitTask::Align {
                    reference: Arc::new(reference),
                },
                priority,
                direction,
                deadline,
                tx,
            )],
            None => {
                let suggestions = self.suggestions(&direction, &original, suggestions);
                if let Some(translation) = self.shortcut(&original, &suggestions) {
                    return Ok(PendingTranslation::ready(id, translation));
                }

                let suggestions: Arc<[Suggestion]> = Arc::from(suggestions);
                splitter::split(&original, self.options.max_split_length)
                    .into_iter()
                    .enumerate()
                    .map(|(index, piece)| {
                        TranslationSplit::new(
                            SplitId { request: id, index },
                            Arc::new(piece),
                            SplitTask::Translate {
                                suggestions: Arc::clone(&suggestions),
                                alternatives,
                            },
                            priority,
                            direction.clone(),
                            deadline,
                            tx.clone(),
                        )
                    })
                    .collect()
            }
        };

        let expected = splits.len();
        tracing::debug!(request = %id, %priority, splits = expected, "request admitted");
        self.scheduler.submit_all(splits)?;

        Ok(PendingTranslation {
            id,
            state: PendingState::Splits {
                original,
                receiver: rx,
                expected,
                alternatives,
            },
        })
    }

    /// Withdraws the still-queued splits of a request.
    pub fn cancel(&self, request: Uuid) -> usize {
        self.scheduler.cancel(request)
    }

    /// Stops accepting work, fails queued splits and joins the executor threads.
    pub fn shutdown(&self) {
        tracing::info!("translation service shutting down");
        self.executor.shutdown();
    }

    fn suggestions(
        &self,
        direction: &LanguageDirection,
        sentence: &Sentence,
        provided: Option<Vec<Suggestion>>,
    ) -> Vec<Suggestion> {
        if let Some(provided) = provided {
            let limit = provided.len();
            return merge_suggestions([provided.as_slice()], limit);
        }
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        if self.options.suggestions_limit == 0 {
            return Vec::new();
        }

        match memory.search(direction, sentence, self.options.suggestions_limit) {
            Ok(mut found) => {
                found.sort_by(|a, b| b.score.total_cmp(&a.score));
                found.truncate(self.options.suggestions_limit);
                found
            }
            Err(e) => {
                tracing::warn!(%direction, error = %e, "translation memory lookup failed; decoding without suggestions");
                Vec::new()
            }
        }
    }

    /// A perfect match, or any match in echo mode, answers without decoding.
    fn shortcut(&self, original: &Arc<Sentence>, suggestions: &[Suggestion]) -> Option<Translation> {
        let best = suggestions.first()?;
        (self.options.echo_server || best.is_perfect_match())
            .then(|| Translation::new(Arc::clone(original), best.target.words.clone()))
    }
}

impl Drop for TranslationService {
    fn drop(&mut self) {
        if !self.scheduler.is_shutdown() {
            self.shutdown();
        }
    }
}

enum PendingState {
    Ready(Result<Translation, TranslationError>),
    Splits {
        original: Arc<Sentence>,
        receiver: CompletionReceiver,
        expected: usize,
        alternatives: usize,
    },
}

/// The eventual result of a submitted request.
///
/// Await it directly, call [`wait`](Self::wait), or use
/// [`blocking_wait`](Self::blocking_wait) outside of an async runtime. The
/// first failed split fails the whole request.
pub struct PendingTranslation {
    id: Uuid,
    state: PendingState,
}

impl PendingTranslation {
    fn ready(id: Uuid, translation: Translation) -> Self {
        Self {
            id,
            state: PendingState::Ready(Ok(translation)),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> Result<Translation, TranslationError> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Splits {
                original,
                mut receiver,
                expected,
                alternatives,
            } => {
                let mut collector = Collector::new(expected);
                while !collector.is_done() {
                    collector.accept(receiver.recv().await)?;
                }
                joiner::join(original, collector.finish(), alternatives)
            }
        }
    }

    /// Blocks the current thread until the translation is ready.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_wait(self) -> Result<Translation, TranslationError> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Splits {
                original,
                mut receiver,
                expected,
                alternatives,
            } => {
                let mut collector = Collector::new(expected);
                while !collector.is_done() {
                    collector.accept(receiver.blocking_recv())?;
                }
                joiner::join(original, collector.finish(), alternatives)
            }
        }
    }
}

impl IntoFuture for PendingTranslation {
    type Output = Result<Translation, TranslationError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl std::fmt::Debug for PendingTranslation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTranslation")
            .field("id", &self.id)
            .field("ready", &matches!(self.state, PendingState::Ready(_)))
            .finish()
    }
}

/// Places split outcomes into their slots as they arrive.
struct Collector {
    slots: Vec<Option<SplitOutput>>,
    remaining: usize,
}

impl Collector {
    fn new(expected: usize) -> Self {
        Self {
            slots: (0..expected).map(|_| None).collect(),
            remaining: expected,
        }
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }

    fn accept(&mut self, outcome: Option<SplitOutcome>) -> Result<(), TranslationError> {
        // every split reports before its sender is dropped
        let outcome = outcome.ok_or(TranslationError::Shutdown)?;
        let output = outcome.result?;
        match self.slots.get_mut(outcome.id.index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(output);
                self.remaining -= 1;
            }
            _ => tracing::warn!(index = outcome.id.index, "unexpected split outcome ignored"),
        }
        Ok(())
    }

    fn finish(self) -> Vec<SplitOutput> {
        self.slots.into_iter().flatten().collect()
    }
}
