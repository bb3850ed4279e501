// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request-level scenarios across the service, scheduler, pool and joiner.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::decoder::{DecoderWorker, DecoderWorkerPool, Device};
use crate::error::{DecoderError, ErrorKind, TranslationError};
use crate::memory::TranslationMemory;
use crate::protocols::{LanguageDirection, Priority, Sentence, Suggestion};
use crate::scheduler::SchedulerOptions;
use crate::service::{ServiceOptions, TranslationRequest, TranslationService};
use crate::testing::{CallLog, ScriptedWorker, StaticMemory, has_overlapping_calls};

fn en_it() -> LanguageDirection {
    LanguageDirection::new("en", "it")
}

fn options(max_split_length: usize, max_batch_size: usize) -> ServiceOptions {
    ServiceOptions {
        max_split_length,
        scheduler: SchedulerOptions::builder()
            .max_batch_size(max_batch_size)
            .max_batch_wait(Duration::from_millis(1))
            .build()
            .unwrap(),
        ..Default::default()
    }
}

fn start(options: ServiceOptions, workers: Vec<ScriptedWorker>) -> TranslationService {
    start_with_memory(options, workers, None)
}

fn start_with_memory(
    options: ServiceOptions,
    workers: Vec<ScriptedWorker>,
    memory: Option<Arc<dyn TranslationMemory>>,
) -> TranslationService {
    let pool = DecoderWorkerPool::new(
        workers
            .into_iter()
            .map(|w| Box::new(w) as Box<dyn DecoderWorker>)
            .collect(),
    );
    TranslationService::start(options, pool, memory).unwrap()
}

fn request(text: &str) -> TranslationRequest {
    TranslationRequest::new(en_it(), Sentence::from_text(text))
}

#[test]
fn test_long_sentence_is_split_and_rejoined() {
    let log = CallLog::default();
    let service = start(
        options(3, 8),
        vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).with_log(log.clone())],
    );

    let translation = service
        .submit(request("A B C D E").with_priority(Priority::Normal))
        .unwrap()
        .blocking_wait()
        .unwrap();

    let decoded: usize = log.lock().iter().map(|call| call.batch).sum();
    assert_eq!(decoded, 2);

    let words: Vec<&str> = translation.words.iter().map(|w| w.text.as_str()).collect();
    assert_eq!(words, vec!["A", "B", "C", "D", "E"]);
    assert!(translation.words[2].right_space_required);
    assert!(translation.words[3].left_space_required);
    assert_eq!(translation.text(), "A B C D E");
    assert_eq!(translation.source.text(), "A B C D E");

    let alignment = translation.alignment.unwrap();
    assert_eq!(alignment.points, (0..5).map(|i| (i, i)).collect::<Vec<_>>());
    assert_eq!(translation.stats.queue_length, 0);
}

#[test]
fn test_workers_are_never_shared() {
    let log = CallLog::default();
    let workers = (0..3)
        .map(|i| {
            ScriptedWorker::new(Device::Cpu(i), vec![en_it()])
                .with_delay(Duration::from_millis(2))
                .with_log(log.clone())
        })
        .collect();
    let service = Arc::new(start(options(4, 2), workers));

    let clients: Vec<_> = (0..24)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .submit(request(&format!("sentence number {i} with several words")))
                    .and_then(|pending| pending.blocking_wait())
            })
        })
        .collect();

    for client in clients {
        let translation = client.join().unwrap().unwrap();
        assert!(translation.text().starts_with("SENTENCE NUMBER"));
    }

    let log = log.lock();
    assert!(!log.is_empty());
    assert!(!has_overlapping_calls(&log));
}

#[test]
fn test_backend_failure_fails_the_request() {
    let worker = ScriptedWorker::new(Device::Gpu(0), vec![en_it()])
        .fail_with(DecoderError::msg("device lost"));
    let service = start(options(2, 8), vec![worker]);

    let err = service
        .submit(request("one two three four five"))
        .unwrap()
        .blocking_wait()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    match err {
        TranslationError::Decoder(e) => assert_eq!(e.message(), "device lost"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_dead_worker_is_restarted_between_requests() {
    let worker = ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).dies_after(1);
    let restarts = worker.restarts();
    let service = start(options(10, 8), vec![worker]);

    let first = service.submit(request("hello")).unwrap().blocking_wait().unwrap();
    assert_eq!(first.text(), "HELLO");

    let deadline = Instant::now() + Duration::from_secs(5);
    while restarts.load(Ordering::SeqCst) == 0 || service.pool().alive() == 0 {
        assert!(Instant::now() < deadline, "worker was not restarted");
        thread::sleep(Duration::from_millis(5));
    }

    let second = service.submit(request("again")).unwrap().blocking_wait().unwrap();
    assert_eq!(second.text(), "AGAIN");
}

#[test]
fn test_split_times_out_while_worker_is_busy() {
    let worker = ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).with_delay(Duration::from_millis(100));
    let service = start(options(10, 1), vec![worker]);

    let busy = service.submit(request("slow")).unwrap();
    thread::sleep(Duration::from_millis(20));
    let late = service
        .submit(request("late").with_timeout(Duration::from_millis(1)))
        .unwrap();

    assert_eq!(late.blocking_wait().unwrap_err(), TranslationError::Timeout);
    assert_eq!(busy.blocking_wait().unwrap().text(), "SLOW");
    assert!(service.scheduler().is_empty());
}

#[test]
fn test_zero_timeout_is_rejected_at_admission() {
    let service = start(options(10, 8), vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])]);
    let err = service
        .submit(request("x").with_timeout(Duration::ZERO))
        .unwrap_err();
    assert_eq!(err, TranslationError::Timeout);
}

#[test]
fn test_unsupported_direction_is_rejected() {
    let service = start(options(10, 8), vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])]);
    let direction = LanguageDirection::new("it", "en");
    let err = service
        .submit(TranslationRequest::new(direction.clone(), Sentence::from_text("ciao")))
        .unwrap_err();
    assert_eq!(err, TranslationError::UnsupportedLanguage(direction));
    assert_eq!(err.kind(), ErrorKind::Admission);
}

#[test]
fn test_empty_sentence_skips_decoder() {
    let log = CallLog::default();
    let service = start(
        options(10, 8),
        vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).with_log(log.clone())],
    );
    let translation = service.submit(request("   ")).unwrap().blocking_wait().unwrap();
    assert!(translation.words.is_empty());
    assert!(log.lock().is_empty());
}

#[test]
fn test_perfect_memory_match_skips_decoder() {
    let log = CallLog::default();
    let memory = StaticMemory::new(vec![Suggestion::new(
        Sentence::from_text("good night"),
        Sentence::from_text("buona notte"),
        1.0,
    )]);
    let service = start_with_memory(
        options(10, 8),
        vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).with_log(log.clone())],
        Some(Arc::new(memory)),
    );

    let translation = service.submit(request("good night")).unwrap().blocking_wait().unwrap();
    assert_eq!(translation.text(), "buona notte");
    assert!(log.lock().is_empty());

    // partial matches still go through the decoder
    let translation = service.submit(request("good morning")).unwrap().blocking_wait().unwrap();
    assert_eq!(translation.text(), "GOOD MORNING");
}

#[test]
fn test_echo_server_returns_best_suggestion() {
    let service = start(
        ServiceOptions {
            echo_server: true,
            ..options(10, 8)
        },
        vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])],
    );
    let suggestions = vec![
        Suggestion::new(Sentence::from_text("a"), Sentence::from_text("low"), 0.2),
        Suggestion::new(Sentence::from_text("a"), Sentence::from_text("high"), 0.6),
    ];
    let translation = service
        .submit(request("a").with_suggestions(suggestions))
        .unwrap()
        .blocking_wait()
        .unwrap();
    assert_eq!(translation.text(), "high");
}

#[test]
fn test_alignment_request_is_not_split() {
    let log = CallLog::default();
    let service = start(
        options(2, 8),
        vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()]).with_log(log.clone())],
    );

    let translation = service
        .submit(request("the red car").with_reference(Sentence::from_text("la macchina rossa")))
        .unwrap()
        .blocking_wait()
        .unwrap();

    assert_eq!(translation.text(), "la macchina rossa");
    assert_eq!(translation.alignment.unwrap().points.len(), 3);
    assert_eq!(log.lock().iter().map(|c| c.batch).sum::<usize>(), 1);
}

#[test]
fn test_alternatives_across_splits() {
    let service = start(options(2, 8), vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])]);

    let translation = service
        .submit(request("a b c d").with_alternatives(2))
        .unwrap()
        .blocking_wait()
        .unwrap();

    assert_eq!(translation.text(), "A B C D");
    assert_eq!(translation.alternatives.len(), 2);
    let confidence = translation.confidence.unwrap();
    assert!((confidence - 0.9).abs() < 1e-6);
    assert!(
        translation
            .alternatives
            .iter()
            .all(|alt| alt.confidence.unwrap() <= confidence)
    );
}

#[test]
fn test_shutdown_rejects_new_requests() {
    let service = start(options(10, 8), vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])]);
    service.shutdown();

    assert_eq!(service.submit(request("x")).unwrap_err(), TranslationError::Shutdown);
    assert!(service.pool().is_closed());
}

#[test]
fn test_service_from_config() {
    let mut config = nmt_config::NmtConfig::default();
    config.decoder.threads = Some(2);
    config.request.max_split_length = 3;

    let service = TranslationService::from_config(
        &config,
        |device| Ok(Box::new(ScriptedWorker::new(device, vec![en_it()])) as Box<dyn DecoderWorker>),
        None,
    )
    .unwrap();

    assert_eq!(service.pool().size(), 2);
    assert_eq!(service.options().max_split_length, 3);
    let translation = service.submit(request("x y z w")).unwrap().blocking_wait().unwrap();
    assert_eq!(translation.text(), "X Y Z W");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submission_is_awaitable() {
    let service = start(options(2, 8), vec![ScriptedWorker::new(Device::Cpu(0), vec![en_it()])]);

    let pending = service.submit(request("async world here")).unwrap();
    let id = pending.request_id();
    let translation = pending.await.unwrap();

    assert_eq!(translation.text(), "ASYNC WORLD HERE");
    assert!(!id.is_nil());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_async_submissions() {
    let service = Arc::new(start(
        options(3, 4),
        vec![
            ScriptedWorker::new(Device::Gpu(0), vec![en_it()]),
            ScriptedWorker::new(Device::Gpu(1), vec![en_it()]),
        ],
    ));

    let pending: Vec<_> = (0..10)
        .map(|i| service.submit(request(&format!("w{i} x y z")).with_priority(Priority::High)))
        .collect::<Result<_, _>>()
        .unwrap();
    let results = futures::future::join_all(pending.into_iter().map(|p| p.wait())).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().text(), format!("W{i} X Y Z"));
    }
}
