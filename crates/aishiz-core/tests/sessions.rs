mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aishiz_core::{
    channel_callback, FnCallback, GenerationError, GenerationRequest, Outcome, SamplingParams,
    SessionId, StopReason, StreamEvent, RECENT_SUMMARIES,
};
use common::{assert_single_terminal_last, controller, drain, tokens, Script};

fn request(max_tokens: u32) -> GenerationRequest {
    GenerationRequest::new("/models/test.gguf", "tell me a story").with_max_tokens(max_tokens)
}

#[test]
fn max_tokens_bounds_the_stream() {
    let (ctl, _log) = controller(Script::default());
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(5), Some(cb));
    assert!(id.is_valid());
    let summary = ctl.join(id).expect("worker joined");

    let events = drain(&rx);
    assert_single_terminal_last(&events);
    assert_eq!(events.last(), Some(&StreamEvent::Complete));
    assert_eq!(tokens(&events), vec!["t0 ", "t1 ", "t2 ", "t3 ", "t4 "]);
    assert!(matches!(
        summary.outcome,
        Outcome::Completed {
            generated: 5,
            stop: StopReason::MaxTokens
        }
    ));
}

#[test]
fn end_of_sequence_stops_early() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(3),
        ..Script::default()
    });
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(50), Some(cb));
    let summary = ctl.join(id).unwrap();

    let events = drain(&rx);
    assert_eq!(tokens(&events).len(), 3);
    assert_eq!(events.last(), Some(&StreamEvent::Complete));
    assert_eq!(summary.outcome.stop_reason(), Some(StopReason::EndOfSequence));
}

#[test]
fn empty_model_path_errors_without_tokens() {
    let (ctl, log) = controller(Script::default());
    let (cb, rx) = channel_callback();

    let req = GenerationRequest::new("   ", "hello");
    let id = ctl.start_generation(req, Some(cb));
    assert!(id.is_valid());
    let summary = ctl.join(id).unwrap();

    assert_eq!(
        drain(&rx),
        vec![StreamEvent::Error(
            "Model path is empty. Select a model first.".into()
        )]
    );
    assert!(matches!(
        summary.outcome,
        Outcome::Errored(GenerationError::EmptyModelPath)
    ));
    assert!(log.entries().is_empty());
}

#[test]
fn setup_failures_report_their_message_and_release_partial_resources() {
    let cases = [
        (
            Script {
                fail_load: true,
                ..Script::default()
            },
            "Failed to load model. Check if the file is a valid GGUF model.",
            vec![],
        ),
        (
            Script {
                fail_context: true,
                ..Script::default()
            },
            "Failed to create inference context.",
            vec!["drop model"],
        ),
        (
            Script {
                fail_sampler: true,
                ..Script::default()
            },
            "Failed to initialize sampler.",
            vec!["drop context", "drop model"],
        ),
        (
            Script {
                fail_prompt_decode: true,
                ..Script::default()
            },
            "Failed to process prompt.",
            vec!["drop sampler", "drop context", "drop model"],
        ),
    ];

    for (script, message, drops) in cases {
        let (ctl, log) = controller(script);
        let (cb, rx) = channel_callback();
        let id = ctl.start_generation(request(10), Some(cb));
        let summary = ctl.join(id).unwrap();

        assert_eq!(drain(&rx), vec![StreamEvent::Error(message.into())]);
        assert!(summary.outcome.is_error());
        assert_eq!(log.entries(), drops, "case: {message}");
    }
}

#[test]
fn blank_prompt_is_a_prompt_error() {
    let (ctl, _log) = controller(Script::default());
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(GenerationRequest::new("/m.gguf", " \n "), Some(cb));
    let summary = ctl.join(id).unwrap();

    assert_eq!(
        drain(&rx),
        vec![StreamEvent::Error("Failed to process prompt.".into())]
    );
    assert!(matches!(
        summary.outcome,
        Outcome::Errored(GenerationError::EmptyPrompt)
    ));
}

#[test]
fn decode_failure_mid_stream_completes_with_partial_output() {
    let (ctl, _log) = controller(Script {
        fail_decode_after: Some(2),
        ..Script::default()
    });
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(10), Some(cb));
    let summary = ctl.join(id).unwrap();

    let events = drain(&rx);
    assert_eq!(tokens(&events), vec!["t0 ", "t1 "]);
    assert_eq!(events.last(), Some(&StreamEvent::Complete));
    assert_eq!(summary.outcome.stop_reason(), Some(StopReason::DecodeFailed));
}

#[test]
fn resources_are_released_in_reverse_order_before_the_terminal_callback() {
    let (ctl, log) = controller(Script {
        eos_after: Some(1),
        ..Script::default()
    });
    let on_complete_log = log.clone();
    let cb = FnCallback::new()
        .on_token(|_| {})
        .on_complete(move || on_complete_log.push("on_complete"))
        .on_error(|_| {})
        .into_arc();

    let id = ctl.start_generation(request(10), Some(cb));
    ctl.join(id).unwrap();

    let entries = log.entries();
    let tail: Vec<&str> = entries.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec!["drop sampler", "drop context", "drop model", "on_complete"]
    );
}

#[test]
fn long_prompts_are_decoded_in_chunks_with_logits_on_the_last_position() {
    let (ctl, log) = controller(Script {
        eos_after: Some(0),
        ..Script::default()
    });
    let (cb, _rx) = channel_callback();

    let mut req = GenerationRequest::new("/m.gguf", "one two three four five");
    req.context.n_batch = 2;
    let id = ctl.start_generation(req, Some(cb));
    ctl.join(id).unwrap();

    let prefill: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("prefill"))
        .collect();
    assert_eq!(prefill, vec!["prefill 2 -", "prefill 2 -", "prefill 1 0"]);
}

#[test]
fn split_codepoints_are_held_until_complete() {
    let (ctl, _log) = controller(Script {
        pieces: Some(vec![vec![0xE2, 0x82], vec![0xAC], b"!".to_vec()]),
        ..Script::default()
    });
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(10), Some(cb));
    ctl.join(id).unwrap();

    let events = drain(&rx);
    assert_eq!(tokens(&events), vec!["€", "!"]);
    assert_eq!(events.last(), Some(&StreamEvent::Complete));
}

#[test]
fn finished_session_leaves_the_registry() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(2),
        ..Script::default()
    });
    let (cb, _rx) = channel_callback();

    let id = ctl.start_generation(request(10), Some(cb));
    ctl.join(id).unwrap();

    assert!(!ctl.is_active(id));
    assert!(!ctl.registry().contains(id));
    assert!(ctl.active_sessions().is_empty());
    assert!(ctl.join(id).is_none());
}

#[test]
fn stop_with_unknown_or_finished_ids_is_a_no_op() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(1),
        ..Script::default()
    });
    let (cb, rx) = channel_callback();
    let id = ctl.start_generation(request(10), Some(cb));
    ctl.join(id).unwrap();
    let before = drain(&rx);

    ctl.stop_generation(SessionId::INVALID);
    ctl.stop_generation(SessionId::from_raw(u64::MAX));
    ctl.stop_generation(id);
    ctl.stop_generation(id);

    assert_single_terminal_last(&before);
    assert!(drain(&rx).is_empty());
}

#[test]
fn ids_are_never_reused() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(0),
        ..Script::default()
    });

    let mut ids = Vec::new();
    for _ in 0..5 {
        let (cb, _rx) = channel_callback();
        let id = ctl.start_generation(request(1), Some(cb));
        ctl.join(id).unwrap();
        ids.push(id);
    }
    assert!(ids.iter().all(|id| id.is_valid()));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn stop_ends_the_stream_within_one_token() {
    let (ctl, _log) = controller(Script {
        step_delay: Duration::from_millis(5),
        ..Script::default()
    });

    let stopped = Arc::new(AtomicBool::new(false));
    let after_stop = Arc::new(AtomicUsize::new(0));
    let (first_tx, first_rx) = std::sync::mpsc::channel();
    let completed = Arc::new(AtomicUsize::new(0));

    let cb = {
        let stopped = Arc::clone(&stopped);
        let after_stop = Arc::clone(&after_stop);
        let completed = Arc::clone(&completed);
        FnCallback::new()
            .on_token(move |_| {
                if stopped.load(Ordering::SeqCst) {
                    after_stop.fetch_add(1, Ordering::SeqCst);
                }
                let _ = first_tx.send(());
            })
            .on_complete(move || {
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(|_| {})
            .into_arc()
    };

    let id = ctl.start_generation(request(100_000), Some(cb));
    first_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first token");

    stopped.store(true, Ordering::SeqCst);
    ctl.stop_generation(id);
    let summary = ctl.join(id).unwrap();

    assert!(after_stop.load(Ordering::SeqCst) <= 1);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(summary.outcome.stop_reason(), Some(StopReason::Cancelled));
}

#[test]
fn concurrent_sessions_are_independent() {
    let (ctl, _log) = controller(Script {
        step_delay: Duration::from_millis(2),
        ..Script::default()
    });
    let (cb_a, rx_a) = channel_callback();
    let (cb_b, rx_b) = channel_callback();

    let a = ctl.start_generation(request(100_000), Some(cb_a));
    let b = ctl.start_generation(request(20), Some(cb_b));
    assert!(a < b, "ids must increase: {a} then {b}");

    assert!(matches!(
        rx_a.recv_timeout(Duration::from_secs(5)),
        Ok(StreamEvent::Token(_))
    ));
    ctl.stop_generation(a);

    let sa = ctl.join(a).unwrap();
    let sb = ctl.join(b).unwrap();
    assert_eq!(sa.outcome.stop_reason(), Some(StopReason::Cancelled));
    assert_eq!(sb.outcome.stop_reason(), Some(StopReason::MaxTokens));

    let events_b = drain(&rx_b);
    assert_single_terminal_last(&events_b);
    assert_eq!(tokens(&events_b).len(), 20);
    assert_eq!(drain(&rx_a).last(), Some(&StreamEvent::Complete));
}

#[test]
fn missing_or_partial_callback_is_rejected() {
    let (ctl, _log) = controller(Script::default());

    assert_eq!(ctl.start_generation(request(5), None), SessionId::INVALID);

    let partial = FnCallback::new().on_token(|_| {}).on_complete(|| {}).into_arc();
    assert_eq!(
        ctl.start_generation(request(5), Some(partial)),
        SessionId::INVALID
    );
    assert!(ctl.registry().is_empty());
    assert!(ctl.active_sessions().is_empty());
}

#[test]
fn panicking_callback_does_not_break_the_session() {
    let (ctl, _log) = controller(Script::default());
    let completed = Arc::new(AtomicUsize::new(0));
    let done = Arc::clone(&completed);
    let cb = FnCallback::new()
        .on_token(|_| panic!("host bug"))
        .on_complete(move || {
            done.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(|_| {})
        .into_arc();

    let id = ctl.start_generation(request(3), Some(cb));
    let summary = ctl.join(id).unwrap();

    assert_eq!(summary.outcome.stop_reason(), Some(StopReason::MaxTokens));
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn engine_panic_becomes_an_error_and_releases_resources() {
    let (ctl, log) = controller(Script {
        panic_on_sample: true,
        ..Script::default()
    });
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(5), Some(cb));
    let summary = ctl.join(id).unwrap();

    assert_eq!(
        drain(&rx),
        vec![StreamEvent::Error("Generation worker panicked.".into())]
    );
    assert!(matches!(
        summary.outcome,
        Outcome::Errored(GenerationError::WorkerPanicked)
    ));
    assert_eq!(
        log.entries()
            .into_iter()
            .filter(|e| e.starts_with("drop"))
            .collect::<Vec<_>>(),
        vec!["drop sampler", "drop context", "drop model"]
    );
    assert!(!ctl.is_active(id));
}

#[test]
fn shutdown_cancels_and_joins_everything() {
    let (ctl, _log) = controller(Script {
        step_delay: Duration::from_millis(2),
        ..Script::default()
    });

    let mut receivers = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let (cb, rx) = channel_callback();
        ids.push(ctl.start_generation(request(100_000), Some(cb)));
        receivers.push(rx);
    }
    assert_eq!(ctl.active_sessions().len(), 3);

    let summaries = ctl.shutdown();
    assert_eq!(summaries.iter().map(|s| s.id).collect::<Vec<_>>(), ids);
    assert!(summaries
        .iter()
        .all(|s| s.outcome.stop_reason() == Some(StopReason::Cancelled)));
    for rx in &receivers {
        assert_single_terminal_last(&drain(rx));
    }
    assert!(ctl.registry().is_empty());
}

#[test]
fn reap_collects_only_finished_workers() {
    let (ctl, _log) = controller(Script {
        step_delay: Duration::from_millis(2),
        ..Script::default()
    });
    let (quick_cb, quick_rx) = channel_callback();
    let (slow_cb, _slow_rx) = channel_callback();

    let quick = ctl.start_generation(request(1), Some(quick_cb));
    let slow = ctl.start_generation(request(100_000), Some(slow_cb));

    // Terminal event arrives just before the worker returns.
    assert_eq!(
        quick_rx
            .iter()
            .find(StreamEvent::is_terminal),
        Some(StreamEvent::Complete)
    );
    let mut reaped = Vec::new();
    for _ in 0..500 {
        reaped.extend(ctl.reap_finished());
        if !reaped.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(reaped.iter().map(|s| s.id).collect::<Vec<_>>(), vec![quick]);

    ctl.stop_generation(slow);
    assert!(ctl.join(slow).is_some());
}

#[test]
fn unjoined_sessions_do_not_pile_up_worker_handles() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(0),
        ..Script::default()
    });

    let mut ids = Vec::new();
    for _ in 0..50 {
        let (cb, rx) = channel_callback();
        let id = ctl.start_generation(request(1), Some(cb));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Ok(StreamEvent::Complete)
        );
        ids.push(id);
    }

    // on_complete fires just before the worker unregisters and exits.
    for _ in 0..500 {
        if ctl.registry().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert!(ctl.registry().is_empty());
    assert!(
        ctl.tracked_workers() < 8,
        "still tracking {} exited workers",
        ctl.tracked_workers()
    );
    // The most recent session is still joinable after its handle was reaped.
    let last = *ids.last().unwrap();
    assert_eq!(ctl.join(last).map(|s| s.id), Some(last));
    assert!(ctl.reap_finished().len() <= RECENT_SUMMARIES);
}

#[test]
fn seed_beyond_sampler_range_is_rejected() {
    let (ctl, log) = controller(Script::default());
    let (cb, rx) = channel_callback();

    let req = request(5).with_seed(SamplingParams::MAX_SEED + 1);
    let id = ctl.start_generation(req, Some(cb));
    let summary = ctl.join(id).unwrap();

    assert_eq!(
        drain(&rx),
        vec![StreamEvent::Error("Failed to initialize sampler.".into())]
    );
    assert!(matches!(
        summary.outcome,
        Outcome::Errored(GenerationError::SamplerInit(_))
    ));
    assert_eq!(log.entries(), vec!["drop context", "drop model"]);
}

#[test]
fn largest_seed_is_accepted() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(1),
        ..Script::default()
    });
    let (cb, _rx) = channel_callback();

    let id = ctl.start_generation(request(5).with_seed(SamplingParams::MAX_SEED), Some(cb));
    let summary = ctl.join(id).unwrap();
    assert_eq!(summary.outcome.stop_reason(), Some(StopReason::EndOfSequence));
}

#[test]
fn panicking_resource_release_still_terminates_and_unregisters() {
    let (ctl, log) = controller(Script {
        eos_after: Some(2),
        panic_on_context_drop: true,
        ..Script::default()
    });
    let (cb, rx) = channel_callback();

    let id = ctl.start_generation(request(10), Some(cb));
    let summary = ctl.join(id).expect("worker survives a panicking destructor");

    let events = drain(&rx);
    assert_single_terminal_last(&events);
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Error("Generation worker panicked.".into()))
    );
    assert!(matches!(
        summary.outcome,
        Outcome::Errored(GenerationError::WorkerPanicked)
    ));
    assert!(!ctl.is_active(id));
    assert!(ctl.registry().is_empty());
    let drops: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("drop"))
        .collect();
    assert_eq!(drops, vec!["drop sampler", "drop context", "drop model"]);
}

#[test]
fn elapsed_covers_the_whole_session() {
    let (ctl, _log) = controller(Script {
        eos_after: Some(3),
        step_delay: Duration::from_millis(5),
        ..Script::default()
    });
    let (cb, _rx) = channel_callback();

    let id = ctl.start_generation(request(10), Some(cb));
    let summary = ctl.join(id).unwrap();
    assert!(summary.elapsed >= Duration::from_millis(20), "{:?}", summary.elapsed);
}
