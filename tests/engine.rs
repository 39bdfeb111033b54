use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use serflash::{
    CancelToken, ChannelObserver, Engine, EngineEvent, EngineState, Error, FlashOptions,
    MockLink, Outcome, Pacing, PayloadClass, ProgressScope, SimulatedProtocol, TransferJob,
};
use tempdir::TempDir;

type Events = Arc<Mutex<Vec<EngineEvent>>>;

fn make_file(dir: &TempDir, name: &str, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    File::create(&path).unwrap().write_all(&bytes).unwrap();
    path
}

fn no_extras() -> FlashOptions {
    FlashOptions {
        auto_reset: false,
        verify: false,
    }
}

fn recording_engine() -> (Engine, Events) {
    let events: Events = Arc::new(Mutex::new(vec![]));
    let sink = Arc::clone(&events);
    let engine = Engine::with_protocol(
        SimulatedProtocol::with_pacing(Pacing::none()),
        move |e: &EngineEvent| sink.lock().unwrap().push(e.clone()),
    );
    (engine, events)
}

fn progress_of(events: &Events, wanted: ProgressScope) -> Vec<f64> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress { scope, percent } if *scope == wanted => Some(*percent),
            _ => None,
        })
        .collect()
}

#[test]
fn pushes_a_firmware_image_in_chunks() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "app.bin", 2500), PayloadClass::Firmware)
        .unwrap();
    let probe = MockLink::new();
    let (engine, events) = recording_engine();

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["app.bin".to_string()]);
    assert_eq!(engine.state(), EngineState::Completed);

    let sizes: Vec<usize> = probe.writes().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![12, 1024, 1024, 452, 10]);
    let written = probe.written();
    assert!(written.starts_with(b"FLASH_START\n"));
    assert!(written.ends_with(b"FLASH_END\n"));

    let payload = progress_of(&events, ProgressScope::Payload);
    let sent: Vec<f64> = payload.iter().cloned().filter(|p| *p > 0.0).collect();
    assert!(sent.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(sent.last(), Some(&100.0));
}

#[test]
fn firmware_goes_before_resources() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "res.dat", 10), PayloadClass::Resource)
        .unwrap();
    job.add(make_file(&dir, "app.bin", 10), PayloadClass::Firmware)
        .unwrap();
    let probe = MockLink::new();
    let (engine, _) = recording_engine();

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(
        report.succeeded,
        vec!["app.bin".to_string(), "res.dat".to_string()]
    );
    let writes = probe.writes();
    assert_eq!(writes[0], b"FLASH_START\n".to_vec());
    assert_eq!(writes[3], b"RESOURCE_START\n".to_vec());
}

#[test]
fn job_progress_steps_with_each_payload() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    for name in &["a.bin", "b.bin", "c.bin", "d.bin"] {
        job.add(make_file(&dir, name, 100), PayloadClass::Firmware)
            .unwrap();
    }
    let (engine, events) = recording_engine();

    engine
        .start(job, Box::new(MockLink::new()), no_extras())
        .unwrap();
    engine.wait().unwrap();

    assert_eq!(
        progress_of(&events, ProgressScope::Job),
        vec![0.0, 25.0, 50.0, 75.0, 100.0, 0.0]
    );
}

#[test]
fn a_changed_file_does_not_stop_the_job() {
    let dir = TempDir::new("engine").unwrap();
    let first = make_file(&dir, "a.bin", 100);
    let mut job = TransferJob::new();
    job.add(&first, PayloadClass::Firmware).unwrap();
    job.add(make_file(&dir, "b.dat", 100), PayloadClass::Resource)
        .unwrap();
    fs::write(&first, vec![0u8; 50]).unwrap();
    let probe = MockLink::new();
    let (engine, _) = recording_engine();

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert!(!report.is_success());
    assert_eq!(report.started, 2);
    assert_eq!(report.succeeded, vec!["b.dat".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "a.bin");
    match &report.failures[0].error {
        Error::SizeMismatch {
            expected, actual, ..
        } => assert_eq!((*expected, *actual), (100, 50)),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(probe.writes()[0], b"RESOURCE_START\n".to_vec());
}

#[test]
fn a_write_failure_does_not_stop_the_job() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "a.bin", 100), PayloadClass::Firmware)
        .unwrap();
    job.add(make_file(&dir, "b.bin", 100), PayloadClass::Firmware)
        .unwrap();
    let probe = MockLink::new().fail_write(1);
    let (engine, _) = recording_engine();

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.succeeded, vec!["b.bin".to_string()]);
    assert!(matches!(report.failures[0].error, Error::Io { .. }));
    assert!(report.link.is_some());
}

#[test]
fn cancel_mid_payload_stops_before_the_next_chunk() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "app.bin", 2500), PayloadClass::Firmware)
        .unwrap();
    job.add(make_file(&dir, "res.dat", 100), PayloadClass::Resource)
        .unwrap();
    let probe = MockLink::new();

    let token: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
    let handle = Arc::clone(&token);
    let engine = Engine::with_protocol(
        SimulatedProtocol::with_pacing(Pacing::none()),
        move |e: &EngineEvent| {
            if let EngineEvent::Progress {
                scope: ProgressScope::Payload,
                percent,
            } = e
            {
                if *percent >= 40.0 {
                    if let Some(token) = handle.lock().unwrap().as_ref() {
                        token.cancel();
                    }
                }
            }
        },
    );
    *token.lock().unwrap() = Some(engine.cancel_token());

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert_eq!(engine.state(), EngineState::Cancelled);
    assert_eq!(report.started, 1);
    assert!(report.succeeded.is_empty());
    assert!(report.failures[0].error.is_cancellation());
    let sizes: Vec<usize> = probe.writes().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![12, 1024]);
}

#[test]
fn cancel_from_another_thread_is_prompt() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "big.bin", 200 * 1024), PayloadClass::Firmware)
        .unwrap();
    let engine = Arc::new(Engine::new(|_: &EngineEvent| {}));

    engine
        .start(job, Box::new(MockLink::new()), no_extras())
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(engine.is_running());

    let canceller = Arc::clone(&engine);
    let asked = Instant::now();
    thread::spawn(move || canceller.cancel()).join().unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert!(asked.elapsed() < Duration::from_millis(500));
}

#[test]
fn a_second_start_is_rejected_while_running() {
    let dir = TempDir::new("engine").unwrap();
    let path = make_file(&dir, "big.bin", 100 * 1024);
    let mut first = TransferJob::new();
    first.add(&path, PayloadClass::Firmware).unwrap();
    let second = first.clone();
    let engine = Engine::new(|_: &EngineEvent| {});

    engine
        .start(first, Box::new(MockLink::new()), no_extras())
        .unwrap();
    let err = engine
        .start(second, Box::new(MockLink::new()), no_extras())
        .unwrap_err();
    assert!(matches!(err, Error::Busy));

    engine.cancel();
    assert_eq!(engine.wait().unwrap().outcome, Outcome::Cancelled);
    assert!(!engine.is_running());
}

#[test]
fn auto_reset_only_after_a_completed_run() {
    let dir = TempDir::new("engine").unwrap();
    let path = make_file(&dir, "app.bin", 100);
    let job = || {
        let mut job = TransferJob::new();
        job.add(&path, PayloadClass::Firmware).unwrap();
        job
    };
    let (engine, _) = recording_engine();
    let options = FlashOptions {
        auto_reset: true,
        verify: true,
    };

    let probe = MockLink::new();
    engine.start(job(), Box::new(probe.clone()), options).unwrap();
    let report = engine.wait().unwrap();
    assert_eq!(probe.resets(), 1);
    assert!(report.verify_requested);

    let probe = MockLink::new();
    engine
        .start(job(), Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();
    assert_eq!(probe.resets(), 0);
    assert!(!report.verify_requested);

    let probe = MockLink::new().fail_write(0);
    engine.start(job(), Box::new(probe.clone()), options).unwrap();
    let report = engine.wait().unwrap();
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(probe.resets(), 1);
}

#[test]
fn channel_observer_sees_the_state_changes() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "app.bin", 10), PayloadClass::Firmware)
        .unwrap();
    let (observer, events) = ChannelObserver::new();
    let engine = Engine::with_protocol(SimulatedProtocol::with_pacing(Pacing::none()), observer);

    engine
        .start(job, Box::new(MockLink::new()), no_extras())
        .unwrap();
    engine.wait().unwrap();

    let states: Vec<EngineState> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::StateChanged { state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![EngineState::Running, EngineState::Completed]);
}

#[test]
fn an_empty_payload_is_framed_and_completes() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "empty.bin", 0), PayloadClass::Firmware)
        .unwrap();
    let probe = MockLink::new();
    let (engine, events) = recording_engine();

    engine
        .start(job, Box::new(probe.clone()), no_extras())
        .unwrap();
    let report = engine.wait().unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(engine.state(), EngineState::Completed);
    assert_eq!(report.succeeded, vec!["empty.bin".to_string()]);
    assert_eq!(
        probe.writes(),
        vec![b"FLASH_START\n".to_vec(), b"FLASH_END\n".to_vec()]
    );
    assert_eq!(
        progress_of(&events, ProgressScope::Payload),
        vec![100.0, 0.0]
    );
}

#[test]
fn progress_is_reset_after_a_cancelled_run() {
    let dir = TempDir::new("engine").unwrap();
    let mut job = TransferJob::new();
    job.add(make_file(&dir, "app.bin", 2500), PayloadClass::Firmware)
        .unwrap();

    let events: Events = Arc::new(Mutex::new(vec![]));
    let sink = Arc::clone(&events);
    let token: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
    let handle = Arc::clone(&token);
    let engine = Engine::with_protocol(
        SimulatedProtocol::with_pacing(Pacing::none()),
        move |e: &EngineEvent| {
            sink.lock().unwrap().push(e.clone());
            if let EngineEvent::Progress {
                scope: ProgressScope::Payload,
                percent,
            } = e
            {
                if *percent > 0.0 {
                    if let Some(token) = handle.lock().unwrap().as_ref() {
                        token.cancel();
                    }
                }
            }
        },
    );
    *token.lock().unwrap() = Some(engine.cancel_token());

    engine
        .start(job, Box::new(MockLink::new()), no_extras())
        .unwrap();
    assert_eq!(engine.wait().unwrap().outcome, Outcome::Cancelled);

    assert_eq!(progress_of(&events, ProgressScope::Payload).last(), Some(&0.0));
    assert_eq!(progress_of(&events, ProgressScope::Job).last(), Some(&0.0));
    let events = events.lock().unwrap();
    let n = events.len();
    assert_eq!(
        events[n - 3..],
        [
            EngineEvent::Progress {
                scope: ProgressScope::Payload,
                percent: 0.0
            },
            EngineEvent::Progress {
                scope: ProgressScope::Job,
                percent: 0.0
            },
            EngineEvent::StateChanged {
                state: EngineState::Cancelled
            },
        ]
    );
}
