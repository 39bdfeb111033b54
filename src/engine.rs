//! The transfer engine.
//!
//! The engine pushes a [`TransferJob`] over a [`Link`] on a background worker
//! thread. The caller's thread never blocks on I/O: it starts a run, receives
//! [`EngineEvent`]s through its [`Observer`], may request cancellation at any
//! time and finally collects a [`RunReport`] (and the link) with
//! [`Engine::wait`].
//!
//! ```text
//!                 start (link open, job not empty)
//!      .------.  ------------------------------->  .---------.
//!      | Idle |                                    | Running |
//!      '------'  <- - - - - next start - - - - -.  '---------'
//!                                               :       |
//!                                               :       v
//!                                      .---------------------------------.
//!                                      | Completed | Cancelled | Failed  |
//!                                      '---------------------------------'
//! ```
//!
//! Cancellation is cooperative. [`Engine::cancel`] only clears the running
//! flag; the worker notices it before the next chunk or before the next
//! payload, whichever comes first. A chunk already being written completes.
//!
//! **Example**
//! ```no_run
//! use serflash::{Engine, FlashOptions, LogObserver, PayloadClass, SerialLink, SettingsBuilder,
//!     TransferJob};
//!
//! let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
//! let link = SerialLink::open(&settings)?;
//!
//! let mut job = TransferJob::new();
//! job.add("app.bin", PayloadClass::Firmware)?;
//! job.add("fonts.dat", PayloadClass::Resource)?;
//!
//! let engine = Engine::new(LogObserver);
//! engine.start(job, Box::new(link), FlashOptions::default())?;
//! let report = engine.wait().expect("a run was started");
//! println!("{:?} with {} failure(s)", report.outcome, report.failures.len());
//! # Ok::<(), serflash::Error>(())
//! ```

mod events;
mod observer;
mod state_machine;
mod states;

pub use observer::{
    ChannelObserver, EngineEvent, LogLine, LogObserver, NullObserver, Observer, ProgressScope,
};

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use log::{error, info};

use crate::{
    error::{Error, Result},
    link::Link,
    payload::{PayloadClass, TransferJob},
    protocol::{ChunkProtocol, SimulatedProtocol},
    settings::FlashOptions,
};
use states::{RunContext, Tally};

// =============================================================================
// Public Interface
// =============================================================================

/// Where the engine stands. The three terminal states stay observable until
/// the next run starts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}
impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Cancelled | EngineState::Failed
        )
    }
}
impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Completed => write!(f, "completed"),
            EngineState::Cancelled => write!(f, "cancelled"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    /// Every payload was attempted. Some may still have failed.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// The run could not proceed at all.
    Failed,
}
impl From<Outcome> for EngineState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => EngineState::Completed,
            Outcome::Cancelled => EngineState::Cancelled,
            Outcome::Failed => EngineState::Failed,
        }
    }
}

/// A payload that was not pushed completely.
#[derive(Debug)]
pub struct PayloadFailure {
    pub path: PathBuf,
    pub name: String,
    pub class: PayloadClass,
    pub error: Error,
}

/// What a finished run hands back to the caller.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Number of payloads the worker started to push.
    pub started: usize,
    /// Names of the payloads pushed completely, in send order.
    pub succeeded: Vec<String>,
    pub failures: Vec<PayloadFailure>,
    /// The run completed and the caller asked to verify the flash.
    pub verify_requested: bool,
    /// The link, given back for reuse. `None` only if the worker panicked.
    pub link: Option<Box<dyn Link>>,
}
impl RunReport {
    /// Completed with no payload failure.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Completed && self.failures.is_empty()
    }
}

/// The shared running flag. Cloning gives another handle on the same flag, so
/// a token can be handed to a signal handler or to another thread.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    /// A token in the running position.
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn idle() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Request a stop. Takes effect at the next checkpoint of the worker.
    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives transfer jobs, one at a time.
pub struct Engine {
    protocol: Arc<dyn ChunkProtocol>,
    observer: Arc<dyn Observer>,
    running: CancelToken,
    state: Arc<Mutex<EngineState>>,
    worker: Mutex<Option<JoinHandle<RunReport>>>,
}
impl Engine {
    /// An engine speaking the [`SimulatedProtocol`] with its default pacing.
    pub fn new<O: Observer + 'static>(observer: O) -> Self {
        Self::with_protocol(SimulatedProtocol::new(), observer)
    }

    pub fn with_protocol<P, O>(protocol: P, observer: O) -> Self
    where
        P: ChunkProtocol + 'static,
        O: Observer + 'static,
    {
        Engine {
            protocol: Arc::new(protocol),
            observer: Arc::new(observer),
            running: CancelToken::idle(),
            state: Arc::new(Mutex::new(EngineState::Idle)),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// A handle on the running flag, e.g. for a Ctrl+C handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.running.clone()
    }

    /// Start pushing `job` over `link` on a worker thread.
    ///
    /// Fails without changing state when a run is already going on
    /// ([`Error::Busy`]), when the link is not open or when the job is empty.
    /// The report of a previous run that was never collected with
    /// [`wait`](Engine::wait) is discarded.
    pub fn start(&self, job: TransferJob, link: Box<dyn Link>, options: FlashOptions) -> Result<()> {
        let mut state = lock(&self.state);
        if *state == EngineState::Running {
            return Err(Error::Busy);
        }
        if !link.is_open() {
            return Err(Error::LinkNotOpen(link.name()));
        }
        if job.is_empty() {
            return Err(Error::EmptyJob);
        }

        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                error!("the previous worker panicked");
            }
        }

        info!(
            "Starting a run of {} payload(s) on {}",
            job.total_count(),
            link.name()
        );
        let ctx = RunContext {
            job,
            link,
            protocol: Arc::clone(&self.protocol),
            observer: Arc::clone(&self.observer),
            running: self.running.clone(),
            options,
        };
        let shared_state = Arc::clone(&self.state);

        self.running.arm();
        *state = EngineState::Running;
        let spawned = thread::Builder::new()
            .name("serflash-worker".into())
            .spawn(move || work(ctx, shared_state));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.cancel();
                *state = EngineState::Idle;
                Err(Error::io("spawn the transfer worker", e))
            }
        }
    }

    /// Request the current run to stop. Does nothing when no run is going on.
    pub fn cancel(&self) {
        if self.is_running() && self.running.is_running() {
            info!("Cancellation requested");
            self.running.cancel();
            self.observer
                .on_event(&EngineEvent::log(log::Level::Info, "Stopping..."));
        }
    }

    /// Block until the current run finishes and return its report. `None` when
    /// no run was started since the last call.
    pub fn wait(&self) -> Option<RunReport> {
        let handle = lock(&self.worker).take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("the transfer worker panicked");
                finish(
                    &self.state,
                    &self.running,
                    self.observer.as_ref(),
                    Outcome::Failed,
                );
                Some(RunReport {
                    outcome: Outcome::Failed,
                    started: 0,
                    succeeded: vec![],
                    failures: vec![],
                    verify_requested: false,
                    link: None,
                })
            }
        }
    }
}
impl Drop for Engine {
    fn drop(&mut self) {
        self.running.cancel();
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}
impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("running", &self.running.is_running())
            .finish()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The body of the worker thread.
fn work(mut ctx: RunContext, state: Arc<Mutex<EngineState>>) -> RunReport {
    ctx.observer.on_event(&EngineEvent::StateChanged {
        state: EngineState::Running,
    });

    let run = panic::catch_unwind(AssertUnwindSafe(|| state_machine::factory().run(&mut ctx)));
    let (outcome, tally) = match run {
        Ok(result) => result,
        Err(_) => {
            error!("the run panicked");
            // The observer may be the one panicking.
            let observer = ctx.observer.as_ref();
            let _ = panic::catch_unwind(AssertUnwindSafe(|| {
                for scope in &[ProgressScope::Payload, ProgressScope::Job] {
                    observer.on_event(&EngineEvent::Progress {
                        scope: *scope,
                        percent: 0.0,
                    });
                }
            }));
            (Outcome::Failed, Tally::default())
        }
    };
    finish(&state, &ctx.running, ctx.observer.as_ref(), outcome);

    RunReport {
        outcome,
        started: tally.started,
        succeeded: tally.succeeded,
        failures: tally.failures,
        verify_requested: ctx.options.verify && outcome == Outcome::Completed,
        link: Some(ctx.link),
    }
}

/// Publish the terminal state of a run.
fn finish(
    state: &Mutex<EngineState>,
    running: &CancelToken,
    observer: &dyn Observer,
    outcome: Outcome,
) {
    let terminal = EngineState::from(outcome);
    running.cancel();
    *lock(state) = terminal;
    info!("Run {}", terminal);
    observer.on_event(&EngineEvent::StateChanged { state: terminal });
}

/// A poisoned lock only means a thread panicked while holding it; the guarded
/// value is a plain state that is still meaningful.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Unit Tests
// =============================================================================
