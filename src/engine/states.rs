//! States for the run state machine of the engine.
//!
//! This modules is private and restricted to the [`engine`](crate::engine)
//! scope. The public interface of the engine is provided by
//! [`engine`](crate::engine).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::{mem, sync::Arc};

use log::{debug, info, Level};

use super::{
    events::*, CancelToken, EngineEvent, Observer, Outcome, PayloadFailure, ProgressScope,
};
use crate::{
    link::Link,
    payload::{format_size, TransferJob},
    protocol::{send_payload, ChunkProtocol},
    settings::FlashOptions,
};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Everything a run works with. Owned by the worker for the whole run.
pub(crate) struct RunContext {
    pub job: TransferJob,
    pub link: Box<dyn Link>,
    pub protocol: Arc<dyn ChunkProtocol>,
    pub observer: Arc<dyn Observer>,
    pub running: CancelToken,
    pub options: FlashOptions,
}
impl RunContext {
    fn log(&self, level: Level, message: String) {
        debug!("{}", message);
        self.observer.on_event(&EngineEvent::log(level, message));
    }

    fn progress(&self, scope: ProgressScope, percent: f64) {
        self.observer
            .on_event(&EngineEvent::Progress { scope, percent });
    }
}

/// What happened to the payloads so far. Carried from state to state by the
/// events.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub started: usize,
    pub succeeded: Vec<String>,
    pub failures: Vec<PayloadFailure>,
}

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state does its work and requests a transition
    /// to a new state by returning the appropriate `event`, moving the `tally`
    /// into it. The `event` is then consumed to create the new `state` using
    /// the corresponding [`From`] implementation.
    fn run(&mut self, ctx: &mut RunContext, tally: &mut Tally) -> Event;
}

// Init State ==================================================================

/// The initial state of a run.
///
/// From the `InitState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`SendPayloadEvent`] => [`SendPayloadState`]** for the first payload,
///    when the link is open and the job has something to send,
///  * **[`DoneEvent`] => [`DoneState`]** with a failed outcome otherwise.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    fn run(&mut self, ctx: &mut RunContext, tally: &mut Tally) -> Event {
        info!("=> Init");

        if !ctx.link.is_open() || ctx.job.is_empty() {
            ctx.log(
                Level::Error,
                format!(
                    "Cannot flash {} payload(s) over {} (link {})",
                    ctx.job.total_count(),
                    ctx.link.name(),
                    if ctx.link.is_open() { "open" } else { "closed" }
                ),
            );
            return Event::Done(DoneEvent {
                tally: mem::take(tally),
                outcome: Outcome::Failed,
            });
        }

        ctx.log(
            Level::Info,
            format!(
                "Flashing {} payload(s), {} in total, over {}",
                ctx.job.total_count(),
                format_size(ctx.job.total_bytes()),
                ctx.link.name()
            ),
        );
        Event::SendPayload(SendPayloadEvent {
            tally: mem::take(tally),
            index: 0,
        })
    }
}

// SendPayload State ===========================================================

/// A `state` of the run where the payload at position `index` of the job is
/// pushed over the link.
///
/// A failed payload does not stop the run. The run only stops early when the
/// running flag was cleared, either before the payload is started or while it
/// is being pushed.
///
///  * **[`SendPayloadEvent`] => [`SendPayloadState`]** for the next payload,
///  * **[`DoneEvent`] => [`DoneState`]** after the last payload (completed),
///    upon cancellation (cancelled), or if `index` is out of the job (failed).
#[derive(Debug)]
pub(crate) struct SendPayloadState {
    pub index: usize,
}
impl Runnable for SendPayloadState {
    fn run(&mut self, ctx: &mut RunContext, tally: &mut Tally) -> Event {
        info!("=> SendPayload #{}", self.index);

        let done = |tally: &mut Tally, outcome| {
            Event::Done(DoneEvent {
                tally: mem::take(tally),
                outcome,
            })
        };

        let payload = match ctx.job.get(self.index) {
            Some(payload) => payload.clone(),
            None => {
                ctx.log(
                    Level::Error,
                    format!("The job has no payload #{}", self.index),
                );
                return done(tally, Outcome::Failed);
            }
        };
        if !ctx.running.is_running() {
            return done(tally, Outcome::Cancelled);
        }

        let total = ctx.job.total_count();
        tally.started += 1;
        ctx.progress(
            ProgressScope::Job,
            self.index as f64 / total as f64 * 100.0,
        );
        ctx.log(
            Level::Info,
            format!("Started {} {}", payload.class(), payload.name()),
        );

        let observer = Arc::clone(&ctx.observer);
        let result = send_payload(
            &mut *ctx.link,
            &payload,
            ctx.protocol.as_ref(),
            &ctx.running,
            &mut |percent| {
                observer.on_event(&EngineEvent::Progress {
                    scope: ProgressScope::Payload,
                    percent,
                })
            },
        );

        match result {
            Ok(sent) => {
                ctx.log(
                    Level::Info,
                    format!(
                        "Flashed {} {} ({})",
                        payload.class(),
                        payload.name(),
                        format_size(sent)
                    ),
                );
                tally.succeeded.push(payload.name().to_owned());
            }
            Err(error) => {
                if error.is_cancellation() {
                    ctx.log(
                        Level::Warn,
                        format!("Interrupted {} {}", payload.class(), payload.name()),
                    );
                } else {
                    ctx.log(
                        Level::Error,
                        format!(
                            "Failed {} {}: {}",
                            payload.class(),
                            payload.name(),
                            error
                        ),
                    );
                }
                tally.failures.push(PayloadFailure {
                    path: payload.path().to_path_buf(),
                    name: payload.name().to_owned(),
                    class: payload.class(),
                    error,
                });
            }
        }

        if !ctx.running.is_running() {
            return done(tally, Outcome::Cancelled);
        }
        let next = self.index + 1;
        if next < total {
            Event::SendPayload(SendPayloadEvent {
                tally: mem::take(tally),
                index: next,
            })
        } else {
            done(tally, Outcome::Completed)
        }
    }
}

// Done State ==================================================================

/// Reached when the run is over.
///
/// This state goes into a 2-phase execution. During the initial phase, it
/// summarizes the run, resets the device if asked to and resets the progress
/// of the presentation layer. It then triggers the [`ExitEvent`] to make the
/// event loop terminate.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    pub outcome: Outcome,
    /// When `true` instructs the event loop to exit.
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, ctx: &mut RunContext, tally: &mut Tally) -> Event {
        info!("=> Done ({:?})", self.outcome);
        let total = ctx.job.total_count();

        match self.outcome {
            Outcome::Completed => {
                ctx.progress(ProgressScope::Job, 100.0);
                if tally.failures.is_empty() {
                    ctx.log(
                        Level::Info,
                        format!("All {} payload(s) flashed", total),
                    );
                } else {
                    ctx.log(
                        Level::Warn,
                        format!(
                            "Finished, {} of {} payload(s) failed",
                            tally.failures.len(),
                            total
                        ),
                    );
                }
                if ctx.options.auto_reset {
                    match ctx.protocol.reset(&mut *ctx.link) {
                        Ok(()) => ctx.log(Level::Info, "Device reset requested".into()),
                        Err(e) => ctx.log(Level::Warn, format!("Device reset failed: {}", e)),
                    }
                }
                if ctx.options.verify {
                    ctx.log(Level::Info, "Flash verification requested".into());
                }
            }
            Outcome::Cancelled => ctx.log(
                Level::Warn,
                format!(
                    "Flashing interrupted by the user after {} of {} payload(s)",
                    tally.started, total
                ),
            ),
            Outcome::Failed => ctx.log(Level::Error, "Flashing aborted by an engine fault".into()),
        }

        if ctx.link.is_open() {
            if let Err(e) = ctx.link.flush() {
                ctx.log(Level::Warn, format!("Flushing {} failed: {}", ctx.link.name(), e));
            }
        }
        ctx.progress(ProgressScope::Payload, 0.0);
        ctx.progress(ProgressScope::Job, 0.0);

        Event::Exit(ExitEvent {
            tally: mem::take(tally),
            outcome: self.outcome,
        })
    }
}
