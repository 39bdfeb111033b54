//! The run state machine of the engine.
//!
//! One run of the engine walks the payloads of the job in send order, one
//! `SendPayload` state per payload, and always ends in the `Done` state:
//!
//! ```text
//!        START
//!          |
//!          v
//!      .------.  link closed / empty job
//!      | Init |---------------------------------.
//!      '------'                                 |
//!          | #0                                 |
//!          v                                    v
//!   .-------------.  last payload      .----------------.
//!   | SendPayload |------------------->|      Done      |
//!   |     #i      |  flag cleared      | (Completed,    |
//!   '-------------'------------------->|  Cancelled,    |
//!       |     ^                        |  Failed)       |
//!       '-----' #i+1                   '----------------'
//!                                               |
//!                                               v
//!                                              END
//! ```
//!
//! States are typed and transitions are `From<Event>` implementations, so an
//! event that makes no sense for the current state cannot be turned into a
//! new state by mistake.

use std::mem;

use super::events::*;
use super::states::*;
use super::Outcome;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Runs one job. Use the `factory()` function to get an instance then run it by
/// calling its `run()` method.
pub(crate) struct JobRunner {
    sm: RunStates,
}
impl JobRunner {
    /// The event loop runs until the `Done` state is reached and its
    /// `should_exit` flag is set. It then hands back the outcome of the run and
    /// what happened to each payload.
    pub fn run(&mut self, ctx: &mut RunContext) -> (Outcome, Tally) {
        loop {
            self.sm = self.sm.step(ctx);
            if let RunStates::Done(sm) = &mut self.sm {
                if sm.state.should_exit {
                    return (sm.state.outcome, mem::take(&mut sm.tally));
                }
            }
        }
    }
}

/// Factory function for the run state machine, which starts in the `Init`
/// state.
pub(crate) fn factory() -> JobRunner {
    JobRunner {
        sm: RunStates::Init(RunSM::new()),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine. Holds the current state and the tally, which is
/// shared by all states and moved along with the transitions.
#[derive(Debug)]
struct RunSM<S: Runnable> {
    tally: Tally,
    state: S,
}
impl<S: Runnable> RunSM<S> {
    fn run(&mut self, ctx: &mut RunContext) -> Event {
        self.state.run(ctx, &mut self.tally)
    }
}

impl RunSM<InitState> {
    fn new() -> Self {
        RunSM {
            tally: Tally::default(),
            state: InitState {},
        }
    }
}

/// An enum wrapper around the states of the run state machine.
enum RunStates {
    Init(RunSM<InitState>),
    SendPayload(RunSM<SendPayloadState>),
    Done(RunSM<DoneState>),
}
impl RunStates {
    /// The unit of work in the event loop: run the current state and turn the
    /// event it returns into the next state.
    fn step(&mut self, ctx: &mut RunContext) -> Self {
        match self {
            RunStates::Init(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::SendPayload(ev) => RunStates::SendPayload(ev.into()),
                    Event::Done(ev) => RunStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            RunStates::SendPayload(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::SendPayload(ev) => RunStates::SendPayload(ev.into()),
                    Event::Done(ev) => RunStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            RunStates::Done(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::Exit(ev) => RunStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<SendPayloadEvent> for RunSM<SendPayloadState> {
    fn from(event: SendPayloadEvent) -> RunSM<SendPayloadState> {
        RunSM {
            tally: event.tally,
            state: SendPayloadState { index: event.index },
        }
    }
}

impl From<DoneEvent> for RunSM<DoneState> {
    fn from(event: DoneEvent) -> RunSM<DoneState> {
        RunSM {
            tally: event.tally,
            state: DoneState {
                outcome: event.outcome,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for RunSM<DoneState> {
    fn from(event: ExitEvent) -> RunSM<DoneState> {
        RunSM {
            tally: event.tally,
            state: DoneState {
                outcome: event.outcome,
                should_exit: true,
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
