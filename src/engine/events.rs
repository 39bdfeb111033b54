//! Events for the run state machine of the engine.
//!
//! This modules is private and restricted to the [`engine`](crate::engine)
//! scope. The public interface of the engine is provided by
//! [`engine`](crate::engine).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use super::{states::Tally, Outcome};

// =============================================================================
// Crate-Public Interface
// =============================================================================

// SendPayloadEvent ============================================================

/// Event fired to trigger a transition to the `SendPayload` state for the
/// payload at position `index` in the job.
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the `Init` state, once the run was found ready to go, with
///     `index` 0.
///  2. While at the `SendPayload` state, after a payload was attempted and
///     more payloads remain, whatever the result of the attempt.
#[derive(Debug)]
pub(crate) struct SendPayloadEvent {
    pub tally: Tally,
    pub index: usize,
}

// DoneEvent ===================================================================

/// Event fired when the run is over, triggering a transition to the `Done`
/// state.
///
/// This event can happen at any state: after the last payload (completion),
/// at a payload boundary or after an interrupted payload (cancellation), or
/// when the run cannot proceed at all (failure).
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub tally: Tally,
    pub outcome: Outcome,
}

// ExitEvent ===================================================================

/// The last event of a run. It makes the event loop terminate and hand the
/// outcome and tally back to the worker.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub tally: Tally,
    pub outcome: Outcome,
}

// Events enum ==================================================================

/// Events that can be triggered within the run state machine.
///
/// Each possible value holds an `event`, which in turn holds the data carried
/// over to the target state.
#[derive(Debug)]
pub(crate) enum Event {
    SendPayload(SendPayloadEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
