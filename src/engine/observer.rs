//! Events pushed by the engine to the presentation layer.
//!
//! The engine never holds anything owned by the user interface. It emits
//! [`EngineEvent`]s, one way, to an [`Observer`], from the worker thread.

use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex,
    },
};

use chrono::{DateTime, Local};
use log::{info, log, trace, Level};

use super::EngineState;

/// Which progress a [`EngineEvent::Progress`] refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProgressScope {
    /// The payload being pushed.
    Payload,
    /// The whole job.
    Job,
}

/// One timestamped line of the flashing log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}
impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A percentage between 0 and 100.
    Progress { scope: ProgressScope, percent: f64 },
    Log(LogLine),
    StateChanged { state: EngineState },
}
impl EngineEvent {
    /// A log line stamped with the current local time.
    pub fn log(level: Level, message: impl Into<String>) -> Self {
        EngineEvent::Log(LogLine {
            timestamp: Local::now(),
            level,
            message: message.into(),
        })
    }
}

/// Receives the events of the engine. Called from the worker thread, so an
/// implementation should return quickly.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

impl<F> Observer for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;
impl Observer for NullObserver {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;
impl Observer for LogObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Progress { scope, percent } => {
                trace!("{:?} progress {:.0}%", scope, percent)
            }
            EngineEvent::Log(line) => log!(line.level, "{}", line),
            EngineEvent::StateChanged { state } => info!("engine {}", state),
        }
    }
}

/// Forwards events into a channel, for a presentation layer running its own
/// loop.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Mutex<Sender<EngineEvent>>,
}
impl ChannelObserver {
    /// The observer and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel();
        (ChannelObserver { tx: Mutex::new(tx) }, rx)
    }
}
impl Observer for ChannelObserver {
    fn on_event(&self, event: &EngineEvent) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        // Nobody listening any more is fine.
        let _ = tx.send(event.clone());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[test]
    fn log_line_is_timestamped() {
        let line = LogLine {
            timestamp: Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap(),
            level: Level::Info,
            message: "Started firmware app.bin".into(),
        };
        assert_eq!(line.to_string(), "[09:05:07] Started firmware app.bin");
    }

    #[test]
    fn channel_observer_forwards_events() {
        let (observer, rx) = ChannelObserver::new();
        observer.on_event(&EngineEvent::StateChanged {
            state: EngineState::Running,
        });
        observer.on_event(&EngineEvent::Progress {
            scope: ProgressScope::Job,
            percent: 50.0,
        });
        assert_eq!(
            rx.recv().unwrap(),
            EngineEvent::StateChanged {
                state: EngineState::Running
            }
        );
        assert_eq!(
            rx.recv().unwrap(),
            EngineEvent::Progress {
                scope: ProgressScope::Job,
                percent: 50.0
            }
        );
    }

    #[test]
    fn channel_observer_survives_a_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_event(&EngineEvent::log(Level::Warn, "nobody listens"));
    }

    #[test]
    fn closures_are_observers() {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        let observer = move |event: &EngineEvent| sink.lock().unwrap().push(event.clone());
        observer.on_event(&EngineEvent::log(Level::Info, "hello"));
        let seen = seen.lock().unwrap();
        match &seen[0] {
            EngineEvent::Log(line) => assert_eq!(line.message, "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
