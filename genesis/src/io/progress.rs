//! Per-session progress log with live fan-out.
//!
//! Every session owns an append-only event list plus a broadcast sender.
//! Publishing appends and broadcasts under one lock, and [`ProgressHub::subscribe`]
//! snapshots the list and attaches a receiver under the same lock, so a
//! subscriber sees every event exactly once: backlog first, then live.
//! [`ProgressHub::stream`] wraps that into a stream that ends after the
//! terminal event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::types::{Phase, ProgressCategory, ProgressEvent};

const DEFAULT_LIVE_CAPACITY: usize = 256;

struct SessionLog {
    events: Vec<ProgressEvent>,
    sender: broadcast::Sender<ProgressEvent>,
}

/// Backlog and live receiver taken atomically.
pub struct Subscription {
    pub backlog: Vec<ProgressEvent>,
    pub receiver: broadcast::Receiver<ProgressEvent>,
}

impl Subscription {
    /// Sequence number the next live event is expected to carry.
    pub fn next_seq(&self) -> u64 {
        self.backlog.last().map_or(0, |event| event.seq + 1)
    }
}

#[derive(Clone)]
pub struct ProgressHub {
    logs: Arc<Mutex<HashMap<String, SessionLog>>>,
    live_capacity: usize,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LIVE_CAPACITY)
    }

    /// `live_capacity` bounds how far a live receiver may fall behind before
    /// it observes a lag and must resynchronise from the log.
    pub fn with_capacity(live_capacity: usize) -> Self {
        Self {
            logs: Arc::new(Mutex::new(HashMap::new())),
            live_capacity: live_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionLog>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the log for `session_id`. Existing logs are kept.
    pub fn open(&self, session_id: &str) {
        let capacity = self.live_capacity;
        self.lock()
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                events: Vec::new(),
                sender: broadcast::channel(capacity).0,
            });
    }

    /// Append an event and broadcast it. Never waits on subscribers.
    pub fn publish(
        &self,
        session_id: &str,
        category: ProgressCategory,
        message: impl Into<String>,
        progress: f64,
        terminal: bool,
    ) -> ProgressEvent {
        let capacity = self.live_capacity;
        let mut logs = self.lock();
        let log = logs
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                events: Vec::new(),
                sender: broadcast::channel(capacity).0,
            });
        let event = ProgressEvent {
            session_id: session_id.to_string(),
            seq: log.events.len() as u64,
            category,
            message: message.into(),
            timestamp: Utc::now(),
            progress: progress.clamp(0.0, 1.0),
            terminal,
        };
        log.events.push(event.clone());
        // No receivers is fine; events stay in the log for replay.
        let _ = log.sender.send(event.clone());
        event
    }

    /// Replay-from-start plus live receiver, or `None` for an unknown session.
    pub fn subscribe(&self, session_id: &str) -> Option<Subscription> {
        let logs = self.lock();
        let log = logs.get(session_id)?;
        Some(Subscription {
            backlog: log.events.clone(),
            receiver: log.sender.subscribe(),
        })
    }

    pub fn events(&self, session_id: &str) -> Vec<ProgressEvent> {
        self.events_since(session_id, 0)
    }

    /// Events with `seq >= from`.
    pub fn events_since(&self, session_id: &str, from: u64) -> Vec<ProgressEvent> {
        self.lock()
            .get(session_id)
            .map(|log| log.events.iter().skip(from as usize).cloned().collect())
            .unwrap_or_default()
    }

    /// Backlog then live events for one session, ending after the terminal
    /// event or when the log is removed. `None` for an unknown session.
    ///
    /// A receiver that lags behind the broadcast buffer catches up from the
    /// log, so no event is skipped or repeated.
    pub fn stream(&self, session_id: &str) -> Option<impl Stream<Item = ProgressEvent> + use<>> {
        let subscription = self.subscribe(session_id)?;
        let mut next = subscription.next_seq();
        let Subscription {
            backlog,
            mut receiver,
        } = subscription;
        let hub = self.clone();
        let session_id = session_id.to_string();

        Some(async_stream::stream! {
            for event in backlog {
                let terminal = event.terminal;
                yield event;
                if terminal {
                    return;
                }
            }

            loop {
                match receiver.recv().await {
                    Ok(event) if event.seq < next => {}
                    Ok(event) => {
                        next = event.seq + 1;
                        let terminal = event.terminal;
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id, skipped, "subscriber lagged; replaying from log");
                        for event in hub.events_since(&session_id, next) {
                            next = event.seq + 1;
                            let terminal = event.terminal;
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(session_id, "progress log closed");
                        return;
                    }
                }
            }
        })
    }

    pub fn remove(&self, session_id: &str) {
        if self.lock().remove(session_id).is_some() {
            debug!(session_id, "progress log removed");
        }
    }

    /// Reporter bound to one session.
    pub fn reporter(&self, session_id: &str) -> SessionReporter {
        self.open(session_id);
        SessionReporter {
            hub: self.clone(),
            session_id: session_id.to_string(),
        }
    }
}

/// Convenience publisher for one session.
#[derive(Clone)]
pub struct SessionReporter {
    hub: ProgressHub,
    session_id: String,
}

impl SessionReporter {
    /// One event per phase transition.
    pub fn phase(&self, phase: Phase, message: impl Into<String>) -> ProgressEvent {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::Phase,
            message,
            phase.progress(),
            phase.is_terminal(),
        )
    }

    pub fn log(&self, progress: f64, message: impl Into<String>) {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::Log,
            message,
            progress,
            false,
        );
    }

    pub fn agent(&self, progress: f64, message: impl Into<String>) {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::AgentActivity,
            message,
            progress,
            false,
        );
    }

    pub fn artifact(&self, progress: f64, message: impl Into<String>) {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::ArtifactCreated,
            message,
            progress,
            false,
        );
    }

    pub fn success(&self, progress: f64, message: impl Into<String>) {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::Success,
            message,
            progress,
            false,
        );
    }

    pub fn error(&self, progress: f64, message: impl Into<String>) {
        self.hub.publish(
            &self.session_id,
            ProgressCategory::Error,
            message,
            progress,
            false,
        );
    }
}
