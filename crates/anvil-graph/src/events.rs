// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Diagnostic events and the buffered delivery discipline.
//!
//! Compute functions never talk to the user's listener directly: they post
//! into a [`StoredEvents`] buffer owned by the activation. The evaluator
//! forwards the buffer only when an activation completes cleanly; events from
//! an activation that ended in a restart are dropped, and functions that
//! memoize intermediate results are responsible for stashing the matching
//! events in scratch state and replaying them on the activation that finally
//! completes.

use parking_lot::Mutex;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Informational output.
    Info,
    /// Progress reporting.
    Progress,
    /// A warning; does not fail the node.
    Warning,
    /// An error report; the emitting function is expected to also fail.
    Error,
}

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Severity class.
    pub kind: EventKind,
    /// Rendered message.
    pub message: String,
}

impl Event {
    /// Informational event.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Info,
            message: message.into(),
        }
    }

    /// Progress event.
    #[must_use]
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            message: message.into(),
        }
    }

    /// Warning event.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            message: message.into(),
        }
    }

    /// Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            message: message.into(),
        }
    }
}

/// Receiver for events that survived to a clean completion.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn post(&self, event: &Event);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn post(&self, _event: &Event) {}
}

/// Sink that routes events to `tracing` by severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn post(&self, event: &Event) {
        match event.kind {
            EventKind::Info | EventKind::Progress => tracing::info!(target: "anvil", "{}", event.message),
            EventKind::Warning => tracing::warn!(target: "anvil", "{}", event.message),
            EventKind::Error => tracing::error!(target: "anvil", "{}", event.message),
        }
    }
}

/// Sink that records events for inspection; used by tests and by callers
/// that post-process diagnostics.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes all recorded events, leaving the sink empty.
    #[must_use]
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn post(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Ordered event buffer used inside activations and scratch state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoredEvents {
    events: Vec<Event>,
}

impl StoredEvents {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn post(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Appends every event of `other`, preserving order.
    pub fn extend_from(&mut self, other: &Self) {
        self.events.extend(other.events.iter().cloned());
    }

    /// Replays the buffer into `sink` without consuming it.
    pub fn replay_to(&self, sink: &dyn EventSink) {
        for event in &self.events {
            sink.post(event);
        }
    }

    /// Replays the buffer into another buffer (scratch → activation).
    pub fn replay_into(&self, buffer: &mut Self) {
        buffer.extend_from(self);
    }

    /// True when any buffered event is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.events.iter().any(|e| e.kind == EventKind::Error)
    }

    /// True when nothing was posted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drains the buffer.
    pub fn take_all(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Iterates buffered events in post order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
