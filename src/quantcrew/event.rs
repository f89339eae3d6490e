//! Versioned event records emitted by every workflow node.
//!
//! Each agent node emits an `on_chain_start` when it begins, any number of
//! `on_custom` progress events, and always an `on_chain_end` — success or
//! failure — so the event stream remains a reliable driver for UIs.  The
//! company workflow forwards child-agent events after prefixing the event
//! name with the child agent id and tagging it with the agent name.
//!
//! Implement [`EventHandler`] to observe events in real time; the
//! [`EventEmitter`] both forwards to an optional handler and collects the
//! records into the run output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The three lifecycle kinds every node can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "on_chain_start")]
    ChainStart,
    #[serde(rename = "on_custom")]
    Custom,
    #[serde(rename = "on_chain_end")]
    ChainEnd,
}

impl EventKind {
    /// The wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChainStart => "on_chain_start",
            EventKind::Custom => "on_custom",
            EventKind::ChainEnd => "on_chain_end",
        }
    }
}

/// An immutable event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Lifecycle kind of the event.
    pub kind: EventKind,
    /// Node name for start/end events, or a free-form progress name for
    /// custom events.
    pub name: String,
    /// Structured payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Labels attached while forwarding (e.g. the child agent name).
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Event {
    /// An `on_chain_start` for the named node.
    pub fn chain_start(name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ChainStart,
            name: name.into(),
            data: serde_json::Value::Null,
            tags: Vec::new(),
        }
    }

    /// An `on_chain_end` for the named node carrying its output summary.
    pub fn chain_end(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: EventKind::ChainEnd,
            name: name.into(),
            data,
            tags: Vec::new(),
        }
    }

    /// An `on_custom` progress event.
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Custom,
            name: name.into(),
            data,
            tags: Vec::new(),
        }
    }

    /// Attach a tag (builder pattern).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Callback interface for real-time event observation.
///
/// The single method has a no-op default so observers only handle what they
/// care about.  Handlers are shared as `Arc<dyn EventHandler>` across every
/// agent of a run.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, _event: &Event) {}
}

/// Emits events to an optional handler while collecting them for the run
/// output.
pub struct EventEmitter {
    handler: Option<Arc<dyn EventHandler>>,
    collected: Mutex<Vec<Event>>,
}

impl EventEmitter {
    /// Build an emitter, optionally forwarding to a handler.
    pub fn new(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self {
            handler,
            collected: Mutex::new(Vec::new()),
        }
    }

    /// Emit one event: forward to the handler (if any), then record it.
    pub async fn emit(&self, event: Event) {
        if let Some(handler) = &self.handler {
            handler.on_event(&event).await;
        }
        self.collected.lock().await.push(event);
    }

    /// Number of events recorded so far.
    pub async fn len(&self) -> usize {
        self.collected.lock().await.len()
    }

    /// Take all recorded events, leaving the emitter empty.
    pub async fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.collected.lock().await)
    }
}

/// Handler that appends every event to a shared vector; used by tests and
/// simple observers.
#[derive(Default)]
pub struct CollectingHandler {
    events: Mutex<Vec<Event>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything observed so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn on_event(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
