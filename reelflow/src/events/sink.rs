//! Event sink trait and implementations.
//!
//! The scheduler and correlator emit lifecycle events (`stage.dispatched`,
//! `stage.timeout`, `webhook.stale`, ...) through a sink so observability
//! wiring stays outside the orchestration logic.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::StageKind;
use crate::ledger::EntityId;
use crate::utils::{now, Timestamp};

/// A lifecycle event emitted by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorEvent {
    /// Dotted event name, e.g. `stage.dispatched`.
    pub name: String,
    /// The entity involved, when there is one.
    pub entity: Option<EntityId>,
    /// The stage involved, when there is one.
    pub stage: Option<StageKind>,
    /// Free-form event data.
    pub data: Option<serde_json::Value>,
    /// When the event was emitted.
    pub at: Timestamp,
}

impl OrchestratorEvent {
    /// Creates an event with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: None,
            stage: None,
            data: None,
            at: now(),
        }
    }

    /// Attaches the entity involved.
    #[must_use]
    pub fn for_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attaches the stage involved.
    #[must_use]
    pub fn with_stage(mut self, stage: StageKind) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches event data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Receives orchestrator lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: OrchestratorEvent);

    /// Emits an event without awaiting. Must never panic; errors are
    /// swallowed.
    fn try_emit(&self, event: OrchestratorEvent);
}

/// Discards all events. The default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: OrchestratorEvent) {}

    fn try_emit(&self, _event: OrchestratorEvent) {}
}

/// Logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn log(event: &OrchestratorEvent) {
        tracing::info!(
            event = %event.name,
            entity = event.entity.as_ref().map(tracing::field::display),
            stage = event.stage.as_ref().map(tracing::field::display),
            data = ?event.data,
            "pipeline event"
        );
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: OrchestratorEvent) {
        Self::log(&event);
    }

    fn try_emit(&self, event: OrchestratorEvent) {
        Self::log(&event);
    }
}

/// Collects events for test assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<OrchestratorEvent>>,
}

impl CollectingEventSink {
    /// Creates a collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.events.read().clone()
    }

    /// Names of all collected events, in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_named(&self, prefix: &str) -> Vec<OrchestratorEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: OrchestratorEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: OrchestratorEvent) {
        self.events.write().push(event);
    }
}
