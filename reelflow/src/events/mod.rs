//! Lifecycle event emission.

mod sink;

pub use sink::{
    CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, OrchestratorEvent,
};
