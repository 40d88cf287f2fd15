//! Mock provider client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::adapter::{DispatchError, DispatchReceipt, DispatchRequest, StageClient};
use crate::ledger::EntityId;
use crate::model::CorrelationToken;

/// A provider client that records dispatches and returns scripted outcomes.
///
/// With no scripted outcome queued, every dispatch is accepted.
#[derive(Debug, Default)]
pub struct MockStageClient {
    requests: Mutex<Vec<DispatchRequest>>,
    outcomes: Mutex<VecDeque<Result<DispatchReceipt, DispatchError>>>,
}

impl MockStageClient {
    /// Creates a mock that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome for the next dispatch.
    pub fn push_outcome(&self, outcome: Result<DispatchReceipt, DispatchError>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Number of dispatches received.
    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// All recorded requests, in dispatch order.
    #[must_use]
    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }

    /// Tokens of every dispatch issued for an entity, in order.
    #[must_use]
    pub fn tokens_for(&self, entity: EntityId) -> Vec<CorrelationToken> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.entity == entity)
            .map(|r| r.token.clone())
            .collect()
    }

    /// Clears recorded requests and scripted outcomes.
    pub fn reset(&self) {
        self.requests.lock().clear();
        self.outcomes.lock().clear();
    }
}

#[async_trait]
impl StageClient for MockStageClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        self.requests.lock().push(request.clone());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DispatchReceipt::default()))
    }
}
