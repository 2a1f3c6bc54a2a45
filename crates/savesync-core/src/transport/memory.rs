//! In-memory transport for tests and simulations.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

use super::{SubmissionRequest, SubmissionTransport};

#[derive(Debug, Default)]
struct MemoryTransportState {
    sent: Vec<SubmissionRequest>,
    failures_remaining: usize,
    acknowledge_immediately: bool,
}

/// Records every request it is handed. Clones share state, so a test can
/// keep a handle while the coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryTransportState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose sends return the confirmation token right away
    pub fn acknowledging() -> Self {
        let transport = Self::default();
        transport.lock().acknowledge_immediately = true;
        transport
    }

    /// Fail the next `count` sends with a delivery failure
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    pub fn sent(&self) -> Vec<SubmissionRequest> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn last_sent(&self) -> Option<SubmissionRequest> {
        self.lock().sent.last().cloned()
    }

    /// Drain recorded requests
    pub fn take_sent(&self) -> Vec<SubmissionRequest> {
        std::mem::take(&mut self.lock().sent)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SubmissionTransport for MemoryTransport {
    async fn send(&mut self, request: &SubmissionRequest) -> Result<Option<String>> {
        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(Error::delivery_failure(format!(
                "simulated network failure for submission {}",
                request.sequence
            )));
        }
        state.sent.push(request.clone());
        Ok(state
            .acknowledge_immediately
            .then(|| request.validation_code.clone()))
    }
}
