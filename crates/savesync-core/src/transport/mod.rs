//! Network boundary for progress submissions.
//!
//! The core only needs two things from the network layer: hand a request
//! over, and eventually learn its confirmation token. Tokens may come back
//! with the send itself or later through
//! [`crate::tracker::BatchTracker::process_save_confirmation`].

mod http;
mod memory;

pub use http::HttpSubmissionTransport;
pub use memory::MemoryTransport;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{BatchPayload, PlayerId, SessionBatchId};

/// Request type tag carried by every submission
pub const PROGRESS_SAVE_SUBMISSION: &str = "progress-save-submission";

/// Outbound submission wrapping one or more finalized batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    /// Creation time (Unix ms)
    pub timestamp: i64,
    /// Fresh per submission; the server echoes it back as the confirmation token
    pub validation_code: String,
    pub request_type: String,
    /// Monotonic per coordinator
    pub sequence: u64,
    pub player_id: PlayerId,
    pub payload: Vec<BatchPayload>,
}

impl SubmissionRequest {
    pub fn batch_ids(&self) -> Vec<SessionBatchId> {
        self.payload
            .iter()
            .map(|batch| batch.session_batch_id)
            .collect()
    }
}

/// Network layer collaborator.
#[allow(async_fn_in_trait)]
pub trait SubmissionTransport {
    /// Hand a request to the network.
    ///
    /// Returns `Ok(Some(token))` when the server acknowledged synchronously,
    /// `Ok(None)` when the token will arrive later, and
    /// [`crate::Error::DeliveryFailure`] when the request could not be sent.
    async fn send(&mut self, request: &SubmissionRequest) -> Result<Option<String>>;
}
