//! Bridge between finalized batches and the network boundary.
//!
//! The coordinator keeps three buffers: unsent-primary, unsent-backup and
//! submitted-but-unverified. At most one submission is outstanding at a time.
//! Batches handed over while a submission is outstanding land in the backup
//! buffer and are promoted to primary once the outstanding submission is
//! confirmed or abandoned, so nothing is dropped or sent twice.

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

use crate::config::{duration_millis, BackoffPolicy, SyncConfig};
use crate::logger::{Importance, SaveLogger};
use crate::models::{BatchPayload, PlayerId, SessionBatchId};
use crate::transport::{SubmissionRequest, SubmissionTransport, PROGRESS_SAVE_SUBMISSION};

const SENDER: &str = "submission-coordinator";

/// Confirmed tokens remembered for duplicate detection
const CONFIRMED_TOKEN_WINDOW: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Nothing buffered
    Idle,
    /// Another submission is still awaiting confirmation
    AwaitingConfirmation,
    Submitted {
        sequence: u64,
        batch_ids: Vec<SessionBatchId>,
    },
    /// The transport acknowledged synchronously
    Confirmed {
        sequence: u64,
        batch_ids: Vec<SessionBatchId>,
    },
    /// The send failed; the batches were released back to the caller
    Failed {
        sequence: u64,
        batch_ids: Vec<SessionBatchId>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed {
        sequence: u64,
        batch_ids: Vec<SessionBatchId>,
    },
    /// Token of a submission that was already confirmed; no state change
    AlreadyConfirmed,
    /// Unknown token; state unchanged so the caller can retry or escalate
    Mismatch,
}

#[derive(Debug, Clone)]
struct InFlightSubmission {
    request: SubmissionRequest,
    last_sent_at: i64,
    resends: u32,
}

pub struct ProgressSubmissionCoordinator<T> {
    player_id: PlayerId,
    transport: T,
    logger: SaveLogger,
    confirmation_timeout_ms: i64,
    backoff: BackoffPolicy,
    unsent_primary: Vec<BatchPayload>,
    unsent_backup: Vec<BatchPayload>,
    submitted_unverified: Vec<BatchPayload>,
    in_flight: Option<InFlightSubmission>,
    next_sequence: u64,
    confirmed_tokens: VecDeque<String>,
}

impl<T: SubmissionTransport> ProgressSubmissionCoordinator<T> {
    pub fn new(player_id: PlayerId, transport: T, config: &SyncConfig, logger: SaveLogger) -> Self {
        Self {
            player_id,
            transport,
            logger,
            confirmation_timeout_ms: duration_millis(config.confirmation_timeout),
            backoff: config.backoff,
            unsent_primary: Vec::new(),
            unsent_backup: Vec::new(),
            submitted_unverified: Vec::new(),
            in_flight: None,
            next_sequence: 1,
            confirmed_tokens: VecDeque::new(),
        }
    }

    /// Buffer a finalized batch for the next submission.
    pub fn queue_progress_snippet(&mut self, payload: BatchPayload) {
        if self.is_awaiting_confirmation() {
            tracing::debug!(
                batch = %payload.session_batch_id,
                "Submission in flight; buffering batch in backup"
            );
            self.unsent_backup.push(payload);
        } else {
            self.unsent_primary.push(payload);
        }
    }

    /// Wrap the primary buffer into one request and send it.
    ///
    /// Single-flight: does nothing while an earlier submission is unconfirmed.
    pub async fn submit_all_unsaved_progress_snippets(&mut self, now_ms: i64) -> SubmitOutcome {
        if self.is_awaiting_confirmation() {
            return SubmitOutcome::AwaitingConfirmation;
        }
        if self.unsent_primary.is_empty() {
            return SubmitOutcome::Idle;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.submitted_unverified = std::mem::take(&mut self.unsent_primary);
        let request = SubmissionRequest {
            timestamp: now_ms,
            validation_code: Uuid::new_v4().to_string(),
            request_type: PROGRESS_SAVE_SUBMISSION.to_string(),
            sequence,
            player_id: self.player_id.clone(),
            payload: self.submitted_unverified.clone(),
        };
        self.in_flight = Some(InFlightSubmission {
            request: request.clone(),
            last_sent_at: now_ms,
            resends: 0,
        });

        tracing::debug!(
            player = %self.player_id,
            sequence,
            batches = request.payload.len(),
            "Submitting progress"
        );
        let result = self.transport.send(&request).await;
        self.after_send(result, now_ms)
    }

    /// Re-send the outstanding submission unchanged (same token).
    pub async fn resend_in_flight(&mut self, now_ms: i64) -> SubmitOutcome {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return SubmitOutcome::Idle;
        };
        in_flight.resends += 1;
        in_flight.last_sent_at = now_ms;
        let request = in_flight.request.clone();

        self.logger.log_delivery(
            SENDER,
            Importance::Normal,
            format!(
                "re-sending submission {} for player {} (attempt {})",
                request.sequence,
                self.player_id,
                in_flight.resends + 1
            ),
        );
        let result = self.transport.send(&request).await;
        self.after_send(result, now_ms)
    }

    fn after_send(
        &mut self,
        result: crate::Result<Option<String>>,
        now_ms: i64,
    ) -> SubmitOutcome {
        let (sequence, batch_ids) = self
            .in_flight
            .as_ref()
            .map(|in_flight| (in_flight.request.sequence, in_flight.request.batch_ids()))
            .unwrap_or_default();

        match result {
            Ok(None) => SubmitOutcome::Submitted {
                sequence,
                batch_ids,
            },
            Ok(Some(token)) => {
                match self.process_attempt_to_confirm_successful_save_confirmation(&token, now_ms) {
                    ConfirmationOutcome::Confirmed {
                        sequence,
                        batch_ids,
                    } => SubmitOutcome::Confirmed {
                        sequence,
                        batch_ids,
                    },
                    ConfirmationOutcome::AlreadyConfirmed | ConfirmationOutcome::Mismatch => {
                        SubmitOutcome::Submitted {
                            sequence,
                            batch_ids,
                        }
                    }
                }
            }
            Err(error) => {
                let released = self.release_in_flight();
                self.logger.log_delivery(
                    SENDER,
                    Importance::High,
                    format!(
                        "submission {sequence} for player {} failed: {error}; {} batch(es) released for retry",
                        self.player_id,
                        released.len()
                    ),
                );
                SubmitOutcome::Failed {
                    sequence,
                    batch_ids: released,
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Abandon the outstanding submission and hand its batches back.
    fn release_in_flight(&mut self) -> Vec<SessionBatchId> {
        self.in_flight = None;
        let released = std::mem::take(&mut self.submitted_unverified)
            .into_iter()
            .map(|payload| payload.session_batch_id)
            .collect();
        self.promote_backup();
        released
    }

    fn promote_backup(&mut self) {
        let backup = std::mem::take(&mut self.unsent_backup);
        self.unsent_primary.extend(backup);
    }

    /// Reconcile a confirmation token with the outstanding submission.
    ///
    /// On a match the unverified buffer is discarded (now durable server-side)
    /// and the backup buffer becomes the new primary buffer.
    pub fn process_attempt_to_confirm_successful_save_confirmation(
        &mut self,
        token: &str,
        now_ms: i64,
    ) -> ConfirmationOutcome {
        let token = token.trim();
        if self.expected_save_confirmation_code() == Some(token) {
            let Some(in_flight) = self.in_flight.take() else {
                return ConfirmationOutcome::Mismatch;
            };
            self.submitted_unverified.clear();
            self.promote_backup();
            self.remember_confirmed(token);

            let sequence = in_flight.request.sequence;
            tracing::info!(
                player = %self.player_id,
                sequence,
                latency_ms = now_ms - in_flight.request.timestamp,
                "Progress submission confirmed"
            );
            return ConfirmationOutcome::Confirmed {
                sequence,
                batch_ids: in_flight.request.batch_ids(),
            };
        }

        if self.confirmed_tokens.iter().any(|known| known == token) {
            tracing::debug!(player = %self.player_id, "Duplicate confirmation ignored");
            return ConfirmationOutcome::AlreadyConfirmed;
        }

        self.logger.log_delivery(
            SENDER,
            Importance::Normal,
            format!(
                "confirmation token mismatch for player {} (awaiting: {})",
                self.player_id,
                self.is_awaiting_confirmation()
            ),
        );
        ConfirmationOutcome::Mismatch
    }

    fn remember_confirmed(&mut self, token: &str) {
        if self.confirmed_tokens.len() == CONFIRMED_TOKEN_WINDOW {
            self.confirmed_tokens.pop_front();
        }
        self.confirmed_tokens.push_back(token.to_string());
    }

    /// Whether the outstanding submission waited past its timeout plus backoff.
    pub fn confirmation_overdue(&self, now_ms: i64) -> bool {
        self.in_flight.as_ref().is_some_and(|in_flight| {
            let wait = self
                .confirmation_timeout_ms
                .saturating_add(self.backoff.delay_millis(in_flight.resends));
            now_ms.saturating_sub(in_flight.last_sent_at) >= wait
        })
    }

    /// Replace a buffered (not yet submitted) payload. Returns false when the
    /// batch is not buffered.
    pub fn revise_buffered(&mut self, payload: BatchPayload) -> bool {
        let id = payload.session_batch_id;
        let slot = self
            .unsent_primary
            .iter_mut()
            .chain(self.unsent_backup.iter_mut())
            .find(|buffered| buffered.session_batch_id == id);
        match slot {
            Some(slot) => {
                *slot = payload;
                true
            }
            None => false,
        }
    }

    /// Remove a buffered (not yet submitted) payload.
    pub fn withdraw_buffered(&mut self, id: SessionBatchId) -> Option<BatchPayload> {
        for buffer in [&mut self.unsent_primary, &mut self.unsent_backup] {
            if let Some(index) = buffer.iter().position(|p| p.session_batch_id == id) {
                return Some(buffer.remove(index));
            }
        }
        None
    }

    pub fn is_on_wire(&self, id: SessionBatchId) -> bool {
        self.submitted_unverified
            .iter()
            .any(|payload| payload.session_batch_id == id)
    }

    pub fn is_buffered(&self, id: SessionBatchId) -> bool {
        self.unsent_primary
            .iter()
            .chain(&self.unsent_backup)
            .any(|payload| payload.session_batch_id == id)
    }

    pub const fn is_awaiting_confirmation(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn expected_save_confirmation_code(&self) -> Option<&str> {
        self.in_flight
            .as_ref()
            .map(|in_flight| in_flight.request.validation_code.as_str())
    }

    pub fn in_flight_sequence(&self) -> Option<u64> {
        self.in_flight
            .as_ref()
            .map(|in_flight| in_flight.request.sequence)
    }

    pub fn in_flight_batch_ids(&self) -> Vec<SessionBatchId> {
        self.in_flight
            .as_ref()
            .map(|in_flight| in_flight.request.batch_ids())
            .unwrap_or_default()
    }

    pub fn unsent_primary(&self) -> &[BatchPayload] {
        &self.unsent_primary
    }

    pub fn unsent_backup(&self) -> &[BatchPayload] {
        &self.unsent_backup
    }

    pub fn submitted_unverified(&self) -> &[BatchPayload] {
        &self.submitted_unverified
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }
}
