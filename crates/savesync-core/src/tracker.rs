//! Per-player delivery queues.
//!
//! Each tracked batch moves `Queued -> handed over -> confirmed`, with a retry
//! edge back to `Queued` when a send fails. The tracker is the only writer of
//! its five queues; the coordinator reports outcomes and the tracker applies
//! the matching queue transitions.
//!
//! Records that leave the tracker (confirmed or superseded) and outbound
//! payloads rewritten by conflict resolution are collected as
//! [`TrackerChanges`] so the host can mirror them into its local store.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::cadence::BatchCadenceManager;
use crate::config::{BackoffPolicy, SyncConfig};
use crate::conflict::{BatchConflict, BatchConflictResolver, ConflictArchetype};
use crate::coordinator::{ConfirmationOutcome, ProgressSubmissionCoordinator, SubmitOutcome};
use crate::error::{Error, Result};
use crate::logger::{Importance, SaveLogger};
use crate::models::{BatchPayload, PlayerId, SaveRecord, SaveRecordId, SessionBatchId, UpdateCategory};
use crate::transport::SubmissionTransport;

const SENDER: &str = "batch-tracker";

/// Confirmed batch ids remembered for idempotent receipts
const CONFIRMED_BATCH_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// In the undelivered queues
    Queued,
    /// Delivered-unconfirmed, still buffered in the coordinator
    Buffered,
    /// Delivered-unconfirmed and part of the outstanding submission
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    Confirmed,
    /// Every instruction was superseded by a younger batch
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetiredRecord {
    pub record: SaveRecord,
    pub reason: RetireReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisedPayload {
    pub save_record_id: SaveRecordId,
    pub payload: BatchPayload,
}

/// Changes since the last [`BatchTracker::take_changes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerChanges {
    pub retired: Vec<RetiredRecord>,
    pub revised: Vec<RevisedPayload>,
    /// Server attempts as `(record, Unix ms)`
    pub attempted: Vec<(SaveRecordId, i64)>,
}

impl TrackerChanges {
    pub fn is_empty(&self) -> bool {
        self.retired.is_empty() && self.revised.is_empty() && self.attempted.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub undelivered_all: Vec<SessionBatchId>,
    pub undelivered_urgent: Vec<SessionBatchId>,
    pub undelivered_non_urgent: Vec<SessionBatchId>,
    pub delivered_unconfirmed_urgent: Vec<SessionBatchId>,
    pub delivered_unconfirmed_non_urgent: Vec<SessionBatchId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub resolved: usize,
    /// Pairs left as they are because a batch was already on the wire
    pub deferred: usize,
    pub unresolved: usize,
    pub superseded: Vec<SessionBatchId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub resend: SubmitOutcome,
    pub conflicts: ConflictReport,
    pub submission: SubmitOutcome,
}

#[derive(Debug, Clone)]
struct TrackedBatch {
    record: SaveRecord,
    /// Current outbound payload; diverges from the record's finalized
    /// payload once conflict resolution rewrites it
    outbound: BatchPayload,
    retries: u32,
    next_attempt_at: i64,
}

type SettledKey = (SessionBatchId, SessionBatchId, UpdateCategory);

pub struct BatchTracker<T> {
    player_id: PlayerId,
    cadence: BatchCadenceManager,
    resolver: BatchConflictResolver,
    coordinator: ProgressSubmissionCoordinator<T>,
    backoff: BackoffPolicy,
    logger: SaveLogger,
    batches: HashMap<SessionBatchId, TrackedBatch>,
    undelivered_all: VecDeque<SessionBatchId>,
    undelivered_urgent: VecDeque<SessionBatchId>,
    undelivered_non_urgent: VecDeque<SessionBatchId>,
    delivered_unconfirmed_urgent: VecDeque<SessionBatchId>,
    delivered_unconfirmed_non_urgent: VecDeque<SessionBatchId>,
    confirmed: VecDeque<SessionBatchId>,
    settled: HashSet<SettledKey>,
    changes: TrackerChanges,
}

impl<T: SubmissionTransport> BatchTracker<T> {
    pub fn new(
        player_id: PlayerId,
        cadence: BatchCadenceManager,
        resolver: BatchConflictResolver,
        coordinator: ProgressSubmissionCoordinator<T>,
        config: &SyncConfig,
        logger: SaveLogger,
    ) -> Self {
        Self {
            player_id,
            cadence,
            resolver,
            coordinator,
            backoff: config.backoff,
            logger,
            batches: HashMap::new(),
            undelivered_all: VecDeque::new(),
            undelivered_urgent: VecDeque::new(),
            undelivered_non_urgent: VecDeque::new(),
            delivered_unconfirmed_urgent: VecDeque::new(),
            delivered_unconfirmed_non_urgent: VecDeque::new(),
            confirmed: VecDeque::new(),
            settled: HashSet::new(),
            changes: TrackerChanges::default(),
        }
    }

    /// Start tracking a populated, finalized save record.
    ///
    /// Returns `Ok(false)` for a batch that is already tracked (or already
    /// confirmed) and leaves the queues untouched.
    pub fn register_save_batch_to_track(&mut self, record: SaveRecord) -> Result<bool> {
        let Some(payload) = record.payload().cloned() else {
            let message = format!(
                "save record {} reached the tracker without a finalized batch",
                record.save_record_id
            );
            self.logger.log_incomplete_save(SENDER, message.clone());
            return Err(Error::InvalidState(message));
        };
        if record.player_id != self.player_id {
            return Err(Error::InvalidInput(format!(
                "save record of player {} cannot be tracked for player {}",
                record.player_id, self.player_id
            )));
        }

        let id = payload.session_batch_id;
        if self.batches.contains_key(&id) || self.confirmed.contains(&id) {
            tracing::debug!(batch = %id, "Duplicate batch registration rejected");
            return Ok(false);
        }

        let urgent = payload.urgent;
        self.batches.insert(
            id,
            TrackedBatch {
                record,
                outbound: payload,
                retries: 0,
                next_attempt_at: i64::MIN,
            },
        );
        self.push_undelivered(id, urgent);
        tracing::debug!(player = %self.player_id, batch = %id, urgent, "Tracking batch");
        Ok(true)
    }

    /// Hand one urgent queued batch to the coordinator and submit.
    pub async fn begin_delivery_chain_for_urgent_batch(
        &mut self,
        id: SessionBatchId,
        now_ms: i64,
    ) -> Result<SubmitOutcome> {
        let tracked = self.tracked(id)?;
        if !tracked.outbound.urgent {
            return Err(Error::InvalidInput(format!("batch {id} is not urgent")));
        }
        self.hand_over(id);
        Ok(self.submit(now_ms).await)
    }

    /// Hand every urgent queued batch that is not backing off to the coordinator.
    pub async fn begin_delivery_chain_for_all_urgent_batches(&mut self, now_ms: i64) -> SubmitOutcome {
        let ids = self.ready_ids(&self.undelivered_urgent, now_ms);
        for id in ids {
            self.hand_over(id);
        }
        self.submit(now_ms).await
    }

    /// Hand every queued batch the cadence manager considers due.
    pub async fn begin_delivery_chain_for_due_batches(&mut self, now_ms: i64) -> SubmitOutcome {
        let ids: Vec<SessionBatchId> = self
            .ready_ids(&self.undelivered_all, now_ms)
            .into_iter()
            .filter(|id| {
                self.batches.get(id).is_some_and(|tracked| {
                    self.cadence
                        .is_batch_due_for_delivery(&tracked.outbound, now_ms)
                })
            })
            .collect();
        for id in ids {
            self.hand_over(id);
        }
        self.submit(now_ms).await
    }

    /// Hand over every queued batch, ignoring cadence and backoff.
    pub async fn begin_delivery_chain_for_all_batches(&mut self, now_ms: i64) -> SubmitOutcome {
        let mut ids: Vec<SessionBatchId> = self.undelivered_all.iter().copied().collect();
        self.sort_by_sequence(&mut ids);
        for id in ids {
            self.hand_over(id);
        }
        self.submit(now_ms).await
    }

    /// Push one batch towards the server again, whatever stage it is at.
    ///
    /// A queued batch is handed over, a buffered one is submitted, and an
    /// in-flight one causes the outstanding submission to be re-sent.
    pub async fn reattempt_delivery_for_batch(
        &mut self,
        id: SessionBatchId,
        now_ms: i64,
    ) -> Result<SubmitOutcome> {
        let state = self
            .delivery_state(id)
            .ok_or_else(|| Error::NotFound(format!("batch {id} is not tracked")))?;
        let outcome = match state {
            DeliveryState::Queued => {
                self.hand_over(id);
                self.submit(now_ms).await
            }
            DeliveryState::Buffered => self.submit(now_ms).await,
            DeliveryState::InFlight => self.resend(now_ms).await,
        };
        Ok(outcome)
    }

    /// Re-send the outstanding submission once its confirmation is overdue.
    pub async fn reattempt_delivery_for_overdue_batches(&mut self, now_ms: i64) -> SubmitOutcome {
        self.logger.observe_time(now_ms);
        if !self.coordinator.confirmation_overdue(now_ms) {
            return SubmitOutcome::Idle;
        }
        if let Some(sequence) = self.coordinator.in_flight_sequence() {
            self.logger.log_delivery(
                SENDER,
                Importance::Normal,
                Error::ConfirmationTimeout(sequence).to_string(),
            );
        }
        self.resend(now_ms).await
    }

    /// Route a confirmation token through the coordinator and retire the
    /// confirmed batches.
    pub fn process_save_confirmation(&mut self, token: &str, now_ms: i64) -> ConfirmationOutcome {
        self.logger.observe_time(now_ms);
        let outcome = self
            .coordinator
            .process_attempt_to_confirm_successful_save_confirmation(token, now_ms);
        if let ConfirmationOutcome::Confirmed { batch_ids, .. } = &outcome {
            for id in batch_ids {
                self.process_successful_delivery_receipt_for_batch(*id, now_ms);
            }
        }
        outcome
    }

    /// Remove a confirmed batch and mark its record confirmed.
    ///
    /// Idempotent: returns false for a batch that is unknown or already
    /// confirmed.
    pub fn process_successful_delivery_receipt_for_batch(
        &mut self,
        id: SessionBatchId,
        now_ms: i64,
    ) -> bool {
        self.logger.observe_time(now_ms);
        if self.confirmed.contains(&id) {
            tracing::debug!(batch = %id, "Duplicate delivery receipt ignored");
            return false;
        }
        if self.undelivered_all.contains(&id) {
            self.logger.log_delivery(
                SENDER,
                Importance::High,
                format!("receipt for batch {id} that was never handed over"),
            );
            return false;
        }
        let Some(mut tracked) = self.untrack(id) else {
            return false;
        };

        tracked.record.mark_server_confirmed(now_ms);
        if self.confirmed.len() == CONFIRMED_BATCH_WINDOW {
            self.confirmed.pop_front();
        }
        self.confirmed.push_back(id);
        tracing::debug!(player = %self.player_id, batch = %id, "Batch confirmed");
        self.changes.retired.push(RetiredRecord {
            record: tracked.record,
            reason: RetireReason::Confirmed,
        });
        true
    }

    /// Conflicts among tracked batches that have not been settled yet.
    pub fn detect_conflicts(&self) -> Vec<BatchConflict> {
        let mut ids: Vec<SessionBatchId> = self.batches.keys().copied().collect();
        self.sort_by_sequence(&mut ids);

        let mut conflicts = Vec::new();
        for (index, older) in ids.iter().enumerate() {
            for younger in &ids[index + 1..] {
                let (Some(a), Some(b)) = (self.batches.get(older), self.batches.get(younger)) else {
                    continue;
                };
                conflicts.extend(
                    self.resolver
                        .detect(&a.outbound, &b.outbound)
                        .into_iter()
                        .filter(|conflict| !self.settled.contains(&settled_key(conflict))),
                );
            }
        }
        conflicts
    }

    /// Detect and resolve conflicts, oldest pair first.
    ///
    /// Deferred pairs stay unsettled and are looked at again on the next
    /// pass, since a failed send can put the older batch back in the queue.
    pub fn resolve_conflicts(&mut self, now_ms: i64) -> ConflictReport {
        self.logger.observe_time(now_ms);
        let mut report = ConflictReport::default();
        for conflict in self.detect_conflicts() {
            let settled = self.resolve_conflict(&conflict, now_ms, &mut report);
            if settled
                && self.batches.contains_key(&conflict.older)
                && self.batches.contains_key(&conflict.younger)
            {
                self.settled.insert(settled_key(&conflict));
            }
        }
        report
    }

    /// Returns false when the pair was deferred.
    fn resolve_conflict(
        &mut self,
        conflict: &BatchConflict,
        now_ms: i64,
        report: &mut ConflictReport,
    ) -> bool {
        let (Some(older), Some(younger)) = (
            self.batches.get(&conflict.older),
            self.batches.get(&conflict.younger),
        ) else {
            return true;
        };
        // An earlier resolution in this pass may already have taken the category away.
        if !older.outbound.touches(&conflict.category) || !younger.outbound.touches(&conflict.category) {
            return true;
        }

        let older_rewritable = self.is_rewritable(conflict.older);
        let younger_rewritable = self.is_rewritable(conflict.younger);
        let rewritable = match conflict.archetype {
            ConflictArchetype::Supersede => older_rewritable,
            ConflictArchetype::Special(_) => older_rewritable && younger_rewritable,
        };
        if !rewritable {
            tracing::debug!(
                older = %conflict.older,
                younger = %conflict.younger,
                category = %conflict.category,
                "Conflict left as is; batch already on the wire"
            );
            report.deferred += 1;
            return false;
        }

        let resolution = match self.resolver.resolve(conflict, &older.outbound, &younger.outbound) {
            Ok(resolution) => resolution,
            Err(_) => {
                report.unresolved += 1;
                return true;
            }
        };

        let older_payload = older
            .outbound
            .with_category_replaced(&conflict.category, resolution.older_instructions);
        let younger_payload = conflict.utilizes_special_batch_marker().then(|| {
            younger
                .outbound
                .with_category_replaced(&conflict.category, resolution.younger_instructions)
        });

        tracing::debug!(
            older = %conflict.older,
            younger = %conflict.younger,
            category = %conflict.category,
            archetype = %conflict.archetype,
            "Conflict resolved"
        );
        report.resolved += 1;

        if let Some(payload) = younger_payload {
            self.revise(payload);
        }
        if older_payload.is_empty() {
            self.retire_superseded(conflict.older, now_ms);
            report.superseded.push(conflict.older);
        } else {
            self.revise(older_payload);
        }
        true
    }

    /// Re-send overdue submissions, settle conflicts, then hand over due batches.
    pub async fn tick(&mut self, now_ms: i64) -> TickReport {
        let resend = self.reattempt_delivery_for_overdue_batches(now_ms).await;
        let conflicts = self.resolve_conflicts(now_ms);
        let submission = self.begin_delivery_chain_for_due_batches(now_ms).await;
        TickReport {
            resend,
            conflicts,
            submission,
        }
    }

    pub fn take_changes(&mut self) -> TrackerChanges {
        std::mem::take(&mut self.changes)
    }

    pub fn delivery_state(&self, id: SessionBatchId) -> Option<DeliveryState> {
        if !self.batches.contains_key(&id) {
            return None;
        }
        Some(if self.undelivered_all.contains(&id) {
            DeliveryState::Queued
        } else if self.coordinator.is_on_wire(id) {
            DeliveryState::InFlight
        } else {
            DeliveryState::Buffered
        })
    }

    pub fn queues(&self) -> QueueSnapshot {
        QueueSnapshot {
            undelivered_all: self.undelivered_all.iter().copied().collect(),
            undelivered_urgent: self.undelivered_urgent.iter().copied().collect(),
            undelivered_non_urgent: self.undelivered_non_urgent.iter().copied().collect(),
            delivered_unconfirmed_urgent: self.delivered_unconfirmed_urgent.iter().copied().collect(),
            delivered_unconfirmed_non_urgent: self
                .delivered_unconfirmed_non_urgent
                .iter()
                .copied()
                .collect(),
        }
    }

    pub fn record(&self, id: SessionBatchId) -> Option<&SaveRecord> {
        self.batches.get(&id).map(|tracked| &tracked.record)
    }

    pub fn outbound(&self, id: SessionBatchId) -> Option<&BatchPayload> {
        self.batches.get(&id).map(|tracked| &tracked.outbound)
    }

    pub fn retries(&self, id: SessionBatchId) -> Option<u32> {
        self.batches.get(&id).map(|tracked| tracked.retries)
    }

    pub fn tracked_count(&self) -> usize {
        self.batches.len()
    }

    pub fn has_undelivered(&self) -> bool {
        !self.undelivered_all.is_empty()
    }

    /// Queued batches still waiting out a retry backoff
    pub fn has_backing_off(&self, now_ms: i64) -> bool {
        self.undelivered_all.iter().any(|id| {
            self.batches
                .get(id)
                .is_some_and(|tracked| tracked.next_attempt_at > now_ms)
        })
    }

    pub const fn cadence(&self) -> &BatchCadenceManager {
        &self.cadence
    }

    pub const fn coordinator(&self) -> &ProgressSubmissionCoordinator<T> {
        &self.coordinator
    }

    pub const fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    fn tracked(&self, id: SessionBatchId) -> Result<&TrackedBatch> {
        self.batches
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("batch {id} is not tracked")))
    }

    fn sort_by_sequence(&self, ids: &mut [SessionBatchId]) {
        ids.sort_by_key(|id| self.batches.get(id).map_or(u64::MAX, |tracked| tracked.outbound.sequence));
    }

    /// Queued ids out of `queue` whose backoff has elapsed, oldest first
    fn ready_ids(&self, queue: &VecDeque<SessionBatchId>, now_ms: i64) -> Vec<SessionBatchId> {
        let mut ids: Vec<SessionBatchId> = queue
            .iter()
            .copied()
            .filter(|id| {
                self.batches
                    .get(id)
                    .is_some_and(|tracked| tracked.next_attempt_at <= now_ms)
            })
            .collect();
        self.sort_by_sequence(&mut ids);
        ids
    }

    fn push_undelivered(&mut self, id: SessionBatchId, urgent: bool) {
        self.undelivered_all.push_back(id);
        if urgent {
            self.undelivered_urgent.push_back(id);
        } else {
            self.undelivered_non_urgent.push_back(id);
        }
    }

    fn remove_from_queues(&mut self, id: SessionBatchId) {
        for queue in [
            &mut self.undelivered_all,
            &mut self.undelivered_urgent,
            &mut self.undelivered_non_urgent,
            &mut self.delivered_unconfirmed_urgent,
            &mut self.delivered_unconfirmed_non_urgent,
        ] {
            queue.retain(|queued| *queued != id);
        }
    }

    /// Move a queued batch to delivered-unconfirmed and buffer it in the coordinator.
    fn hand_over(&mut self, id: SessionBatchId) {
        if !self.undelivered_all.contains(&id) {
            return;
        }
        let Some(tracked) = self.batches.get(&id) else {
            return;
        };
        let payload = tracked.outbound.clone();

        self.remove_from_queues(id);
        if payload.urgent {
            self.delivered_unconfirmed_urgent.push_back(id);
        } else {
            self.delivered_unconfirmed_non_urgent.push_back(id);
        }
        tracing::debug!(batch = %id, "Batch handed to submission coordinator");
        self.coordinator.queue_progress_snippet(payload);
    }

    async fn submit(&mut self, now_ms: i64) -> SubmitOutcome {
        self.logger.observe_time(now_ms);
        let outcome = self
            .coordinator
            .submit_all_unsaved_progress_snippets(now_ms)
            .await;
        self.apply_submit_outcome(&outcome, now_ms);
        outcome
    }

    async fn resend(&mut self, now_ms: i64) -> SubmitOutcome {
        self.logger.observe_time(now_ms);
        let resent = self.coordinator.in_flight_batch_ids();
        let outcome = self.coordinator.resend_in_flight(now_ms).await;
        // A failed re-send is counted once, when the batches are re-queued.
        if !matches!(outcome, SubmitOutcome::Failed { .. }) {
            for id in &resent {
                if let Some(tracked) = self.batches.get_mut(id) {
                    tracked.retries += 1;
                }
            }
        }
        self.apply_submit_outcome(&outcome, now_ms);
        outcome
    }

    fn apply_submit_outcome(&mut self, outcome: &SubmitOutcome, now_ms: i64) {
        match outcome {
            SubmitOutcome::Submitted { batch_ids, .. } => self.mark_attempted(batch_ids, now_ms),
            SubmitOutcome::Confirmed { batch_ids, .. } => {
                self.mark_attempted(batch_ids, now_ms);
                for id in batch_ids {
                    self.process_successful_delivery_receipt_for_batch(*id, now_ms);
                }
            }
            SubmitOutcome::Failed { batch_ids, .. } => {
                for id in batch_ids {
                    self.requeue_after_failure(*id, now_ms);
                }
            }
            SubmitOutcome::Idle | SubmitOutcome::AwaitingConfirmation => {}
        }
    }

    fn mark_attempted(&mut self, ids: &[SessionBatchId], now_ms: i64) {
        for id in ids {
            if let Some(tracked) = self.batches.get_mut(id) {
                tracked.record.mark_server_attempt(now_ms);
                self.changes
                    .attempted
                    .push((tracked.record.save_record_id, now_ms));
            }
        }
    }

    /// RETRY edge: back to the undelivered queues with backoff.
    fn requeue_after_failure(&mut self, id: SessionBatchId, now_ms: i64) {
        let Some(tracked) = self.batches.get_mut(&id) else {
            return;
        };
        tracked.retries += 1;
        let delay = self.backoff.delay_millis(tracked.retries);
        tracked.next_attempt_at = now_ms.saturating_add(delay);
        let (urgent, retries) = (tracked.outbound.urgent, tracked.retries);

        self.remove_from_queues(id);
        self.push_undelivered(id, urgent);
        self.logger.log_delivery(
            SENDER,
            Importance::Normal,
            format!("batch {id} re-queued after failed delivery (retry {retries}, next attempt in {delay} ms)"),
        );
    }

    fn is_rewritable(&self, id: SessionBatchId) -> bool {
        matches!(
            self.delivery_state(id),
            Some(DeliveryState::Queued | DeliveryState::Buffered)
        )
    }

    fn revise(&mut self, payload: BatchPayload) {
        let id = payload.session_batch_id;
        let Some(tracked) = self.batches.get_mut(&id) else {
            return;
        };
        tracked.outbound = payload.clone();
        let save_record_id = tracked.record.save_record_id;
        self.coordinator.revise_buffered(payload.clone());
        self.changes.revised.push(RevisedPayload {
            save_record_id,
            payload,
        });
    }

    fn retire_superseded(&mut self, id: SessionBatchId, now_ms: i64) {
        self.coordinator.withdraw_buffered(id);
        if let Some(tracked) = self.untrack(id) {
            tracing::debug!(batch = %id, at = now_ms, "Batch fully superseded");
            self.changes.retired.push(RetiredRecord {
                record: tracked.record,
                reason: RetireReason::Superseded,
            });
        }
    }

    fn untrack(&mut self, id: SessionBatchId) -> Option<TrackedBatch> {
        let tracked = self.batches.remove(&id)?;
        self.remove_from_queues(id);
        self.settled
            .retain(|(older, younger, _)| *older != id && *younger != id);
        Some(tracked)
    }
}

fn settled_key(conflict: &BatchConflict) -> SettledKey {
    (conflict.older, conflict.younger, conflict.category.clone())
}
