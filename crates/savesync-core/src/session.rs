//! Gameplay-facing save session for one player.
//!
//! Deltas accumulate into the active batch. The batch is sealed into a
//! [`SaveRecord`] when it is full, when an urgent delta arrives, or when the
//! player's cadence window opens on a tick. Sealed records are written to the
//! local store before the tracker sees them, so unconfirmed progress survives
//! a restart.

use crate::cadence::BatchCadenceManager;
use crate::config::SyncConfig;
use crate::conflict::BatchConflictResolver;
use crate::coordinator::{ConfirmationOutcome, ProgressSubmissionCoordinator, SubmitOutcome};
use crate::db::SaveRecordRepository;
use crate::error::{Error, Result};
use crate::logger::SaveLogger;
use crate::models::{
    PersistenceInstruction, PlayerId, SaveBatch, SaveDelta, SaveRecord, SessionBatchId, WeightClass,
};
use crate::state::SessionSyncState;
use crate::tracker::{BatchTracker, RetireReason, TickReport};
use crate::transport::SubmissionTransport;

const SENDER: &str = "save-session";

pub struct PlayerSaveSession<T, R> {
    player_id: PlayerId,
    config: SyncConfig,
    logger: SaveLogger,
    tracker: BatchTracker<T>,
    repository: R,
    active: Option<SaveBatch>,
    next_sequence: u64,
}

impl<T: SubmissionTransport, R: SaveRecordRepository> PlayerSaveSession<T, R> {
    /// Session with a freshly drawn cadence slot and the configured resolvers.
    pub fn new(
        player_id: PlayerId,
        transport: T,
        repository: R,
        config: &SyncConfig,
        logger: SaveLogger,
    ) -> Result<Self> {
        let cadence = BatchCadenceManager::for_new_session(config);
        let resolver = BatchConflictResolver::from_config(config, logger.clone());
        Self::with_parts(player_id, cadence, resolver, transport, repository, config, logger)
    }

    /// Build a session around explicit parts. Sequence numbering resumes
    /// after the highest sequence the local store still holds for the player.
    pub fn with_parts(
        player_id: PlayerId,
        cadence: BatchCadenceManager,
        resolver: BatchConflictResolver,
        transport: T,
        repository: R,
        config: &SyncConfig,
        logger: SaveLogger,
    ) -> Result<Self> {
        let next_sequence = repository
            .list_unconfirmed(Some(&player_id))?
            .iter()
            .filter_map(|entry| entry.record.payload())
            .map(|payload| payload.sequence + 1)
            .max()
            .unwrap_or(1);
        let coordinator =
            ProgressSubmissionCoordinator::new(player_id.clone(), transport, config, logger.clone());
        let tracker = BatchTracker::new(
            player_id.clone(),
            cadence,
            resolver,
            coordinator,
            config,
            logger.clone(),
        );
        tracing::debug!(
            player = %player_id,
            slot = cadence.slot(),
            next_sequence,
            "Save session started"
        );

        Ok(Self {
            player_id,
            config: config.clone(),
            logger,
            tracker,
            repository,
            active: None,
            next_sequence,
        })
    }

    /// Append a delta to the active batch. Returns the id of the batch it
    /// sealed, if any.
    pub fn record_delta(&mut self, delta: SaveDelta, now_ms: i64) -> Result<Option<SessionBatchId>> {
        let urgent = delta.urgent;
        let limit = self.config.max_instructions_per_batch;
        let batch = self.active_batch(now_ms);
        batch.add_instruction(delta.instruction)?;
        if urgent {
            batch.mark_urgent()?;
        }

        if urgent || batch.len() >= limit {
            return self.seal_active_batch(now_ms);
        }
        Ok(None)
    }

    /// Seal the active batch, then seal a full-state backup behind it.
    pub fn record_full_backup(
        &mut self,
        instructions: Vec<PersistenceInstruction>,
        now_ms: i64,
    ) -> Result<SessionBatchId> {
        if instructions.is_empty() {
            return Err(Error::InvalidInput("full backup needs at least one instruction".into()));
        }
        self.seal_active_batch(now_ms)?;

        let mut batch = SaveBatch::new(
            self.player_id.clone(),
            self.take_sequence(),
            WeightClass::Superbackup,
            now_ms,
        );
        for instruction in instructions {
            batch.add_instruction(instruction)?;
        }
        self.seal(batch, now_ms)
    }

    /// Classify, finalize, store and track the active batch.
    pub fn seal_active_batch(&mut self, now_ms: i64) -> Result<Option<SessionBatchId>> {
        let Some(mut batch) = self.active.take() else {
            return Ok(None);
        };
        if batch.is_empty() {
            return Ok(None);
        }

        let weight = if batch.is_urgent() {
            WeightClass::Critical
        } else {
            WeightClass::for_instruction_count(
                batch.len(),
                self.config.slim_max_instructions,
                self.config.medium_max_instructions,
            )
        };
        batch.classify(weight)?;
        self.seal(batch, now_ms).map(Some)
    }

    fn seal(&mut self, mut batch: SaveBatch, now_ms: i64) -> Result<SessionBatchId> {
        self.logger.observe_time(now_ms);
        let payload = batch.finalize(now_ms);
        let mut record = SaveRecord::new(self.player_id.clone());
        if let Err(error) = record.populate_player_save_batch(batch, now_ms) {
            if matches!(error, Error::InvalidState(_)) {
                self.logger.log_suspicious_override(SENDER, error.to_string());
            }
            return Err(error);
        }

        record.mark_saved_locally(now_ms);
        self.repository.save(&record)?;
        self.tracker.register_save_batch_to_track(record)?;

        tracing::debug!(
            player = %self.player_id,
            batch = %payload.session_batch_id,
            weight = %payload.weight.as_str(),
            instructions = payload.instructions.len(),
            "Sealed save batch"
        );
        Ok(payload.session_batch_id)
    }

    /// Periodic driver: seal on an open cadence window, then let the tracker
    /// re-send, resolve and deliver.
    pub async fn tick(&mut self, now_ms: i64) -> Result<TickReport> {
        if self.tracker.cadence().is_window_open(now_ms) {
            self.seal_active_batch(now_ms)?;
        }
        let report = self.tracker.tick(now_ms).await;
        self.persist_changes()?;
        Ok(report)
    }

    /// Network callback for an asynchronous confirmation token.
    pub fn on_confirmation(&mut self, token: &str, now_ms: i64) -> Result<ConfirmationOutcome> {
        let outcome = self.tracker.process_save_confirmation(token, now_ms);
        self.persist_changes()?;
        Ok(outcome)
    }

    /// Deliver everything regardless of cadence, e.g. at session end.
    pub async fn flush(&mut self, now_ms: i64) -> Result<SubmitOutcome> {
        self.seal_active_batch(now_ms)?;
        self.tracker.resolve_conflicts(now_ms);
        let outcome = self.tracker.begin_delivery_chain_for_all_batches(now_ms).await;
        self.persist_changes()?;
        Ok(outcome)
    }

    /// Re-register records a previous run left unconfirmed in the local store.
    pub fn recover_unconfirmed(&mut self) -> Result<usize> {
        let stored = self.repository.list_unconfirmed(Some(&self.player_id))?;
        let mut recovered = 0;
        for entry in stored {
            if let Some(payload) = entry.record.payload() {
                self.next_sequence = self.next_sequence.max(payload.sequence + 1);
            }
            if self.tracker.register_save_batch_to_track(entry.record)? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(player = %self.player_id, recovered, "Recovered unconfirmed save records");
        }
        Ok(recovered)
    }

    pub fn status(&self, now_ms: i64) -> SessionSyncState {
        if self.tracker.has_backing_off(now_ms) {
            SessionSyncState::Retrying
        } else if self.tracker.coordinator().is_awaiting_confirmation() {
            SessionSyncState::AwaitingConfirmation
        } else if self.tracker.tracked_count() > 0
            || self.active.as_ref().is_some_and(|batch| !batch.is_empty())
        {
            SessionSyncState::Pending
        } else {
            SessionSyncState::Idle
        }
    }

    pub const fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub const fn tracker(&self) -> &BatchTracker<T> {
        &self.tracker
    }

    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// Instructions in the active, not yet sealed batch
    pub fn active_len(&self) -> usize {
        self.active.as_ref().map_or(0, SaveBatch::len)
    }

    fn active_batch(&mut self, now_ms: i64) -> &mut SaveBatch {
        let batch = match self.active.take() {
            Some(batch) => batch,
            None => SaveBatch::new(
                self.player_id.clone(),
                self.take_sequence(),
                WeightClass::Slim,
                now_ms,
            ),
        };
        self.active.insert(batch)
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Mirror tracker changes into the local store.
    fn persist_changes(&mut self) -> Result<()> {
        let changes = self.tracker.take_changes();
        if changes.is_empty() {
            return Ok(());
        }

        for revised in &changes.revised {
            self.repository
                .update_outbound(&revised.save_record_id, &revised.payload)?;
        }
        for (id, attempted_at) in &changes.attempted {
            self.repository.mark_server_attempt(id, *attempted_at)?;
        }
        let mut confirmed = 0_usize;
        for retired in &changes.retired {
            self.repository.retire(&retired.record.save_record_id)?;
            if retired.reason == RetireReason::Confirmed {
                confirmed += 1;
            }
        }
        if confirmed > 0 {
            tracing::info!(player = %self.player_id, confirmed, "Save records confirmed by server");
        }
        Ok(())
    }
}
