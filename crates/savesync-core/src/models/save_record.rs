//! Save record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::batch::{BatchPayload, SaveBatch, SessionBatchId, WeightClass};
use super::player::PlayerId;

/// A unique identifier for a save record, using UUID v7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaveRecordId(Uuid);

impl SaveRecordId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SaveRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaveRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SaveRecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A versioned snapshot of save-worthy state changes for one player.
///
/// Owns exactly one [`SaveBatch`], attached once through
/// [`SaveRecord::populate_player_save_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub player_id: PlayerId,
    pub save_record_id: SaveRecordId,
    /// Written to the local save store
    pub saved_locally: bool,
    /// Confirmed durable by the server
    pub saved_to_server: bool,
    /// Timestamps (Unix ms)
    pub last_local_save: Option<i64>,
    pub last_attempted_server_save: Option<i64>,
    pub server_save_confirmed_at: Option<i64>,
    pub batch_populated_at: Option<i64>,
    batch: Option<SaveBatch>,
}

impl SaveRecord {
    pub fn new(player_id: PlayerId) -> Self {
        Self::with_id(player_id, SaveRecordId::new())
    }

    pub const fn with_id(player_id: PlayerId, save_record_id: SaveRecordId) -> Self {
        Self {
            player_id,
            save_record_id,
            saved_locally: false,
            saved_to_server: false,
            last_local_save: None,
            last_attempted_server_save: None,
            server_save_confirmed_at: None,
            batch_populated_at: None,
            batch: None,
        }
    }

    /// Attach the record's batch. One-shot: a second call fails and the
    /// first batch stays in place.
    pub fn populate_player_save_batch(&mut self, batch: SaveBatch, now_ms: i64) -> Result<()> {
        if let Some(existing) = &self.batch {
            return Err(Error::invalid_state(format!(
                "save record {} already holds batch {}; refusing to attach {}",
                self.save_record_id,
                existing.session_batch_id(),
                batch.session_batch_id()
            )));
        }
        if batch.player_id() != &self.player_id {
            return Err(Error::InvalidInput(format!(
                "batch for player {} cannot populate save record of player {}",
                batch.player_id(),
                self.player_id
            )));
        }

        self.batch = Some(batch);
        self.batch_populated_at = Some(now_ms);
        Ok(())
    }

    pub const fn batch(&self) -> Option<&SaveBatch> {
        self.batch.as_ref()
    }

    pub const fn is_populated(&self) -> bool {
        self.batch.is_some()
    }

    /// Finalized payload, when the batch exists and has been finalized
    pub fn payload(&self) -> Option<&BatchPayload> {
        self.batch.as_ref().and_then(SaveBatch::payload)
    }

    pub fn session_batch_id(&self) -> Option<SessionBatchId> {
        self.batch.as_ref().map(SaveBatch::session_batch_id)
    }

    pub fn weight(&self) -> Option<WeightClass> {
        self.batch.as_ref().map(SaveBatch::weight)
    }

    /// Weight archetype tag (`slim`, `medium`, `heavy`, `critical`, `superbackup`)
    pub fn weight_archetype(&self) -> Option<&'static str> {
        self.weight().map(WeightClass::as_str)
    }

    pub fn mark_saved_locally(&mut self, now_ms: i64) {
        self.saved_locally = true;
        self.last_local_save = Some(now_ms);
    }

    pub fn mark_server_attempt(&mut self, now_ms: i64) {
        self.last_attempted_server_save = Some(now_ms);
    }

    pub fn mark_server_confirmed(&mut self, now_ms: i64) {
        self.saved_to_server = true;
        self.server_save_confirmed_at = Some(now_ms);
    }
}
