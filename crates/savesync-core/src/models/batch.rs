//! Save batch model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::instruction::{PersistenceInstruction, UpdateCategory};
use super::player::PlayerId;

/// A unique identifier for a batch, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionBatchId(Uuid);

impl SessionBatchId {
    /// Create a new unique batch ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionBatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionBatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionBatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Weight archetype of a batch.
///
/// Variants differ only in delivery policy, never in behavior contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightClass {
    Slim,
    Medium,
    Heavy,
    /// Contains at least one urgent delta
    Critical,
    /// Explicit full-state backup
    Superbackup,
}

impl WeightClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Slim => "slim",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
            Self::Critical => "critical",
            Self::Superbackup => "superbackup",
        }
    }

    /// Critical and superbackup batches skip cadence gating unless told otherwise.
    pub const fn urgent_by_default(self) -> bool {
        matches!(self, Self::Critical | Self::Superbackup)
    }

    /// Classify a regular (non-urgent, non-backup) batch by its size.
    pub const fn for_instruction_count(count: usize, slim_max: usize, medium_max: usize) -> Self {
        if count <= slim_max {
            Self::Slim
        } else if count <= medium_max {
            Self::Medium
        } else {
            Self::Heavy
        }
    }
}

impl fmt::Display for WeightClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeightClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slim" => Ok(Self::Slim),
            "medium" => Ok(Self::Medium),
            "heavy" => Ok(Self::Heavy),
            "critical" => Ok(Self::Critical),
            "superbackup" => Ok(Self::Superbackup),
            other => Err(Error::InvalidInput(format!("unknown weight class '{other}'"))),
        }
    }
}

/// Immutable, transmission-ready snapshot of a finalized batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub player_id: PlayerId,
    pub session_batch_id: SessionBatchId,
    /// Monotonic per-session sequence; lower means older
    pub sequence: u64,
    pub weight: WeightClass,
    /// Finalization time (Unix ms)
    pub timestamp: i64,
    pub urgent: bool,
    pub instructions: Vec<PersistenceInstruction>,
}

impl BatchPayload {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Whether any instruction updates the given category
    pub fn touches(&self, category: &UpdateCategory) -> bool {
        self.instructions
            .iter()
            .any(|instruction| &instruction.category == category)
    }

    /// Distinct categories touched by this payload, in sorted order
    pub fn categories(&self) -> BTreeSet<&UpdateCategory> {
        self.instructions
            .iter()
            .map(|instruction| &instruction.category)
            .collect()
    }

    pub fn instructions_for(&self, category: &UpdateCategory) -> Vec<PersistenceInstruction> {
        self.instructions
            .iter()
            .filter(|instruction| &instruction.category == category)
            .cloned()
            .collect()
    }

    /// Build a revised payload whose instructions for `category` are replaced.
    ///
    /// The replacement lands where the first removed instruction was, so the
    /// relative order of other categories is preserved.
    #[must_use]
    pub fn with_category_replaced(
        &self,
        category: &UpdateCategory,
        replacement: Vec<PersistenceInstruction>,
    ) -> Self {
        let insert_at = self
            .instructions
            .iter()
            .position(|instruction| &instruction.category == category);
        let mut instructions: Vec<PersistenceInstruction> = Vec::with_capacity(self.instructions.len());
        let mut replacement = Some(replacement);
        for (index, instruction) in self.instructions.iter().enumerate() {
            if Some(index) == insert_at {
                instructions.extend(replacement.take().unwrap_or_default());
            }
            if &instruction.category != category {
                instructions.push(instruction.clone());
            }
        }
        if let Some(rest) = replacement {
            instructions.extend(rest);
        }

        Self {
            instructions,
            ..self.clone()
        }
    }
}

/// Accumulator of persistence instructions for one delivery attempt.
///
/// Append-only until [`SaveBatch::finalize`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveBatch {
    player_id: PlayerId,
    session_batch_id: SessionBatchId,
    sequence: u64,
    weight: WeightClass,
    created_at: i64,
    instructions: Vec<PersistenceInstruction>,
    urgent: bool,
    finalized: Option<BatchPayload>,
}

impl SaveBatch {
    pub fn new(player_id: PlayerId, sequence: u64, weight: WeightClass, now_ms: i64) -> Self {
        Self {
            player_id,
            session_batch_id: SessionBatchId::new(),
            sequence,
            weight,
            created_at: now_ms,
            instructions: Vec::new(),
            urgent: weight.urgent_by_default(),
            finalized: None,
        }
    }

    /// Rebuild an already-finalized batch, e.g. from the local save store.
    pub fn from_payload(payload: BatchPayload) -> Self {
        Self {
            player_id: payload.player_id.clone(),
            session_batch_id: payload.session_batch_id,
            sequence: payload.sequence,
            weight: payload.weight,
            created_at: payload.timestamp,
            instructions: payload.instructions.clone(),
            urgent: payload.urgent,
            finalized: Some(payload),
        }
    }

    pub fn add_instruction(&mut self, instruction: PersistenceInstruction) -> Result<()> {
        self.ensure_open("add an instruction to")?;
        self.instructions.push(instruction);
        Ok(())
    }

    /// Freeze the batch and return its payload.
    ///
    /// Idempotent: later calls return the first payload unchanged.
    pub fn finalize(&mut self, now_ms: i64) -> BatchPayload {
        if let Some(payload) = &self.finalized {
            return payload.clone();
        }

        let payload = BatchPayload {
            player_id: self.player_id.clone(),
            session_batch_id: self.session_batch_id,
            sequence: self.sequence,
            weight: self.weight,
            timestamp: now_ms,
            urgent: self.urgent,
            instructions: self.instructions.clone(),
        };
        self.finalized = Some(payload.clone());
        payload
    }

    pub fn mark_urgent(&mut self) -> Result<()> {
        self.ensure_open("change urgency of")?;
        self.urgent = true;
        Ok(())
    }

    pub fn mark_not_urgent(&mut self) -> Result<()> {
        self.ensure_open("change urgency of")?;
        self.urgent = false;
        Ok(())
    }

    /// Settle the weight class before finalizing. Urgent-by-default classes
    /// also mark the batch urgent.
    pub fn classify(&mut self, weight: WeightClass) -> Result<()> {
        self.ensure_open("reclassify")?;
        self.weight = weight;
        if weight.urgent_by_default() {
            self.urgent = true;
        }
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.finalized.is_some() {
            return Err(Error::invalid_state(format!(
                "cannot {action} finalized batch {}",
                self.session_batch_id
            )));
        }
        Ok(())
    }

    pub const fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub const fn session_batch_id(&self) -> SessionBatchId {
        self.session_batch_id
    }

    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub const fn weight(&self) -> WeightClass {
        self.weight
    }

    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    pub const fn is_urgent(&self) -> bool {
        self.urgent
    }

    pub const fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub const fn payload(&self) -> Option<&BatchPayload> {
        self.finalized.as_ref()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
