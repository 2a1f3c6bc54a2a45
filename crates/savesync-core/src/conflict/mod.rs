//! Conflicts between overlapping, unconfirmed batches.
//!
//! A conflict pairs an older and a younger batch of the same player that both
//! update one category before the older one was confirmed. Normal resolution
//! lets the younger batch supersede the older one for that category; archetypes
//! registered with a special resolver merge the two instead.

mod resolver;

pub use resolver::{additive_counter_resolver, BatchConflictResolver, ADDITIVE_ARCHETYPE};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{BatchPayload, PersistenceInstruction, PlayerId, SessionBatchId, UpdateCategory};

/// Merge strategy for a special conflict archetype.
///
/// Receives the disputed instructions of the older and the younger batch, in
/// batch order, and returns the instructions the younger batch should carry.
pub type SpecialResolver = Arc<
    dyn Fn(&[PersistenceInstruction], &[PersistenceInstruction]) -> Result<Vec<PersistenceInstruction>>
        + Send
        + Sync,
>;

/// Classification of how two overlapping batches are reconciled
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ConflictArchetype {
    /// Younger batch wins outright
    Supersede,
    /// Custom merge, dispatched through the resolver registered for the tag
    Special(String),
}

impl ConflictArchetype {
    pub fn tag(&self) -> &str {
        match self {
            Self::Supersede => "supersede",
            Self::Special(tag) => tag,
        }
    }
}

impl fmt::Display for ConflictArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Two unconfirmed batches disputing one update category.
///
/// Holds batch ids only; the batches themselves belong to the tracker.
#[derive(Clone)]
pub struct BatchConflict {
    pub player_id: PlayerId,
    pub older: SessionBatchId,
    pub younger: SessionBatchId,
    pub category: UpdateCategory,
    pub archetype: ConflictArchetype,
    special_resolver: Option<SpecialResolver>,
}

impl fmt::Debug for BatchConflict {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BatchConflict")
            .field("player_id", &self.player_id)
            .field("older", &self.older)
            .field("younger", &self.younger)
            .field("category", &self.category)
            .field("archetype", &self.archetype)
            .field("special_resolver", &self.special_resolver.is_some())
            .finish()
    }
}

/// Outcome of resolving one conflict: what each batch keeps for the category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub category: UpdateCategory,
    pub archetype: ConflictArchetype,
    pub older_instructions: Vec<PersistenceInstruction>,
    pub younger_instructions: Vec<PersistenceInstruction>,
}

impl BatchConflict {
    /// Build a conflict between two payloads.
    ///
    /// Both payloads must belong to the same player, both must touch
    /// `category`, and `older` must precede `younger`. Special archetypes
    /// must come with a resolver.
    pub fn between(
        older: &BatchPayload,
        younger: &BatchPayload,
        category: UpdateCategory,
        archetype: ConflictArchetype,
        special_resolver: Option<SpecialResolver>,
    ) -> Result<Self> {
        if older.player_id != younger.player_id {
            return Err(Error::InvalidInput(format!(
                "batches {} and {} belong to different players",
                older.session_batch_id, younger.session_batch_id
            )));
        }
        if older.sequence >= younger.sequence {
            return Err(Error::InvalidInput(format!(
                "batch {} (seq {}) is not older than {} (seq {})",
                older.session_batch_id,
                older.sequence,
                younger.session_batch_id,
                younger.sequence
            )));
        }
        if !older.touches(&category) || !younger.touches(&category) {
            return Err(Error::InvalidInput(format!(
                "batches {} and {} do not both update '{category}'",
                older.session_batch_id, younger.session_batch_id
            )));
        }
        match (&archetype, &special_resolver) {
            (ConflictArchetype::Special(tag), None) => {
                return Err(Error::invalid_state(format!(
                    "special conflict archetype '{tag}' has no resolver"
                )));
            }
            (ConflictArchetype::Supersede, Some(_)) => {
                return Err(Error::invalid_state(
                    "supersede conflicts do not take a special resolver",
                ));
            }
            _ => {}
        }

        Ok(Self {
            player_id: older.player_id.clone(),
            older: older.session_batch_id,
            younger: younger.session_batch_id,
            category,
            archetype,
            special_resolver,
        })
    }

    /// Whether resolution dispatches to the attached special resolver
    pub const fn utilizes_special_batch_marker(&self) -> bool {
        self.special_resolver.is_some()
    }

    /// Resolve with the special resolver when marked, otherwise with the normal policy.
    pub fn resolve(&self, older: &BatchPayload, younger: &BatchPayload) -> Result<ConflictResolution> {
        self.ensure_matches(older, younger)?;
        if self.utilizes_special_batch_marker() {
            self.resolve_special_batch_conflict(older, younger)
        } else {
            Ok(self.resolve_normal_batch_conflict(younger))
        }
    }

    /// Younger batch supersedes: the older batch drops the category entirely.
    pub fn resolve_normal_batch_conflict(&self, younger: &BatchPayload) -> ConflictResolution {
        ConflictResolution {
            category: self.category.clone(),
            archetype: self.archetype.clone(),
            older_instructions: Vec::new(),
            younger_instructions: younger.instructions_for(&self.category),
        }
    }

    pub fn resolve_special_batch_conflict(
        &self,
        older: &BatchPayload,
        younger: &BatchPayload,
    ) -> Result<ConflictResolution> {
        let resolver = self.special_resolver.as_ref().ok_or_else(|| {
            Error::invalid_state(format!(
                "conflict on '{}' is not marked for special resolution",
                self.category
            ))
        })?;
        let merged = resolver(
            &older.instructions_for(&self.category),
            &younger.instructions_for(&self.category),
        )?;

        Ok(ConflictResolution {
            category: self.category.clone(),
            archetype: self.archetype.clone(),
            older_instructions: Vec::new(),
            younger_instructions: merged,
        })
    }

    fn ensure_matches(&self, older: &BatchPayload, younger: &BatchPayload) -> Result<()> {
        if older.session_batch_id != self.older || younger.session_batch_id != self.younger {
            return Err(Error::InvalidInput(format!(
                "payloads {} / {} do not match conflict {} / {}",
                older.session_batch_id, younger.session_batch_id, self.older, self.younger
            )));
        }
        Ok(())
    }
}
