//! Persistence instructions and inbound gameplay deltas

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Category of player state an instruction updates (e.g. `inventory`, `coins`).
///
/// Conflict detection and archetype classification key on this tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateCategory(String);

impl UpdateCategory {
    pub fn new(category: impl Into<String>) -> Self {
        Self(category.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UpdateCategory {
    fn from(category: String) -> Self {
        Self(category)
    }
}

impl From<&str> for UpdateCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A converted persistence instruction. The body is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceInstruction {
    pub category: UpdateCategory,
    pub body: Value,
}

impl PersistenceInstruction {
    pub fn new(category: impl Into<UpdateCategory>, body: Value) -> Self {
        Self {
            category: category.into(),
            body,
        }
    }
}

/// A save-worthy event emitted by the gameplay layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDelta {
    pub instruction: PersistenceInstruction,
    /// Urgent deltas seal the active batch immediately and bypass cadence
    #[serde(default)]
    pub urgent: bool,
}

impl SaveDelta {
    pub fn new(category: impl Into<UpdateCategory>, body: Value) -> Self {
        Self {
            instruction: PersistenceInstruction::new(category, body),
            urgent: false,
        }
    }

    pub fn urgent(category: impl Into<UpdateCategory>, body: Value) -> Self {
        Self {
            instruction: PersistenceInstruction::new(category, body),
            urgent: true,
        }
    }

    pub const fn category(&self) -> &UpdateCategory {
        &self.instruction.category
    }
}
