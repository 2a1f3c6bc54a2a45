//! Diagnostics sink for save anomalies.
//!
//! Entries carry a message, a sender tag and an importance level. Entries at
//! or above the configured minimum are emitted through `tracing` and kept in
//! a bounded ring so hosts (and tests) can inspect recent anomalies.
//!
//! The logger never reads the wall clock. Entries are stamped with the latest
//! time reported through [`SaveLogger::observe_time`], which the session and
//! tracker call with the `now_ms` they are driven with.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;

/// Importance level used for downstream filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
    Critical,
}

impl Importance {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown importance '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveLogKind {
    /// A record reached the tracker without a finalized batch
    IncompleteSave,
    /// Something tried to re-populate an already-populated save record
    SuspiciousOverride,
    /// Two overlapping batches could not be reconciled
    UnresolvedConflict,
    /// Retries, timeouts and stray confirmations
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveLogEntry {
    pub kind: SaveLogKind,
    pub sender: String,
    pub importance: Importance,
    pub message: String,
    /// Latest observed caller time, Unix ms
    pub logged_at: i64,
}

/// Shared, cloneable diagnostics logger.
#[derive(Clone)]
pub struct SaveLogger {
    min_importance: Importance,
    capacity: usize,
    observed_at: Arc<AtomicI64>,
    entries: Arc<Mutex<VecDeque<SaveLogEntry>>>,
}

impl fmt::Debug for SaveLogger {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SaveLogger")
            .field("min_importance", &self.min_importance)
            .field("capacity", &self.capacity)
            .field("retained", &self.len())
            .finish()
    }
}

impl Default for SaveLogger {
    fn default() -> Self {
        Self::new(Importance::Low, 256)
    }
}

impl SaveLogger {
    pub fn new(min_importance: Importance, capacity: usize) -> Self {
        Self {
            min_importance,
            capacity: capacity.max(1),
            observed_at: Arc::new(AtomicI64::new(0)),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.log_min_importance, config.log_capacity)
    }

    /// Advance the time stamped on new entries. Never moves backwards.
    pub fn observe_time(&self, now_ms: i64) {
        self.observed_at.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn observed_time(&self) -> i64 {
        self.observed_at.load(Ordering::Relaxed)
    }

    pub fn log(
        &self,
        kind: SaveLogKind,
        sender: &str,
        importance: Importance,
        message: impl Into<String>,
    ) {
        if importance < self.min_importance {
            return;
        }

        let message = message.into();
        match importance {
            Importance::Low => tracing::debug!(?kind, sender, "{message}"),
            Importance::Normal => tracing::info!(?kind, sender, "{message}"),
            Importance::High => tracing::warn!(?kind, sender, "{message}"),
            Importance::Critical => tracing::error!(?kind, sender, "{message}"),
        }

        let entry = SaveLogEntry {
            kind,
            sender: sender.to_string(),
            importance,
            message,
            logged_at: self.observed_time(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn log_incomplete_save(&self, sender: &str, message: impl Into<String>) {
        self.log(SaveLogKind::IncompleteSave, sender, Importance::High, message);
    }

    pub fn log_suspicious_override(&self, sender: &str, message: impl Into<String>) {
        self.log(
            SaveLogKind::SuspiciousOverride,
            sender,
            Importance::High,
            message,
        );
    }

    pub fn log_unresolved_conflict(
        &self,
        sender: &str,
        importance: Importance,
        message: impl Into<String>,
    ) {
        self.log(SaveLogKind::UnresolvedConflict, sender, importance, message);
    }

    pub fn log_delivery(&self, sender: &str, importance: Importance, message: impl Into<String>) {
        self.log(SaveLogKind::Delivery, sender, importance, message);
    }

    /// Snapshot of retained entries, oldest first
    pub fn entries(&self) -> Vec<SaveLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn entries_of(&self, kind: SaveLogKind) -> Vec<SaveLogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_below_minimum_importance() {
        let logger = SaveLogger::new(Importance::High, 8);
        logger.log_delivery("tracker", Importance::Normal, "retrying");
        logger.log_incomplete_save("tracker", "record without batch");
        assert_eq!(logger.len(), 1);
        assert_eq!(logger.entries()[0].kind, SaveLogKind::IncompleteSave);
    }

    #[test]
    fn ring_drops_oldest_entries() {
        let logger = SaveLogger::new(Importance::Low, 2);
        logger.log_delivery("a", Importance::Low, "first");
        logger.log_delivery("b", Importance::Low, "second");
        logger.log_delivery("c", Importance::Low, "third");

        let senders: Vec<String> = logger.entries().into_iter().map(|e| e.sender).collect();
        assert_eq!(senders, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn clones_share_the_same_ring() {
        let logger = SaveLogger::default();
        let clone = logger.clone();
        clone.log_suspicious_override("session", "populate twice");
        assert_eq!(logger.entries_of(SaveLogKind::SuspiciousOverride).len(), 1);
    }

    #[test]
    fn entries_carry_the_latest_observed_time() {
        let logger = SaveLogger::default();
        logger.log_delivery("tracker", Importance::Normal, "before any tick");
        logger.observe_time(5_000);
        logger.clone().observe_time(4_000);
        logger.log_delivery("tracker", Importance::Normal, "after a tick");

        let stamps: Vec<i64> = logger.entries().iter().map(|e| e.logged_at).collect();
        assert_eq!(stamps, vec![0, 5_000]);
    }

    #[test]
    fn importance_parses_case_insensitively() {
        assert_eq!("Critical".parse::<Importance>(), Ok(Importance::Critical));
        assert!("loud".parse::<Importance>().is_err());
        assert!(Importance::Critical > Importance::High);
    }
}
