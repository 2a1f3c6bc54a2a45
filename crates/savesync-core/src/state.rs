//! Coarse per-session sync status for host UI indicators.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSyncState {
    /// Nothing buffered, nothing unconfirmed
    Idle,
    /// Progress recorded but not yet submitted
    Pending,
    AwaitingConfirmation,
    /// A failed delivery is waiting out its backoff
    Retrying,
}

impl SessionSyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Retrying => "retrying",
        }
    }

    /// Whether any progress still lacks server confirmation
    pub const fn has_unconfirmed_progress(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for SessionSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
