//! savesync-core - Client-side save buffering for player progress
//!
//! Gameplay deltas are batched, written to a local store, delivered on a
//! jittered per-player cadence (urgent batches immediately) and retained
//! until the server confirms them by token. Overlapping unconfirmed batches
//! are reconciled by a conflict resolver before they go out.

pub mod cadence;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod logger;
pub mod models;
pub mod session;
pub mod state;
pub mod tracker;
pub mod transport;
pub mod util;

pub use error::{Error, Result};
pub use models::{PlayerId, SaveDelta, SaveRecord, SessionBatchId};
pub use session::PlayerSaveSession;
