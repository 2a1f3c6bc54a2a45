use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use savesync_core::config::SyncConfig;
use savesync_core::db::Database;
use savesync_core::util::normalize_text_option;
use savesync_core::PlayerId;

use crate::error::CliError;

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("savesync")
        .join("saves.db")
}

/// Explicit flag, then `SAVESYNC_DB_PATH`, then the user data directory.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            normalize_text_option(env::var("SAVESYNC_DB_PATH").ok()).map(PathBuf::from)
        })
        .unwrap_or_else(default_db_path)
}

pub fn load_config() -> Result<SyncConfig, CliError> {
    Ok(SyncConfig::from_env()?)
}

pub fn open_database(db_path: &Path) -> Result<Database, CliError> {
    Ok(Database::open(db_path)?)
}

pub fn normalize_player_id(raw: &str) -> Result<PlayerId, CliError> {
    normalize_text_option(Some(raw.to_string()))
        .map(PlayerId::new)
        .ok_or(CliError::EmptyPlayerId)
}

/// RFC 3339 rendering of a Unix ms timestamp, or `-` when absent
pub fn format_timestamp(timestamp_ms: Option<i64>) -> String {
    timestamp_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || "-".to_string(),
            |time| time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
}

/// Milliseconds as seconds with one decimal, e.g. `12.5s`
#[allow(clippy::cast_precision_loss)]
pub fn format_seconds(ms: i64) -> String {
    format!("{:.1}s", ms as f64 / 1_000.0)
}
