use std::path::Path;

use savesync_core::db::{SaveRecordRepository, SqliteSaveRecordRepository, StoredSaveRecord};
use serde::Serialize;

use crate::commands::common::{format_timestamp, normalize_player_id, open_database};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub save_record_id: String,
    pub player_id: String,
    pub session_batch_id: String,
    pub sequence: u64,
    pub weight: String,
    pub urgent: bool,
    pub instructions: usize,
    pub categories: Vec<String>,
    pub revision: u32,
    pub saved_locally_at: Option<i64>,
    pub last_attempted_server_save: Option<i64>,
}

pub fn run_pending(player: Option<&str>, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let items = load_pending(player, db_path)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No unconfirmed save records.");
        return Ok(());
    }

    for line in format_pending_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub fn load_pending(player: Option<&str>, db_path: &Path) -> Result<Vec<PendingItem>, CliError> {
    let player = player.map(normalize_player_id).transpose()?;
    let db = open_database(db_path)?;
    let repo = SqliteSaveRecordRepository::new(db.connection());

    Ok(repo
        .list_unconfirmed(player.as_ref())?
        .iter()
        .filter_map(pending_item)
        .collect())
}

fn pending_item(stored: &StoredSaveRecord) -> Option<PendingItem> {
    let record = &stored.record;
    let payload = record.payload()?;
    Some(PendingItem {
        save_record_id: record.save_record_id.to_string(),
        player_id: record.player_id.to_string(),
        session_batch_id: payload.session_batch_id.to_string(),
        sequence: payload.sequence,
        weight: payload.weight.as_str().to_string(),
        urgent: payload.urgent,
        instructions: payload.instructions.len(),
        categories: payload
            .categories()
            .into_iter()
            .map(ToString::to_string)
            .collect(),
        revision: stored.revision,
        saved_locally_at: record.last_local_save,
        last_attempted_server_save: record.last_attempted_server_save,
    })
}

pub fn format_pending_lines(items: &[PendingItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let urgency = if item.urgent { " urgent" } else { "" };
            format!(
                "{}  {}  #{:<4} {:<11}{}  {} instr [{}]  rev {}  saved {}  attempted {}",
                short_id(&item.save_record_id),
                item.player_id,
                item.sequence,
                item.weight,
                urgency,
                item.instructions,
                item.categories.join(", "),
                item.revision,
                format_timestamp(item.saved_locally_at),
                format_timestamp(item.last_attempted_server_save),
            )
        })
        .collect()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
