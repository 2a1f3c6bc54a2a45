use std::path::Path;

use savesync_core::config::SyncConfig;
use savesync_core::coordinator::SubmitOutcome;
use savesync_core::db::SqliteSaveRecordRepository;
use savesync_core::logger::SaveLogger;
use savesync_core::transport::HttpSubmissionTransport;
use savesync_core::util::unix_timestamp_millis;
use savesync_core::PlayerSaveSession;

use crate::commands::common::{normalize_player_id, open_database};
use crate::error::CliError;

pub async fn run_push(player: &str, config: &SyncConfig, db_path: &Path) -> Result<(), CliError> {
    let player_id = normalize_player_id(player)?;
    let endpoint = config
        .submission_endpoint
        .clone()
        .ok_or(CliError::EndpointNotConfigured)?;

    let db = open_database(db_path)?;
    let transport = HttpSubmissionTransport::new(endpoint)?;
    let mut session = PlayerSaveSession::new(
        player_id,
        transport,
        SqliteSaveRecordRepository::new(db.connection()),
        config,
        SaveLogger::from_config(config),
    )?;

    let recovered = session.recover_unconfirmed()?;
    if recovered == 0 {
        println!("Nothing to push for {}", session.player_id());
        return Ok(());
    }

    let outcome = session.flush(unix_timestamp_millis()).await?;
    println!("{}", describe_push_outcome(recovered, &outcome));
    Ok(())
}

pub fn describe_push_outcome(recovered: usize, outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Confirmed { batch_ids, .. } => {
            format!("Delivered and confirmed {} of {recovered} record(s)", batch_ids.len())
        }
        SubmitOutcome::Submitted { batch_ids, .. } => format!(
            "Submitted {} of {recovered} record(s); no confirmation returned, records stay pending",
            batch_ids.len()
        ),
        SubmitOutcome::Failed { reason, .. } => {
            format!("Delivery failed, {recovered} record(s) stay pending: {reason}")
        }
        SubmitOutcome::Idle | SubmitOutcome::AwaitingConfirmation => {
            format!("{recovered} record(s) recovered; nothing was submitted")
        }
    }
}
