use std::path::PathBuf;

use savesync_core::cadence::BatchCadenceManager;
use savesync_core::config::SyncConfig;
use savesync_core::coordinator::SubmitOutcome;
use savesync_core::db::{Database, SqliteSaveRecordRepository};
use savesync_core::logger::SaveLogger;
use savesync_core::models::{PlayerId, SaveDelta, SessionBatchId};
use savesync_core::state::SessionSyncState;
use savesync_core::transport::MemoryTransport;
use clap::Parser;
use savesync_core::PlayerSaveSession;
use serde_json::json;

use crate::cli::{Cli, Commands, MAX_CADENCE_WINDOWS};
use crate::commands::cadence::format_window_lines;
use crate::commands::common::{format_seconds, format_timestamp, normalize_player_id, resolve_db_path};
use crate::commands::config::format_config_lines;
use crate::commands::pending::{format_pending_lines, load_pending};
use crate::commands::push::{describe_push_outcome, run_push};
use crate::commands::simulate::{format_simulation_lines, simulate, SimulationOptions};
use crate::error::CliError;

#[test]
fn normalize_player_id_trims_and_rejects_empty() {
    assert_eq!(
        normalize_player_id("  player-7 ").unwrap(),
        PlayerId::new("player-7")
    );
    assert!(matches!(normalize_player_id(" \t "), Err(CliError::EmptyPlayerId)));
}

#[test]
fn resolve_db_path_prefers_explicit_flag() {
    let explicit = PathBuf::from("/tmp/savesync-explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn format_timestamp_returns_utc_label() {
    assert_eq!(format_timestamp(Some(0)), "1970-01-01T00:00:00Z");
    assert_eq!(format_timestamp(Some(1_500)), "1970-01-01T00:00:01Z");
    assert_eq!(format_timestamp(None), "-");
}

#[test]
fn format_seconds_keeps_one_decimal() {
    assert_eq!(format_seconds(12_500), "12.5s");
    assert_eq!(format_seconds(0), "0.0s");
}

#[test]
fn config_lines_include_cadence_and_endpoint() {
    let config = SyncConfig {
        additive_categories: vec!["coins".into(), "gems".into()],
        ..SyncConfig::default()
    };
    let lines = format_config_lines(&config, &PathBuf::from("/tmp/saves.db"));

    assert!(lines[0].contains("/tmp/saves.db"));
    assert!(lines[1].contains("every 12.0s +/- 4.0s (12 slots)"));
    assert!(lines.iter().any(|line| line.contains("coins, gems")));
    assert!(lines
        .last()
        .is_some_and(|line| line.ends_with("(not set)")));
}

#[test]
fn cadence_lines_list_windows_around_slot_centers() {
    let config = SyncConfig::default();
    let cadence = BatchCadenceManager::new(3, &config).unwrap();
    let lines = format_window_lines(3, &cadence.cadence_windows(0, 2));

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Slot 3:"));
    assert!(lines[1].contains("3.0s"));
    assert!(lines[1].contains("[-1.0s, 7.0s]"));
    assert!(lines[2].contains("15.0s"));
}

#[test]
fn cadence_count_is_bounded() {
    let parsed = Cli::try_parse_from(["savesync", "cadence", "--slot", "3", "--count", "12"]).unwrap();
    assert!(matches!(parsed.command, Commands::Cadence { count: 12, .. }));

    let limit = MAX_CADENCE_WINDOWS.to_string();
    assert!(Cli::try_parse_from(["savesync", "cadence", "--slot", "3", "--count", limit.as_str()]).is_ok());
    assert!(Cli::try_parse_from(["savesync", "cadence", "--slot", "3", "--count", "1001"]).is_err());
    assert!(Cli::try_parse_from(["savesync", "cadence", "--slot", "3", "--count", "0"]).is_err());
    assert!(
        Cli::try_parse_from(["savesync", "cadence", "--slot", "3", "--count", "18446744073709551615"]).is_err()
    );
}

#[test]
fn describe_push_outcome_covers_each_result() {
    let ids = vec![SessionBatchId::new(), SessionBatchId::new()];

    let confirmed = SubmitOutcome::Confirmed {
        sequence: 1,
        batch_ids: ids.clone(),
    };
    assert_eq!(
        describe_push_outcome(2, &confirmed),
        "Delivered and confirmed 2 of 2 record(s)"
    );

    let failed = SubmitOutcome::Failed {
        sequence: 1,
        batch_ids: ids,
        reason: "connection refused".into(),
    };
    let message = describe_push_outcome(2, &failed);
    assert!(message.starts_with("Delivery failed"));
    assert!(message.ends_with("connection refused"));

    assert!(describe_push_outcome(1, &SubmitOutcome::Idle).contains("nothing was submitted"));
}

#[tokio::test(flavor = "current_thread")]
async fn run_push_requires_submission_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::default();

    let result = run_push("player-1", &config, &dir.path().join("saves.db")).await;
    assert!(matches!(result, Err(CliError::EndpointNotConfigured)));
}

#[test]
fn load_pending_lists_records_left_by_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("saves.db");
    let config = SyncConfig::default();

    {
        let db = Database::open(&db_path).unwrap();
        let mut session = PlayerSaveSession::new(
            PlayerId::new("player-1"),
            MemoryTransport::new(),
            SqliteSaveRecordRepository::new(db.connection()),
            &config,
            SaveLogger::from_config(&config),
        )
        .unwrap();
        let sealed = session
            .record_delta(SaveDelta::urgent("quest", json!({ "stage": 4 })), 1_000)
            .unwrap();
        assert!(sealed.is_some());
    }

    let items = load_pending(Some("player-1"), &db_path).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].player_id, "player-1");
    assert!(items[0].urgent);
    assert_eq!(items[0].categories, vec!["quest".to_string()]);
    assert_eq!(items[0].last_attempted_server_save, None);

    let lines = format_pending_lines(&items);
    assert!(lines[0].contains("urgent"));
    assert!(lines[0].contains("[quest]"));

    assert!(load_pending(Some("player-2"), &db_path).unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn simulate_rejects_invalid_options() {
    let config = SyncConfig::default();
    let options = SimulationOptions {
        players: 0,
        seconds: 10,
        drop_rate: 0.0,
        latency_ms: 100,
        seed: 1,
    };
    assert!(matches!(
        simulate(&options, &config).await,
        Err(CliError::InvalidOptions(_))
    ));

    let options = SimulationOptions {
        players: 2,
        drop_rate: 1.5,
        ..options
    };
    assert!(matches!(
        simulate(&options, &config).await,
        Err(CliError::InvalidOptions(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn simulate_settles_every_player_without_drops() {
    let config = SyncConfig::default();
    let options = SimulationOptions {
        players: 3,
        seconds: 30,
        drop_rate: 0.0,
        latency_ms: 200,
        seed: 7,
    };

    let report = simulate(&options, &config).await.unwrap();

    assert_eq!(report.players.len(), 3);
    assert_eq!(report.players[0].player, "player-001");
    assert!(report.total_requests() > 0);
    assert!(report.total_confirmed() > 0);
    assert_eq!(report.unsettled_players(), 0);
    for player in &report.players {
        assert_eq!(player.dropped_confirmations, 0);
        assert_eq!(player.final_state, SessionSyncState::Idle);
        assert!((1..=12).contains(&player.cadence_slot));
    }
    assert_eq!(report.requests_by_period_second.len(), 12);
    assert_eq!(
        report.requests_by_period_second.iter().sum::<usize>(),
        report.total_requests()
    );

    let lines = format_simulation_lines(&report);
    assert_eq!(lines.len(), report.players.len() + 3);
    assert!(lines[1].starts_with("player-001"));
}

#[tokio::test(flavor = "current_thread")]
async fn simulate_is_deterministic_for_a_seed() {
    let config = SyncConfig::default();
    let options = SimulationOptions {
        players: 4,
        seconds: 20,
        drop_rate: 0.25,
        latency_ms: 300,
        seed: 42,
    };

    let first = simulate(&options, &config).await.unwrap();
    let second = simulate(&options, &config).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
