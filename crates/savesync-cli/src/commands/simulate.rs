use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use savesync_core::cadence::BatchCadenceManager;
use savesync_core::config::{duration_millis, SyncConfig};
use savesync_core::conflict::BatchConflictResolver;
use savesync_core::coordinator::ConfirmationOutcome;
use savesync_core::db::{Database, SqliteSaveRecordRepository};
use savesync_core::logger::SaveLogger;
use savesync_core::models::{PlayerId, SaveDelta};
use savesync_core::state::SessionSyncState;
use savesync_core::transport::MemoryTransport;
use savesync_core::PlayerSaveSession;
use serde::Serialize;
use serde_json::json;

use crate::error::CliError;

const TICK_MS: i64 = 250;
/// Chance that a player produces a save-worthy delta on a tick
const DELTA_PROBABILITY: f64 = 0.3;
const URGENT_PROBABILITY: f64 = 0.02;
const CATEGORIES: [&str; 5] = ["coins", "xp", "inventory", "map", "quest"];

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub players: usize,
    pub seconds: u64,
    pub drop_rate: f64,
    pub latency_ms: u64,
    pub seed: u64,
}

impl SimulationOptions {
    fn validate(&self) -> Result<(), CliError> {
        if self.players == 0 {
            return Err(CliError::InvalidOptions("need at least one player".into()));
        }
        if self.seconds == 0 {
            return Err(CliError::InvalidOptions("simulated time must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(CliError::InvalidOptions(format!(
                "drop rate {} outside [0, 1]",
                self.drop_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub player: String,
    pub cadence_slot: u32,
    pub deltas: usize,
    pub requests: usize,
    pub dropped_confirmations: usize,
    pub confirmed_batches: usize,
    pub superseded_batches: usize,
    pub duplicate_confirmations: usize,
    pub final_state: SessionSyncState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub simulated_ms: i64,
    pub players: Vec<PlayerSummary>,
    /// Requests received per second of the cadence period
    pub requests_by_period_second: Vec<usize>,
}

impl SimulationReport {
    pub fn total_requests(&self) -> usize {
        self.players.iter().map(|player| player.requests).sum()
    }

    pub fn total_confirmed(&self) -> usize {
        self.players.iter().map(|player| player.confirmed_batches).sum()
    }

    pub fn unsettled_players(&self) -> usize {
        self.players
            .iter()
            .filter(|player| player.final_state.has_unconfirmed_progress())
            .count()
    }
}

type SimulatedSession<'a> = PlayerSaveSession<MemoryTransport, SqliteSaveRecordRepository<'a>>;

struct SimulatedPlayer<'a> {
    session: SimulatedSession<'a>,
    transport: MemoryTransport,
    cadence_slot: u32,
    deltas: usize,
    requests: usize,
    dropped: usize,
    confirmed: usize,
    superseded: usize,
    duplicates: usize,
}

struct PendingConfirmation {
    due_at: i64,
    player: usize,
    token: String,
}

/// Server stand-in: confirms every received request after a latency,
/// except for the fraction it drops.
struct SimulatedServer {
    latency_ms: i64,
    drop_rate: f64,
    period_secs: usize,
    pending: Vec<PendingConfirmation>,
    requests_by_period_second: Vec<usize>,
}

impl SimulatedServer {
    fn new(options: &SimulationOptions, config: &SyncConfig) -> Self {
        let period_secs = usize::try_from(config.slot_count()).unwrap_or(1).max(1);
        Self {
            latency_ms: i64::try_from(options.latency_ms).unwrap_or(i64::MAX),
            drop_rate: options.drop_rate,
            period_secs,
            pending: Vec::new(),
            requests_by_period_second: vec![0; period_secs],
        }
    }

    fn accept(&mut self, now_ms: i64, players: &mut [SimulatedPlayer<'_>], rng: &mut StdRng) {
        let second = usize::try_from(now_ms / 1_000).unwrap_or(0) % self.period_secs;
        for (index, player) in players.iter_mut().enumerate() {
            for request in player.transport.take_sent() {
                player.requests += 1;
                self.requests_by_period_second[second] += 1;
                if rng.gen_bool(self.drop_rate) {
                    player.dropped += 1;
                    continue;
                }
                self.pending.push(PendingConfirmation {
                    due_at: now_ms.saturating_add(self.latency_ms),
                    player: index,
                    token: request.validation_code,
                });
            }
        }
    }

    fn deliver_due(&mut self, now_ms: i64, players: &mut [SimulatedPlayer<'_>]) -> Result<(), CliError> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|confirmation| confirmation.due_at <= now_ms);
        self.pending = waiting;

        for confirmation in due {
            let Some(player) = players.get_mut(confirmation.player) else {
                continue;
            };
            match player.session.on_confirmation(&confirmation.token, now_ms)? {
                ConfirmationOutcome::Confirmed { batch_ids, .. } => player.confirmed += batch_ids.len(),
                ConfirmationOutcome::AlreadyConfirmed => player.duplicates += 1,
                ConfirmationOutcome::Mismatch => {}
            }
        }
        Ok(())
    }
}

pub async fn run_simulate(
    options: &SimulationOptions,
    config: &SyncConfig,
    as_json: bool,
) -> Result<(), CliError> {
    let report = simulate(options, config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_simulation_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Deterministic simulated-time run; the same options give the same report.
pub async fn simulate(
    options: &SimulationOptions,
    config: &SyncConfig,
) -> Result<SimulationReport, CliError> {
    options.validate()?;

    let mut config = config.clone();
    if config.additive_categories.is_empty() {
        config.additive_categories = vec!["coins".into()];
    }

    let db = Database::open_in_memory()?;
    let logger = SaveLogger::from_config(&config);
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut players = (0..options.players)
        .map(|index| {
            let cadence = BatchCadenceManager::with_rng(&config, &mut rng);
            let transport = MemoryTransport::new();
            let session = PlayerSaveSession::with_parts(
                PlayerId::new(format!("player-{:03}", index + 1)),
                cadence,
                BatchConflictResolver::from_config(&config, logger.clone()),
                transport.clone(),
                SqliteSaveRecordRepository::new(db.connection()),
                &config,
                logger.clone(),
            )?;
            Ok(SimulatedPlayer {
                session,
                transport,
                cadence_slot: cadence.slot(),
                deltas: 0,
                requests: 0,
                dropped: 0,
                confirmed: 0,
                superseded: 0,
                duplicates: 0,
            })
        })
        .collect::<Result<Vec<SimulatedPlayer<'_>>, CliError>>()?;
    let mut server = SimulatedServer::new(options, &config);

    let play_until = i64::try_from(options.seconds)
        .unwrap_or(i64::MAX / 1_000)
        .saturating_mul(1_000);
    let mut now = 0;
    while now < play_until {
        server.deliver_due(now, &mut players)?;
        for player in &mut players {
            if rng.gen_bool(DELTA_PROBABILITY) {
                let delta = random_delta(&mut rng);
                player.session.record_delta(delta, now)?;
                player.deltas += 1;
            }
            let report = player.session.tick(now).await?;
            player.superseded += report.conflicts.superseded.len();
        }
        server.accept(now, &mut players, &mut rng);
        now += TICK_MS;
    }

    for player in &mut players {
        player.session.flush(now).await?;
    }
    server.accept(now, &mut players, &mut rng);

    // Keep ticking until every session settles or retries stop being plausible.
    let drain_until = now
        + duration_millis(config.confirmation_timeout).saturating_mul(4)
        + server.latency_ms;
    while now < drain_until
        && players
            .iter()
            .any(|player| player.session.status(now).has_unconfirmed_progress())
    {
        now += TICK_MS;
        server.deliver_due(now, &mut players)?;
        for player in &mut players {
            let report = player.session.tick(now).await?;
            player.superseded += report.conflicts.superseded.len();
        }
        server.accept(now, &mut players, &mut rng);
    }

    tracing::debug!(simulated_ms = now, players = players.len(), "Simulation finished");
    Ok(SimulationReport {
        seed: options.seed,
        simulated_ms: now,
        players: players
            .iter()
            .map(|player| PlayerSummary {
                player: player.session.player_id().to_string(),
                cadence_slot: player.cadence_slot,
                deltas: player.deltas,
                requests: player.requests,
                dropped_confirmations: player.dropped,
                confirmed_batches: player.confirmed,
                superseded_batches: player.superseded,
                duplicate_confirmations: player.duplicates,
                final_state: player.session.status(now),
            })
            .collect(),
        requests_by_period_second: server.requests_by_period_second,
    })
}

fn random_delta(rng: &mut StdRng) -> SaveDelta {
    let category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
    let body = match category {
        "coins" => json!(rng.gen_range(1..=50)),
        "xp" => json!({ "points": rng.gen_range(1..=20) }),
        "map" => json!({ "tile": rng.gen_range(0..64) }),
        _ => json!({ "item": rng.gen_range(0..100) }),
    };
    if rng.gen_bool(URGENT_PROBABILITY) {
        SaveDelta::urgent(category, body)
    } else {
        SaveDelta::new(category, body)
    }
}

pub fn format_simulation_lines(report: &SimulationReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<12} {:>4} {:>7} {:>9} {:>10} {:>11} {:>8}  {}",
        "player", "slot", "deltas", "requests", "confirmed", "superseded", "dropped", "state"
    )];
    lines.extend(report.players.iter().map(|player| {
        format!(
            "{:<12} {:>4} {:>7} {:>9} {:>10} {:>11} {:>8}  {}",
            player.player,
            player.cadence_slot,
            player.deltas,
            player.requests,
            player.confirmed_batches,
            player.superseded_batches,
            player.dropped_confirmations,
            player.final_state
        )
    }));
    lines.push(format!(
        "{} request(s), {} batch(es) confirmed, {} player(s) unsettled after {}s (seed {})",
        report.total_requests(),
        report.total_confirmed(),
        report.unsettled_players(),
        report.simulated_ms / 1_000,
        report.seed
    ));
    lines.push(format!(
        "requests by second of cadence period: {}",
        report
            .requests_by_period_second
            .iter()
            .enumerate()
            .map(|(second, count)| format!("{second}:{count}"))
            .collect::<Vec<_>>()
            .join(" ")
    ));
    lines
}
