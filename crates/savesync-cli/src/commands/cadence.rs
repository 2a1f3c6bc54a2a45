use savesync_core::cadence::{BatchCadenceManager, CadenceWindow};
use savesync_core::config::SyncConfig;

use crate::commands::common::format_seconds;
use crate::error::CliError;

pub fn run_cadence(
    slot: u32,
    count: usize,
    from_secs: i64,
    config: &SyncConfig,
) -> Result<(), CliError> {
    let cadence = BatchCadenceManager::new(slot, config)?;
    let windows = cadence.cadence_windows(from_secs.saturating_mul(1_000), count);
    for line in format_window_lines(slot, &windows) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_window_lines(slot: u32, windows: &[CadenceWindow]) -> Vec<String> {
    let mut lines = vec![format!("Slot {slot}: non-urgent batches are due inside these windows")];
    lines.extend(windows.iter().map(|window| {
        format!(
            "  center {:>8}  open [{}, {}]",
            format_seconds(window.center),
            format_seconds(window.opens_at),
            format_seconds(window.closes_at)
        )
    }));
    lines
}
