use std::path::Path;

use savesync_core::config::{duration_millis, SyncConfig};

use crate::commands::common::format_seconds;

pub fn run_config(config: &SyncConfig, db_path: &Path) {
    for line in format_config_lines(config, db_path) {
        println!("{line}");
    }
}

pub fn format_config_lines(config: &SyncConfig, db_path: &Path) -> Vec<String> {
    let additive = if config.additive_categories.is_empty() {
        "(none)".to_string()
    } else {
        config
            .additive_categories
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        format!("database:                {}", db_path.display()),
        format!(
            "cadence:                 every {} +/- {} ({} slots)",
            format_seconds(duration_millis(config.cadence_period)),
            format_seconds(duration_millis(config.cadence_tolerance)),
            config.slot_count()
        ),
        format!(
            "confirmation timeout:    {}",
            format_seconds(duration_millis(config.confirmation_timeout))
        ),
        format!(
            "retry backoff:           {} doubling, capped at {}",
            format_seconds(duration_millis(config.backoff.base)),
            format_seconds(duration_millis(config.backoff.max))
        ),
        format!(
            "batch limits:            {} instructions (slim <= {}, medium <= {})",
            config.max_instructions_per_batch,
            config.slim_max_instructions,
            config.medium_max_instructions
        ),
        format!(
            "diagnostics:             importance >= {}, keep {}",
            config.log_min_importance, config.log_capacity
        ),
        format!("additive categories:     {additive}"),
        format!(
            "submission endpoint:     {}",
            config.submission_endpoint.as_deref().unwrap_or("(not set)")
        ),
    ]
}
