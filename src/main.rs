//! Validates an identity sync configuration before it is deployed
use std::{path::Path, process::ExitCode, str::FromStr};

use anyhow::{Context, Result};
use identity_sync::{Config, FeatureFlag};
use tracing::level_filters::LevelFilter;

fn main() -> ExitCode {
	match run_check() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!("{:?}", e);
			ExitCode::FAILURE
		}
	}
}

/// Load the configuration, install logging and report what would run
#[allow(clippy::print_stderr)]
fn run_check() -> Result<()> {
	let config = {
		let config_path = std::env::var("IDENTITY_SYNC_CONFIG").unwrap_or("config.yaml".into());
		let config_path = Path::new(&config_path);
		match Config::new(config_path) {
			Ok(config) => config,
			Err(error) => {
				// Tracing subscriber is not yet configured, so we
				// need to manually log this
				eprintln!("Failed to load config file from {:?}: {:?}", config_path, error);
				anyhow::bail!(error);
			}
		}
	};

	let subscriber = tracing_subscriber::FmtSubscriber::builder()
		.with_max_level(
			config
				.log_level
				.as_ref()
				.map_or(Ok(LevelFilter::INFO), |s| LevelFilter::from_str(s))?,
		)
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("Setting default tracing subscriber failed")?;

	for resource in &config.resources {
		tracing::info!(
			"Resource {} (primary: {}, priority: {}, mode: {:?}) maps {} subject type(s)",
			resource.name,
			resource.propagation_primary,
			resource.propagation_priority,
			resource.propagation_mode,
			resource.mappings.len()
		);
	}
	for task in &config.sync_tasks {
		tracing::info!(
			"Sync task {} pulls {} from {} (matching: {:?}, unmatching: {:?}, full: {})",
			task.name,
			task.subject_type,
			task.resource,
			task.matching_rule,
			task.unmatching_rule,
			task.full_reconciliation
		);
	}
	if config.feature_enabled(FeatureFlag::DryRun) {
		tracing::warn!("Dry run is enabled, no changes will be made");
	}
	tracing::info!("Configuration is valid, sync tokens are kept in {:?}", config.token_cache_path);

	Ok(())
}
