// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fluxion_charge_adapters::{
    DashboardPublisher, NetZeroController, OctopusAgileClient, OctopusSavingSessions,
    OpenMeteoForecast, SimulatedController,
};
use fluxion_charge_core::{
    BatteryController, ChargeCommands, Executor, ForecastSource, InFlightSlot, Planner,
    RefreshSignal, SafetyPolicy, ScheduleStore, SqliteStore, StatusBoard, TariffSource,
};
use fluxion_charge_types::ExecutorStatus;

use crate::config::AppConfig;

const DEFAULT_LOG_FILTER: &str = "fluxion_charge=info,fluxion_charge_core=info,fluxion_charge_adapters=info";

#[derive(Parser, Debug)]
#[command(name = "fluxion-charge")]
#[command(about = "Schedules home battery charging into the cheapest tariff slots", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "fluxion_charge.toml")]
    config: PathBuf,

    /// Log battery commands instead of sending them
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let cli = Cli::parse();
    let mut config = AppConfig::from_file(&cli.config)?;
    if cli.simulate {
        config.battery.simulation = true;
    }
    config.validate().context("Invalid configuration")?;

    info!("🚀 Starting FluxION Charge");
    info!("📋 Configuration Summary:");
    info!("   Database: {}", config.database.path);
    info!(
        "   Tariff: {} / {}",
        config.tariff.product_code, config.tariff.tariff_code
    );
    info!(
        "   Planner: {} slots over {}h, {} runs/day",
        config.planner.slot_count, config.planner.horizon_hours, config.planner.runs_per_day
    );
    info!(
        "   Peak window: {}-{} ({}), price ceiling: {:?}p/kWh",
        config.policy.peak_start,
        config.policy.peak_end,
        config.policy.timezone,
        config.policy.max_price_p_per_kwh
    );
    info!(
        "   Solar forecast: {}, skip threshold: {:?}kWh",
        config.forecast.enabled, config.policy.solar_skip_kwh
    );
    info!("   Saving sessions: {}", config.saving_sessions.enabled);
    info!("   Simulation mode: {}", config.battery.simulation);

    let sqlite = SqliteStore::open(&config.database.path)
        .with_context(|| format!("Failed to open schedule store at {}", config.database.path))?;
    info!("🗄️ Schedule store ready (schema v{})", sqlite.schema_version()?);
    let store: Arc<dyn ScheduleStore> = Arc::new(sqlite);

    let policy = SafetyPolicy::from_config(&config.policy)?;
    let source_timeout = Duration::from_secs(config.planner.source_timeout_secs);
    let command_timeout = Duration::from_secs(config.executor.command_timeout_secs);

    let tariff: Arc<dyn TariffSource> = Arc::new(
        OctopusAgileClient::new(
            config.tariff.base_url.clone(),
            config.tariff.product_code.clone(),
            config.tariff.tariff_code.clone(),
            source_timeout,
        )?
        .with_retry_config(
            config.tariff.max_retries,
            Duration::from_millis(config.tariff.retry_delay_ms),
        ),
    );
    let forecast: Option<Arc<dyn ForecastSource>> = match &config.forecast.array {
        Some(array) if config.forecast.enabled => Some(Arc::new(OpenMeteoForecast::new(
            config.forecast.base_url.clone(),
            array.clone(),
            source_timeout,
        )?)),
        _ => None,
    };

    let controller: Arc<dyn BatteryController> = if config.battery.simulation {
        warn!("🔍 SIMULATION MODE: battery commands are logged, not sent");
        Arc::new(SimulatedController::new(config.battery.simulated_soc))
    } else {
        Arc::new(NetZeroController::new(
            config.battery.base_url.clone(),
            config.battery.site_id.clone(),
            config.battery.api_key.clone().unwrap_or_default(),
            command_timeout,
        )?)
    };

    let executor_wake = RefreshSignal::new();
    let planner_trigger = RefreshSignal::new();
    let in_flight = InFlightSlot::new();
    let board = Arc::new(StatusBoard::new(ExecutorStatus::starting(Utc::now())));

    let mut planner = Planner::new(
        Arc::clone(&store),
        Arc::clone(&tariff),
        policy,
        config.planner.clone(),
        executor_wake.clone(),
    );
    if let Some(forecast) = &forecast {
        planner = planner.with_forecast(Arc::clone(forecast));
    }

    let mut executor = Executor::new(
        Arc::clone(&store),
        controller,
        policy,
        config.executor.clone(),
        in_flight.clone(),
    )
    .with_publisher(board.clone())
    .with_tariff(tariff);
    if let Some(forecast) = forecast {
        executor = executor.with_forecast(forecast);
    }
    if config.saving_sessions.enabled {
        let sessions = OctopusSavingSessions::new(
            config.saving_sessions.graphql_url.clone(),
            config.saving_sessions.api_key.clone().unwrap_or_default(),
            config.saving_sessions.account_number.clone(),
            source_timeout,
        )?;
        executor = executor.with_saving_sessions(Arc::new(sessions));
        info!("🐙 Saving sessions checked before each slot");
    }
    if let Some(url) = &config.status.dashboard_url {
        let dashboard = DashboardPublisher::new(
            url.clone(),
            config.status.api_key.clone(),
            Duration::from_secs(config.status.timeout_secs),
        )?;
        executor = executor.with_publisher(Arc::new(dashboard));
        info!("📡 Status pushed to {url}/update_status");
    }

    let commands = ChargeCommands::new(
        store,
        in_flight,
        board,
        executor_wake.clone(),
        planner_trigger.clone(),
    );
    match commands.list_pending() {
        Ok(pending) => info!("📅 {} pending slot(s) carried over", pending.len()),
        Err(e) => warn!(error = %e, "Failed to list pending slots"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let planner_task = tokio::spawn(planner.run(planner_trigger, shutdown_rx.clone()));
    let executor_task = tokio::spawn(executor.run(executor_wake, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("🛑 Shutdown requested");
    if shutdown_tx.send(true).is_err() {
        warn!("Loops already stopped");
    }

    let (planner_result, executor_result) = tokio::join!(planner_task, executor_task);
    if let Err(e) = planner_result {
        error!(error = %e, "Planner task ended abnormally");
    }
    if let Err(e) = executor_result {
        error!(error = %e, "Executor task ended abnormally");
    }

    let status = commands.status();
    info!(state = %status.state, message = %status.message, "👋 FluxION Charge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["fluxion-charge"]);
        assert_eq!(cli.config, PathBuf::from("fluxion_charge.toml"));
        assert!(!cli.simulate);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["fluxion-charge", "--config", "/etc/charge.toml", "--simulate"]);
        assert_eq!(cli.config, PathBuf::from("/etc/charge.toml"));
        assert!(cli.simulate);
    }
}
