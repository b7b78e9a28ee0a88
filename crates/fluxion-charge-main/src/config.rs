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

use anyhow::{Context, Result, bail};
use fluxion_charge_adapters::{PvArray, netzero, octopus, open_meteo, saving_sessions};
use fluxion_charge_types::{ExecutorConfig, PlannerConfig, PolicyConfig};
use serde::Deserialize;
use std::path::Path;

/// Environment variable consulted when `battery.api_key` is absent
pub const API_KEY_ENV: &str = "NETZERO_API_KEY";

/// Environment variable consulted when `saving_sessions.api_key` is absent
pub const OCTOPUS_API_KEY_ENV: &str = "OCTOPUS_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub tariff: TariffSettings,
    #[serde(default)]
    pub forecast: ForecastSettings,
    #[serde(default)]
    pub saving_sessions: SavingSessionSettings,
    #[serde(default)]
    pub battery: BatterySettings,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub status: StatusSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TariffSettings {
    #[serde(default = "default_tariff_url")]
    pub base_url: String,
    #[serde(default = "default_product_code")]
    pub product_code: String,
    #[serde(default = "default_tariff_code")]
    pub tariff_code: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_forecast_url")]
    pub base_url: String,
    pub array: Option<PvArray>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavingSessionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    /// Falls back to `OCTOPUS_API_KEY`
    pub api_key: Option<String>,
    #[serde(default)]
    pub account_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatterySettings {
    #[serde(default = "default_battery_url")]
    pub base_url: String,
    #[serde(default)]
    pub site_id: String,
    /// Falls back to `NETZERO_API_KEY`
    pub api_key: Option<String>,
    /// Log commands instead of sending them
    #[serde(default)]
    pub simulation: bool,
    #[serde(default = "default_simulated_soc")]
    pub simulated_soc: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusSettings {
    /// Dashboard base URL; snapshots are POSTed to `<url>/update_status`
    pub dashboard_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_db_path() -> String {
    "./data/fluxion_charge.db".to_owned()
}

fn default_tariff_url() -> String {
    octopus::DEFAULT_BASE_URL.to_owned()
}

fn default_product_code() -> String {
    "AGILE-24-10-01".to_owned()
}

fn default_tariff_code() -> String {
    "E-1R-AGILE-24-10-01-C".to_owned()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_forecast_url() -> String {
    open_meteo::DEFAULT_BASE_URL.to_owned()
}

fn default_graphql_url() -> String {
    saving_sessions::DEFAULT_GRAPHQL_URL.to_owned()
}

fn default_battery_url() -> String {
    netzero::DEFAULT_BASE_URL.to_owned()
}

fn default_simulated_soc() -> u8 {
    50
}

fn default_publish_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for TariffSettings {
    fn default() -> Self {
        Self {
            base_url: default_tariff_url(),
            product_code: default_product_code(),
            tariff_code: default_tariff_code(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_forecast_url(),
            array: None,
        }
    }
}

impl Default for SavingSessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            graphql_url: default_graphql_url(),
            api_key: None,
            account_number: String::new(),
        }
    }
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            base_url: default_battery_url(),
            site_id: String::new(),
            api_key: None,
            simulation: false,
            simulated_soc: default_simulated_soc(),
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            dashboard_url: None,
            api_key: None,
            timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Read the TOML file, taking API keys from the environment where the file has none
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content, |name| std::env::var(name).ok())
    }

    pub fn parse(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        let from_env = |name| env(name).filter(|key: &String| !key.is_empty());
        if config.battery.api_key.as_deref().is_none_or(str::is_empty) {
            config.battery.api_key = from_env(API_KEY_ENV);
        }
        if config.saving_sessions.api_key.as_deref().is_none_or(str::is_empty) {
            config.saving_sessions.api_key = from_env(OCTOPUS_API_KEY_ENV);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            bail!("database.path must be set");
        }
        self.planner.validate().context("Invalid [planner] section")?;
        self.executor.validate().context("Invalid [executor] section")?;
        self.policy.validate().context("Invalid [policy] section")?;

        if self.tariff.product_code.is_empty() || self.tariff.tariff_code.is_empty() {
            bail!("tariff.product_code and tariff.tariff_code must be set");
        }

        if !self.battery.simulation {
            if self.battery.site_id.is_empty() {
                bail!("battery.site_id must be set unless battery.simulation is enabled");
            }
            if self.battery.api_key.is_none() {
                bail!("battery.api_key must be set (or {API_KEY_ENV} exported) unless battery.simulation is enabled");
            }
        }
        if self.saving_sessions.enabled {
            if self.saving_sessions.account_number.is_empty() {
                bail!("saving_sessions.account_number must be set when saving_sessions.enabled");
            }
            if self.saving_sessions.api_key.is_none() {
                bail!("saving_sessions.api_key must be set (or {OCTOPUS_API_KEY_ENV} exported) when saving_sessions.enabled");
            }
        }
        if self.battery.simulated_soc > 100 {
            bail!("battery.simulated_soc must be between 0 and 100");
        }

        if self.forecast.enabled && self.forecast.array.is_none() {
            bail!("forecast.enabled requires a [forecast.array] section");
        }
        if let Some(array) = &self.forecast.array
            && (array.panel_count == 0 || array.panel_nominal_w <= 0.0)
        {
            bail!("forecast.array needs a positive panel_count and panel_nominal_w");
        }

        if self
            .status
            .dashboard_url
            .as_deref()
            .is_some_and(str::is_empty)
        {
            bail!("status.dashboard_url must not be empty when set");
        }
        Ok(())
    }
}
