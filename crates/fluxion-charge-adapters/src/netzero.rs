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

//! NetZero battery controller client.
//!
//! Charging is driven through two settings on the site config endpoint: the backup
//! reserve percentage and the grid charging flag. A charge command raises the reserve to
//! the slot target with grid charging on; a hold drops it back to the resting reserve
//! with grid charging off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_charge_core::{BatteryController, ExternalResult};
use fluxion_charge_types::{BatteryTelemetry, ChargeMode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AdapterError, AdapterResult};
use crate::http::{build_client, check_status};

pub const DEFAULT_BASE_URL: &str = "https://api.netzero.energy";

#[derive(Debug, Deserialize)]
struct SiteConfig {
    percentage_charged: Option<f64>,
    island_status: Option<String>,
    #[serde(default)]
    live_status: Option<LiveStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct LiveStatus {
    percentage_charged: Option<f64>,
    island_status: Option<String>,
    /// Watts, positive while discharging
    battery_power: Option<f64>,
    /// Watts
    solar_power: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ChargeSettings {
    backup_reserve_percent: u8,
    grid_charging: bool,
}

#[derive(Clone)]
pub struct NetZeroController {
    base_url: String,
    site_id: String,
    api_key: String,
    client: Client,
}

impl std::fmt::Debug for NetZeroController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetZeroController")
            .field("base_url", &self.base_url)
            .field("site_id", &self.site_id)
            .finish_non_exhaustive()
    }
}

impl NetZeroController {
    pub fn new(
        base_url: impl Into<String>,
        site_id: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        let site_id = site_id.into();
        let api_key = api_key.into();
        if site_id.is_empty() {
            return Err(AdapterError::Config("NetZero site id is required".to_owned()));
        }
        if api_key.is_empty() {
            return Err(AdapterError::Config("NetZero API key is required".to_owned()));
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            site_id,
            api_key,
            client: build_client(timeout)?,
        })
    }

    fn config_url(&self) -> String {
        format!("{}/api/v1/{}/config", self.base_url, self.site_id)
    }

    pub async fn fetch_telemetry(&self) -> AdapterResult<BatteryTelemetry> {
        let response = self
            .client
            .get(self.config_url())
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let config = check_status(response)
            .await?
            .json::<SiteConfig>()
            .await
            .map_err(|e| AdapterError::Malformed(format!("NetZero config: {e}")))?;

        let telemetry = telemetry_from(config, Utc::now())?;
        debug!(
            soc = telemetry.soc,
            power_flow_kw = telemetry.power_flow_kw,
            grid_connected = telemetry.grid_connected,
            "NetZero status"
        );
        Ok(telemetry)
    }

    pub async fn apply(&self, target_soc: u8, mode: ChargeMode) -> AdapterResult<()> {
        let settings = ChargeSettings {
            backup_reserve_percent: target_soc.min(100),
            grid_charging: mode == ChargeMode::Charge,
        };
        let response = self
            .client
            .post(self.config_url())
            .bearer_auth(&self.api_key)
            .json(&settings)
            .send()
            .await?;
        check_status(response).await?;

        info!(
            reserve = settings.backup_reserve_percent,
            grid_charging = settings.grid_charging,
            "🔌 NetZero settings applied"
        );
        Ok(())
    }
}

fn telemetry_from(config: SiteConfig, read_at: DateTime<Utc>) -> AdapterResult<BatteryTelemetry> {
    let live = config.live_status.unwrap_or_default();

    let percentage = live
        .percentage_charged
        .or(config.percentage_charged)
        .ok_or_else(|| AdapterError::Malformed("NetZero status has no state of charge".to_owned()))?;
    if !percentage.is_finite() {
        return Err(AdapterError::Malformed(format!(
            "NetZero state of charge {percentage} is not a number"
        )));
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "clamped to 0..=100"
    )]
    let soc = percentage.round().clamp(0.0, 100.0) as u8;

    let island = live
        .island_status
        .or(config.island_status)
        .unwrap_or_default();

    Ok(BatteryTelemetry {
        soc,
        power_flow_kw: live.battery_power.unwrap_or(0.0) / 1000.0,
        grid_connected: !island.to_lowercase().starts_with("off_grid"),
        solar_power_kw: live.solar_power.map(|w| w / 1000.0),
        read_at: live.timestamp.unwrap_or(read_at),
    })
}

#[async_trait]
impl BatteryController for NetZeroController {
    async fn read_status(&self) -> ExternalResult<BatteryTelemetry> {
        Ok(self.fetch_telemetry().await?)
    }

    async fn set_target(&self, target_soc: u8, mode: ChargeMode) -> ExternalResult<()> {
        Ok(self.apply(target_soc, mode).await?)
    }

    fn name(&self) -> &str {
        "netzero"
    }
}
