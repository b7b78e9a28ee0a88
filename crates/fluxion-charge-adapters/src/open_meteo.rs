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

//! Solar generation forecast from Open-Meteo tilted irradiance.
//!
//! The API returns 15-minute global tilted irradiance for the array orientation. Each
//! sample is converted to array output with a linear model capped at the array maximum,
//! then summed into half-hour energy buckets aligned to the tariff grid.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_charge_core::{ExternalResult, ForecastSource};
use fluxion_charge_types::ForecastPoint;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AdapterError, AdapterResult};
use crate::http::{build_client, retry_request};

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

const IRRADIANCE_VAR: &str = "global_tilted_irradiance_instant";
const SAMPLE_HOURS: f64 = 0.25;
const BUCKET_SECS: i64 = 1800;

/// Location and electrical model of the PV array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvArray {
    pub latitude: f64,
    pub longitude: f64,
    /// Panel tilt in degrees from horizontal
    #[serde(default = "default_tilt")]
    pub tilt: f64,
    /// Degrees from south, negative towards east
    #[serde(default)]
    pub azimuth: f64,
    pub panel_count: u32,
    /// Rated output per panel at nominal irradiance (W)
    pub panel_nominal_w: f64,
    /// Hard output cap per panel (W)
    pub panel_max_w: f64,
    #[serde(default = "default_nominal_irradiance")]
    pub nominal_irradiance_w_m2: f64,
    #[serde(default = "default_derating")]
    pub derating: f64,
}

fn default_tilt() -> f64 {
    35.0
}

fn default_nominal_irradiance() -> f64 {
    1000.0
}

fn default_derating() -> f64 {
    0.85
}

impl PvArray {
    /// Array output in kW for a tilted irradiance sample in W/m²
    pub fn output_kw(&self, irradiance_w_m2: f64) -> f64 {
        let panels = f64::from(self.panel_count);
        let nominal_total = panels * self.panel_nominal_w;
        let max_total = panels * self.panel_max_w;
        let watts = nominal_total * (irradiance_w_m2.max(0.0) / self.nominal_irradiance_w_m2)
            * self.derating;
        watts.min(max_total) / 1000.0
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    minutely_15: Minutely15,
}

#[derive(Debug, Deserialize)]
struct Minutely15 {
    /// Unix seconds
    time: Vec<i64>,
    global_tilted_irradiance_instant: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct OpenMeteoForecast {
    base_url: String,
    array: PvArray,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenMeteoForecast {
    pub fn new(base_url: impl Into<String>, array: PvArray, timeout: Duration) -> AdapterResult<Self> {
        if array.nominal_irradiance_w_m2 <= 0.0 {
            return Err(AdapterError::Config(
                "nominal_irradiance_w_m2 must be positive".to_owned(),
            ));
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            array,
            client: build_client(timeout)?,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub async fn fetch_generation(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AdapterResult<Vec<ForecastPoint>> {
        let url = format!("{}/v1/forecast", self.base_url);
        let query = [
            ("latitude", self.array.latitude.to_string()),
            ("longitude", self.array.longitude.to_string()),
            ("minutely_15", IRRADIANCE_VAR.to_owned()),
            ("tilt", self.array.tilt.to_string()),
            ("azimuth", self.array.azimuth.to_string()),
            ("forecast_days", "2".to_owned()),
            ("timeformat", "unixtime".to_owned()),
            ("timezone", "GMT".to_owned()),
        ];
        let response = retry_request("open-meteo forecast", self.max_retries, self.retry_delay, || {
            self.client.get(&url).query(&query).send()
        })
        .await?;
        let forecast = response
            .json::<ForecastResponse>()
            .await
            .map_err(|e| AdapterError::Malformed(format!("Open-Meteo forecast: {e}")))?;

        let points = bucket_half_hours(&forecast.minutely_15, &self.array, from, to)?;
        info!(
            points = points.len(),
            total_kwh = points.iter().map(|p| p.forecast_kwh).sum::<f64>(),
            "☀️ Solar forecast fetched"
        );
        Ok(points)
    }
}

fn bucket_half_hours(
    samples: &Minutely15,
    array: &PvArray,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> AdapterResult<Vec<ForecastPoint>> {
    if samples.time.len() != samples.global_tilted_irradiance_instant.len() {
        return Err(AdapterError::Malformed(format!(
            "Open-Meteo returned {} timestamps and {} irradiance values",
            samples.time.len(),
            samples.global_tilted_irradiance_instant.len()
        )));
    }

    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for (ts, irradiance) in samples
        .time
        .iter()
        .zip(&samples.global_tilted_irradiance_instant)
    {
        let Some(irradiance) = irradiance else {
            debug!(ts, "Missing irradiance sample");
            continue;
        };
        let bucket = ts - ts.rem_euclid(BUCKET_SECS);
        *buckets.entry(bucket).or_insert(0.0) += array.output_kw(*irradiance) * SAMPLE_HOURS;
    }

    Ok(buckets
        .into_iter()
        .filter_map(|(bucket, kwh)| {
            let slot_start = DateTime::from_timestamp(bucket, 0)?;
            (slot_start >= from && slot_start < to).then_some(ForecastPoint {
                slot_start,
                forecast_kwh: kwh,
            })
        })
        .collect())
}

#[async_trait]
impl ForecastSource for OpenMeteoForecast {
    async fn generation(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<ForecastPoint>> {
        Ok(self.fetch_generation(from, to).await?)
    }

    fn name(&self) -> &str {
        "open-meteo"
    }
}
