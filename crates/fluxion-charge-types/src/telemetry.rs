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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live battery state as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryTelemetry {
    /// State of charge, 0-100
    pub soc: u8,
    /// Positive while charging, negative while discharging
    pub power_flow_kw: f64,
    pub grid_connected: bool,
    #[serde(default)]
    pub solar_power_kw: Option<f64>,
    pub read_at: DateTime<Utc>,
}

impl BatteryTelemetry {
    pub fn is_off_grid(&self) -> bool {
        !self.grid_connected
    }
}

/// One point of the tariff curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub slot_start: DateTime<Utc>,
    pub price_p_per_kwh: f64,
}

/// Predicted solar generation for one slot of the tariff grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub slot_start: DateTime<Utc>,
    pub forecast_kwh: f64,
}

/// A demand-flexibility event during which the site is paid to avoid grid import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingSession {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SavingSession {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && self.start < end
    }
}
