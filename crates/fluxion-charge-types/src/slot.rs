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

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate identity of a persisted slot, assigned by the store
pub type SlotId = i64;

/// Outcome tags written to `ScheduleSlot::decision`
pub mod decision {
    pub const EXECUTED: &str = "executed";
    pub const FAILED: &str = "failed";
    pub const EXPIRED: &str = "expired";
    pub const CANCELLED_PEAK_WINDOW: &str = "cancelled:peak_window";
    pub const CANCELLED_PRICE_CEILING: &str = "cancelled:price_ceiling";
    pub const CANCELLED_TARGET_REACHED: &str = "cancelled:target_reached";
    pub const CANCELLED_SAVING_SESSION: &str = "cancelled:saving_session";
    pub const CANCELLED_SOLAR_SUFFICIENT: &str = "cancelled:solar_sufficient";
    pub const HOLD: &str = "hold";
}

// ============= Slot Origin =============

/// Who created a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotOrigin {
    /// Selected by the planner from the tariff curve
    Scheduler,
    /// Created directly by a user
    Manual,
}

impl SlotOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for SlotOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotOrigin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduler" => Ok(Self::Scheduler),
            "manual" => Ok(Self::Manual),
            _ => Err(anyhow::anyhow!("Unknown slot origin: '{s}'")),
        }
    }
}

// ============= Charge Mode =============

/// Command mode sent to the battery controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChargeMode {
    /// Charge from the grid up to the target SoC
    Charge,
    /// Stop grid charging and hold the given reserve
    Hold,
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => write!(f, "Charge"),
            Self::Hold => write!(f, "Hold"),
        }
    }
}

// ============= Schedule Slot =============

/// A half-open interval `[start_time, end_time)` during which the battery is managed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: SlotId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub origin: SlotOrigin,
    pub target_soc: u8,
    /// Raw tariff price in p/kWh, absent for unpriced manual slots
    pub price_p_per_kwh: Option<f64>,
    pub executed: bool,
    pub expired: bool,
    pub decision: Option<String>,
    pub decision_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_retry_utc: Option<DateTime<Utc>>,
    pub manual_override: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleSlot {
    /// Whether `now` falls inside the slot window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// Neither executed nor expired
    pub fn is_pending(&self) -> bool {
        !self.executed && !self.expired
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// A slot that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub origin: SlotOrigin,
    pub target_soc: u8,
    pub price_p_per_kwh: Option<f64>,
    pub manual_override: bool,
}

impl NewSlot {
    /// Planner-selected slot
    pub fn scheduled(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        target_soc: u8,
        price_p_per_kwh: f64,
    ) -> Self {
        Self {
            start_time,
            end_time,
            origin: SlotOrigin::Scheduler,
            target_soc,
            price_p_per_kwh: Some(price_p_per_kwh),
            manual_override: false,
        }
    }

    /// User-created slot, always honored over safety policy
    pub fn manual(start_time: DateTime<Utc>, end_time: DateTime<Utc>, target_soc: u8) -> Self {
        Self {
            start_time,
            end_time,
            origin: SlotOrigin::Manual,
            target_soc,
            price_p_per_kwh: None,
            manual_override: true,
        }
    }
}
