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

use crate::slot::SlotId;
use crate::telemetry::BatteryTelemetry;

// ============= Executor Status =============

/// Coarse executor state shown to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// No slot is being driven
    #[default]
    Idle,
    /// A slot was accepted by the controller and its window is open
    Charging,
    /// The last command failed, waiting for backoff before resending
    Retrying,
    /// Site reported off-grid, commands suppressed
    OffGrid,
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Charging => write!(f, "Charging"),
            Self::Retrying => write!(f, "Retrying"),
            Self::OffGrid => write!(f, "Off-Grid"),
        }
    }
}

/// Immutable snapshot published by the executor after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub message: String,
    pub state: ExecutorState,
    pub next_slot_start: Option<DateTime<Utc>>,
    pub last_planner_run: Option<DateTime<Utc>>,
    pub active_slot_id: Option<SlotId>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub telemetry: Option<BatteryTelemetry>,
    /// Set when the last tick hit an error, cleared by the next clean tick
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutorStatus {
    /// Status before the first tick has run
    pub fn starting(now: DateTime<Utc>) -> Self {
        Self {
            message: "Starting".to_owned(),
            state: ExecutorState::Idle,
            next_slot_start: None,
            last_planner_run: None,
            active_slot_id: None,
            started_at: now,
            uptime_secs: 0,
            telemetry: None,
            last_error: None,
            updated_at: now,
        }
    }
}

// ============= Audit Records =============

/// One entry of the decision audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Absent for commands not tied to a slot
    pub slot_id: Option<SlotId>,
    pub action: String,
    pub reason: String,
    pub soc: Option<u8>,
    pub power_flow_kw: Option<f64>,
    pub grid_connected: Option<bool>,
    pub price_p_per_kwh: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        slot_id: Option<SlotId>,
        action: &str,
        reason: impl Into<String>,
        telemetry: Option<&BatteryTelemetry>,
        price_p_per_kwh: Option<f64>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            slot_id,
            action: action.to_owned(),
            reason: reason.into(),
            soc: telemetry.map(|t| t.soc),
            power_flow_kw: telemetry.map(|t| t.power_flow_kw),
            grid_connected: telemetry.map(|t| t.grid_connected),
            price_p_per_kwh,
            recorded_at,
        }
    }
}

/// Bookkeeping for one planner run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerRun {
    pub ran_at: DateTime<Utc>,
    pub horizon_start: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
    pub requested: u32,
    pub inserted: u32,
    pub succeeded: bool,
    pub detail: Option<String>,
}
