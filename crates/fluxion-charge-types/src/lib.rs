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

pub mod config;
pub mod slot;
pub mod status;
pub mod telemetry;

// Re-export common types for convenience
pub use config::{ExecutorConfig, PeakWindow, PlannerConfig, PolicyConfig};
pub use slot::{ChargeMode, NewSlot, ScheduleSlot, SlotId, SlotOrigin, decision};
pub use status::{DecisionRecord, ExecutorState, ExecutorStatus, PlannerRun};
pub use telemetry::{BatteryTelemetry, ForecastPoint, PricePoint, SavingSession};
