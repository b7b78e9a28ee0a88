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

//! Scheduling core: the planner, the tick executor, the schedule store and the
//! primitives that tie them together.

pub mod commands;
pub mod error;
pub mod executor;
pub mod planner;
pub mod policy;
pub mod priority;
pub mod selection;
pub mod store;
pub mod sync;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use commands::ChargeCommands;
pub use error::{CommandError, ExternalError, PlanError, StoreError, StoreResult};
pub use executor::{Executor, IssuedCommand, TickReport};
pub use planner::Planner;
pub use policy::{LiveConditions, SafetyPolicy, SkipReason};
pub use priority::{compare_priority, select_winner};
pub use selection::{Candidate, SelectionParams, select_cheapest};
pub use store::{LATEST_SCHEMA_VERSION, ManualInsert, ScheduleStore, SqliteStore};
pub use sync::{InFlightGuard, InFlightSlot, RefreshSignal, StatusBoard};
pub use traits::{
    BatteryController, ExternalResult, ForecastSource, SavingSessionSource, StatusPublisher,
    TariffSource, bounded,
};
