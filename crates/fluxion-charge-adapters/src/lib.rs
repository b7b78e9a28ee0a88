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

//! HTTP adapters for the tariff, forecast, saving session, battery and dashboard collaborators.

pub mod dashboard;
pub mod errors;
mod http;
pub mod netzero;
pub mod octopus;
pub mod open_meteo;
pub mod saving_sessions;
pub mod simulated;

pub use dashboard::DashboardPublisher;
pub use errors::{AdapterError, AdapterResult};
pub use netzero::NetZeroController;
pub use octopus::OctopusAgileClient;
pub use open_meteo::{OpenMeteoForecast, PvArray};
pub use saving_sessions::OctopusSavingSessions;
pub use simulated::SimulatedController;
