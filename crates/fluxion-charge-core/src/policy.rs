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
use fluxion_charge_types::{
    BatteryTelemetry, PeakWindow, PolicyConfig, SavingSession, ScheduleSlot, decision,
};
use std::fmt;

/// Why a slot must not be charged right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OffGrid,
    SavingSession,
    PeakWindow,
    PriceCeiling,
    SolarSufficient,
}

impl SkipReason {
    /// Terminal decision tag, or None when the condition may clear later in the window
    pub fn decision(&self) -> Option<&'static str> {
        match self {
            Self::OffGrid => None,
            Self::SavingSession => Some(decision::CANCELLED_SAVING_SESSION),
            Self::PeakWindow => Some(decision::CANCELLED_PEAK_WINDOW),
            Self::PriceCeiling => Some(decision::CANCELLED_PRICE_CEILING),
            Self::SolarSufficient => Some(decision::CANCELLED_SOLAR_SUFFICIENT),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffGrid => write!(f, "site is off-grid"),
            Self::SavingSession => write!(f, "slot overlaps a saving session"),
            Self::PeakWindow => write!(f, "slot is inside the peak window"),
            Self::PriceCeiling => write!(f, "slot price is above the ceiling"),
            Self::SolarSufficient => write!(f, "forecast solar covers the slot"),
        }
    }
}

/// Inputs fetched from external sources right before a command is sent.
/// Whatever could not be fetched stays empty and never blocks a slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveConditions {
    /// Current tariff price for the slot, preferred over the price stored at planning time
    pub price_p_per_kwh: Option<f64>,
    pub saving_sessions: Vec<SavingSession>,
    /// Forecast solar energy over the slot window
    pub solar_kwh: Option<f64>,
}

/// Peak avoidance, price ceiling and off-grid protection
#[derive(Debug, Clone, Copy)]
pub struct SafetyPolicy {
    pub peak: PeakWindow,
    pub max_price_p_per_kwh: Option<f64>,
    pub solar_skip_kwh: Option<f64>,
}

impl SafetyPolicy {
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            peak: config.peak_window()?,
            max_price_p_per_kwh: config.max_price_p_per_kwh,
            solar_skip_kwh: config.solar_skip_kwh,
        })
    }

    pub fn in_peak(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.peak.overlaps(start, end)
    }

    pub fn above_ceiling(&self, price_p_per_kwh: f64) -> bool {
        self.max_price_p_per_kwh
            .is_some_and(|max| price_p_per_kwh > max)
    }

    pub fn solar_covers(&self, solar_kwh: Option<f64>) -> bool {
        self.solar_skip_kwh
            .zip(solar_kwh)
            .is_some_and(|(threshold, kwh)| kwh >= threshold)
    }

    /// Executor-side check for the winning slot.
    ///
    /// Off-grid and saving sessions block every slot. Manual override bypasses the peak
    /// window, the ceiling and the solar check; an unpriced slot never trips the ceiling.
    pub fn check(
        &self,
        slot: &ScheduleSlot,
        telemetry: &BatteryTelemetry,
        live: &LiveConditions,
    ) -> Option<SkipReason> {
        if telemetry.is_off_grid() {
            return Some(SkipReason::OffGrid);
        }
        if live
            .saving_sessions
            .iter()
            .any(|session| session.overlaps(slot.start_time, slot.end_time))
        {
            return Some(SkipReason::SavingSession);
        }
        if slot.manual_override {
            return None;
        }
        if self.in_peak(slot.start_time, slot.end_time) {
            return Some(SkipReason::PeakWindow);
        }
        if live
            .price_p_per_kwh
            .or(slot.price_p_per_kwh)
            .is_some_and(|price| self.above_ceiling(price))
        {
            return Some(SkipReason::PriceCeiling);
        }
        if self.solar_covers(live.solar_kwh) {
            return Some(SkipReason::SolarSufficient);
        }
        None
    }
}
