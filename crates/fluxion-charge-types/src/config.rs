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
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ============= Planner Configuration =============

/// Slot selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// How many times per day the planner runs on its own
    #[serde(default = "default_runs_per_day")]
    pub runs_per_day: u32,

    /// Length of the planning horizon starting at the run instant
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,

    /// Number of slots selected per run
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    /// Width of one tariff slot
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,

    /// SoC requested for planner-selected slots
    #[serde(default = "default_target_soc")]
    pub target_soc: u8,

    /// Slots priced at or below this get `cheap_target_soc` instead
    #[serde(default)]
    pub cheap_price_threshold: Option<f64>,

    #[serde(default = "default_cheap_target_soc")]
    pub cheap_target_soc: u8,

    /// Pence subtracted from the slot price per forecast kWh
    #[serde(default = "default_solar_credit_factor")]
    pub solar_credit_factor: f64,

    /// The solar credit never pushes effective cost below this
    #[serde(default)]
    pub effective_cost_floor: f64,

    /// Upper bound for tariff and forecast calls
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
}

fn default_runs_per_day() -> u32 {
    3
}
fn default_horizon_hours() -> u32 {
    24
}
fn default_slot_count() -> usize {
    4
}
fn default_slot_minutes() -> u32 {
    30
}
fn default_target_soc() -> u8 {
    95
}
fn default_cheap_target_soc() -> u8 {
    100
}
fn default_solar_credit_factor() -> f64 {
    2.0
}
fn default_source_timeout_secs() -> u64 {
    15
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            runs_per_day: default_runs_per_day(),
            horizon_hours: default_horizon_hours(),
            slot_count: default_slot_count(),
            slot_minutes: default_slot_minutes(),
            target_soc: default_target_soc(),
            cheap_price_threshold: None,
            cheap_target_soc: default_cheap_target_soc(),
            solar_credit_factor: default_solar_credit_factor(),
            effective_cost_floor: 0.0,
            source_timeout_secs: default_source_timeout_secs(),
        }
    }
}

impl PlannerConfig {
    /// Target SoC for a slot with the given raw price
    pub fn target_soc_for(&self, price_p_per_kwh: f64) -> u8 {
        match self.cheap_price_threshold {
            Some(threshold) if price_p_per_kwh <= threshold => self.cheap_target_soc,
            _ => self.target_soc,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.runs_per_day == 0 {
            bail!("planner.runs_per_day must be at least 1");
        }
        if self.horizon_hours == 0 {
            bail!("planner.horizon_hours must be at least 1");
        }
        if self.slot_minutes == 0 {
            bail!("planner.slot_minutes must be at least 1");
        }
        if self.target_soc > 100 || self.cheap_target_soc > 100 {
            bail!("planner target SoC values must be within 0-100");
        }
        if self.solar_credit_factor < 0.0 {
            bail!("planner.solar_credit_factor must not be negative");
        }
        Ok(())
    }
}

// ============= Executor Configuration =============

/// Tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Failed attempts tolerated before a slot is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum delay between two attempts for the same slot
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Upper bound for every battery controller call
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// SoC reserve requested when charging stops
    #[serde(default = "default_reserve_soc")]
    pub reserve_soc: u8,

    /// Close a slot without charging when live SoC already meets its target
    #[serde(default = "default_true")]
    pub skip_when_soc_at_target: bool,
}

fn default_tick_interval_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_secs() -> u64 {
    60
}
fn default_command_timeout_secs() -> u64 {
    10
}
fn default_reserve_soc() -> u8 {
    20
}
fn default_true() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            reserve_soc: default_reserve_soc(),
            skip_when_soc_at_target: true,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            bail!("executor.tick_interval_secs must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            bail!("executor.command_timeout_secs must be at least 1");
        }
        if self.reserve_soc > 100 {
            bail!("executor.reserve_soc must be within 0-100");
        }
        Ok(())
    }
}

// ============= Safety Policy Configuration =============

/// Peak avoidance and price ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// IANA timezone the peak window is expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Local time of day, "HH:MM"
    #[serde(default = "default_peak_start")]
    pub peak_start: String,

    #[serde(default = "default_peak_end")]
    pub peak_end: String,

    /// Slots priced above this are never charged unless manual
    #[serde(default = "default_max_price")]
    pub max_price_p_per_kwh: Option<f64>,

    /// Forecast solar energy over a slot at which grid charging is skipped. None disables the check.
    #[serde(default)]
    pub solar_skip_kwh: Option<f64>,
}

fn default_timezone() -> String {
    "Europe/London".to_owned()
}
fn default_peak_start() -> String {
    "16:00".to_owned()
}
fn default_peak_end() -> String {
    "19:00".to_owned()
}
#[expect(clippy::unnecessary_wraps, reason = "serde default for an optional field")]
fn default_max_price() -> Option<f64> {
    Some(22.0)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            peak_start: default_peak_start(),
            peak_end: default_peak_end(),
            max_price_p_per_kwh: default_max_price(),
            solar_skip_kwh: None,
        }
    }
}

impl PolicyConfig {
    pub fn peak_window(&self) -> Result<PeakWindow> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid policy.timezone '{}': {e}", self.timezone))?;
        PeakWindow::parse(&self.peak_start, &self.peak_end, tz)
    }

    pub fn validate(&self) -> Result<()> {
        self.peak_window()?;
        if let Some(max) = self.max_price_p_per_kwh
            && !max.is_finite()
        {
            bail!("policy.max_price_p_per_kwh must be a finite number");
        }
        if let Some(kwh) = self.solar_skip_kwh
            && !(kwh.is_finite() && kwh > 0.0)
        {
            bail!("policy.solar_skip_kwh must be a positive number");
        }
        Ok(())
    }
}

// ============= Peak Window =============

/// Daily local time-of-day range excluded from automatic charging
///
/// `end` before `start` wraps past midnight. Equal bounds disable the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub tz: Tz,
}

impl PeakWindow {
    pub fn parse(start: &str, end: &str, tz: Tz) -> Result<Self> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
            tz,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.start == self.end
    }

    /// Whether any part of `[start, end)` falls inside the window on any local day
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if self.is_disabled() || start >= end {
            return false;
        }

        let first = start.with_timezone(&self.tz).date_naive();
        let last = end.with_timezone(&self.tz).date_naive();
        // A wrapping window that began the previous evening can cover `start`
        let mut day = first.pred_opt().unwrap_or(first);
        while day <= last {
            if let Some((window_start, window_end)) = self.window_on(day)
                && window_start < end
                && start < window_end
            {
                return true;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        false
    }

    fn window_on(&self, day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let end_day = if self.end < self.start {
            day.succ_opt()?
        } else {
            day
        };
        let window_start = self
            .tz
            .from_local_datetime(&day.and_time(self.start))
            .earliest()?
            .with_timezone(&Utc);
        let window_end = self
            .tz
            .from_local_datetime(&end_day.and_time(self.end))
            .latest()?
            .with_timezone(&Utc);
        Some((window_start, window_end))
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .with_context(|| format!("Invalid time of day '{value}', expected HH:MM"))
}
