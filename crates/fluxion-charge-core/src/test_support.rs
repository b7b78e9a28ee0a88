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

//! Fake collaborators for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fluxion_charge_types::{
    BatteryTelemetry, ChargeMode, DecisionRecord, ExecutorStatus, ForecastPoint, NewSlot,
    PlannerRun, PolicyConfig, PricePoint, SavingSession, ScheduleSlot, SlotId,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{ExternalError, StoreError, StoreResult};
use crate::policy::SafetyPolicy;
use crate::store::{ManualInsert, ScheduleStore, SqliteStore};
use crate::traits::{
    BatteryController, ExternalResult, ForecastSource, SavingSessionSource, StatusPublisher,
    TariffSource,
};

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
}

pub fn utc_policy() -> SafetyPolicy {
    SafetyPolicy::from_config(&PolicyConfig {
        timezone: "UTC".to_owned(),
        ..PolicyConfig::default()
    })
    .unwrap()
}

pub fn half_hour_curve(start: DateTime<Utc>, prices: &[f64]) -> Vec<PricePoint> {
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| PricePoint {
            slot_start: start + Duration::minutes(30 * i64::try_from(i).unwrap()),
            price_p_per_kwh: *price,
        })
        .collect()
}

// ============= Tariff / Forecast =============

pub struct FakeTariff {
    pub response: Mutex<ExternalResult<Vec<PricePoint>>>,
    pub calls: AtomicUsize,
}

impl FakeTariff {
    pub fn with_curve(curve: Vec<PricePoint>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(curve)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Err(ExternalError::Transient("503 from tariff".to_owned()))),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TariffSource for FakeTariff {
    async fn price_curve(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ExternalResult<Vec<PricePoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().clone()
    }

    fn name(&self) -> &str {
        "fake-tariff"
    }
}

pub struct FakeForecast {
    pub response: ExternalResult<Vec<ForecastPoint>>,
}

#[async_trait]
impl ForecastSource for FakeForecast {
    async fn generation(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ExternalResult<Vec<ForecastPoint>> {
        self.response.clone()
    }

    fn name(&self) -> &str {
        "fake-forecast"
    }
}

pub struct FakeSavingSessions {
    pub response: ExternalResult<Vec<SavingSession>>,
}

#[async_trait]
impl SavingSessionSource for FakeSavingSessions {
    async fn sessions(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ExternalResult<Vec<SavingSession>> {
        self.response.clone()
    }

    fn name(&self) -> &str {
        "fake-saving-sessions"
    }
}

// ============= Battery Controller =============

/// Controller with scripted command outcomes. Commands succeed once the script runs out.
pub struct ScriptedController {
    pub telemetry: Mutex<ExternalResult<BatteryTelemetry>>,
    pub outcomes: Mutex<VecDeque<ExternalResult<()>>>,
    pub commands: Mutex<Vec<(u8, ChargeMode)>>,
}

impl ScriptedController {
    pub fn new(soc: u8) -> Arc<Self> {
        Arc::new(Self {
            telemetry: Mutex::new(Ok(BatteryTelemetry {
                soc,
                power_flow_kw: 0.0,
                grid_connected: true,
                solar_power_kw: None,
                read_at: at(0, 0),
            })),
            outcomes: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn push_outcome(&self, outcome: ExternalResult<()>) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn set_off_grid(&self, off_grid: bool) {
        if let Ok(telemetry) = self.telemetry.lock().as_mut() {
            telemetry.grid_connected = !off_grid;
        }
    }

    pub fn set_soc(&self, soc: u8) {
        if let Ok(telemetry) = self.telemetry.lock().as_mut() {
            telemetry.soc = soc;
        }
    }

    pub fn fail_telemetry(&self) {
        *self.telemetry.lock() = Err(ExternalError::Transient("connection reset".to_owned()));
    }

    pub fn commands(&self) -> Vec<(u8, ChargeMode)> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl BatteryController for ScriptedController {
    async fn read_status(&self) -> ExternalResult<BatteryTelemetry> {
        self.telemetry.lock().clone()
    }

    async fn set_target(&self, target_soc: u8, mode: ChargeMode) -> ExternalResult<()> {
        self.commands.lock().push((target_soc, mode));
        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }

    fn name(&self) -> &str {
        "scripted-controller"
    }
}

// ============= Status Publisher =============

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Arc<ExecutorStatus>>>,
}

impl RecordingPublisher {
    pub fn last(&self) -> Option<Arc<ExecutorStatus>> {
        self.published.lock().last().cloned()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, status: Arc<ExecutorStatus>) -> ExternalResult<()> {
        self.published.lock().push(status);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============= Store =============

/// SQLite store whose writes can be made to fail on demand
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_writes: AtomicBool,
    /// Report every finalize as already closed without touching the slot
    pub stale_finalize: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
            stale_finalize: AtomicBool::new(false),
        })
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("database or disk is full".to_owned()),
            )));
        }
        Ok(())
    }
}

impl ScheduleStore for FlakyStore {
    fn insert_slots(
        &self,
        slots: &[NewSlot],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleSlot>> {
        self.check()?;
        self.inner.insert_slots(slots, created_at)
    }

    fn insert_manual_slot(
        &self,
        slot: &NewSlot,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ManualInsert> {
        self.check()?;
        self.inner.insert_manual_slot(slot, created_at)
    }

    fn get_slot(&self, id: SlotId) -> StoreResult<Option<ScheduleSlot>> {
        self.inner.get_slot(id)
    }

    fn slots_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleSlot>> {
        self.inner.slots_in_window(from, to)
    }

    fn active_slots(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleSlot>> {
        self.inner.active_slots(now)
    }

    fn pending_slots(&self) -> StoreResult<Vec<ScheduleSlot>> {
        self.inner.pending_slots()
    }

    fn next_pending_after(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduleSlot>> {
        self.inner.next_pending_after(now)
    }

    fn finalize_slot(&self, id: SlotId, decision: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.check()?;
        if self.stale_finalize.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.finalize_slot(id, decision, at)
    }

    fn record_retry(&self, id: SlotId, at: DateTime<Utc>) -> StoreResult<Option<u32>> {
        self.check()?;
        self.inner.record_retry(id, at)
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<SlotId>> {
        self.check()?;
        self.inner.expire_overdue(now)
    }

    fn last_executed_without_hold(&self) -> StoreResult<Option<ScheduleSlot>> {
        self.inner.last_executed_without_hold()
    }

    fn delete_slot(&self, id: SlotId) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_slot(id)
    }

    fn record_decision(&self, record: &DecisionRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.record_decision(record)
    }

    fn recent_decisions(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
        self.inner.recent_decisions(limit)
    }

    fn record_planner_run(&self, run: &PlannerRun) -> StoreResult<()> {
        self.check()?;
        self.inner.record_planner_run(run)
    }

    fn last_planner_run(&self) -> StoreResult<Option<PlannerRun>> {
        self.inner.last_planner_run()
    }
}
