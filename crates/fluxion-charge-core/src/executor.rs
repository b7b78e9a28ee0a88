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

//! Reconciliation loop between wall-clock time and the persisted schedule.
//!
//! Every tick:
//! 1. read battery telemetry (on failure nothing else happens this tick)
//! 2. detect off-grid, which suppresses every command
//! 3. pick the winning pending slot whose window contains now
//! 4. fetch live conditions for the winner (current price, saving sessions, solar
//!    forecast), apply the safety policy and send at most one command
//! 5. record success as `executed`
//! 6. record a failed attempt, closing the slot as `failed` once the retry budget is spent
//! 7. expire pending slots whose window has passed
//! 8. publish a fresh status snapshot
//!
//! A tick is idempotent against persisted state: executed slots are never candidates
//! again, so restarting the process simply resumes ticking. The first tick picks up a
//! charge left running by a previous process so that its hold is still sent.

use chrono::{DateTime, Utc};
use fluxion_charge_types::{
    BatteryTelemetry, ChargeMode, DecisionRecord, ExecutorConfig, ExecutorState, ExecutorStatus,
    ScheduleSlot, SlotId, decision,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::policy::{LiveConditions, SafetyPolicy};
use crate::priority::select_winner;
use crate::store::ScheduleStore;
use crate::sync::{InFlightSlot, RefreshSignal};
use crate::traits::{
    BatteryController, ForecastSource, SavingSessionSource, StatusPublisher, TariffSource,
    bounded,
};

/// A command that went out to the battery controller during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    /// None for the hold command sent after a window closes
    pub slot_id: Option<SlotId>,
    pub target_soc: u8,
    pub mode: ChargeMode,
    pub succeeded: bool,
}

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub telemetry_ok: bool,
    pub command: Option<IssuedCommand>,
    pub expired: Vec<SlotId>,
    pub state: ExecutorState,
}

/// Mutable state assembled while a tick runs
struct TickState {
    state: ExecutorState,
    message: String,
    active: Option<SlotId>,
    command: Option<IssuedCommand>,
    errors: Vec<String>,
}

pub struct Executor {
    store: Arc<dyn ScheduleStore>,
    controller: Arc<dyn BatteryController>,
    publishers: Vec<Arc<dyn StatusPublisher>>,
    tariff: Option<Arc<dyn TariffSource>>,
    forecast: Option<Arc<dyn ForecastSource>>,
    saving_sessions: Option<Arc<dyn SavingSessionSource>>,
    policy: SafetyPolicy,
    config: ExecutorConfig,
    in_flight: InFlightSlot,
    status: Arc<ExecutorStatus>,
    /// Set once the store has been checked for a charge left by a previous process
    resumed: bool,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("controller", &self.controller.name())
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        controller: Arc<dyn BatteryController>,
        policy: SafetyPolicy,
        config: ExecutorConfig,
        in_flight: InFlightSlot,
    ) -> Self {
        Self {
            store,
            controller,
            publishers: Vec::new(),
            tariff: None,
            forecast: None,
            saving_sessions: None,
            policy,
            config,
            in_flight,
            status: Arc::new(ExecutorStatus::starting(Utc::now())),
            resumed: false,
        }
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn StatusPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Re-check the current price of a slot before charging it
    #[must_use]
    pub fn with_tariff(mut self, tariff: Arc<dyn TariffSource>) -> Self {
        self.tariff = Some(tariff);
        self
    }

    /// Skip grid charging when forecast solar covers the slot
    #[must_use]
    pub fn with_forecast(mut self, forecast: Arc<dyn ForecastSource>) -> Self {
        self.forecast = Some(forecast);
        self
    }

    #[must_use]
    pub fn with_saving_sessions(mut self, source: Arc<dyn SavingSessionSource>) -> Self {
        self.saving_sessions = Some(source);
        self
    }

    /// Override the process start instant used for uptime
    #[must_use]
    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.status = Arc::new(ExecutorStatus::starting(started_at));
        self
    }

    pub fn status(&self) -> Arc<ExecutorStatus> {
        Arc::clone(&self.status)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    /// Run one reconciliation pass against `now`
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        // Step 1: telemetry gates everything else
        let telemetry = match bounded(
            "battery status read",
            self.command_timeout(),
            self.controller.read_status(),
        )
        .await
        {
            Ok(telemetry) => telemetry,
            Err(e) => {
                warn!(error = %e, controller = self.controller.name(), "Telemetry read failed, skipping tick");
                let mut status = (*self.status).clone();
                status.last_error = Some(format!("Telemetry unavailable: {e}"));
                let state = status.state;
                self.publish(status).await;
                return TickReport {
                    telemetry_ok: false,
                    command: None,
                    expired: Vec::new(),
                    state,
                };
            }
        };

        let mut tick = TickState {
            state: ExecutorState::Idle,
            message: "Idle".to_owned(),
            active: self.status.active_slot_id,
            command: None,
            errors: Vec::new(),
        };
        if !self.resumed {
            tick.active = tick.active.or(self.resume_active());
        }

        // Steps 2-3
        let candidates = match self.store.active_slots(now) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to query active slots");
                tick.errors.push(format!("Schedule query failed: {e}"));
                Vec::new()
            }
        };
        if candidates.len() > 1 {
            debug!(
                candidates = ?candidates.iter().map(|s| s.id).collect::<Vec<_>>(),
                "Overlapping slots, resolving by priority"
            );
        }
        let winner = select_winner(&candidates).cloned();

        // Steps 4-6
        if telemetry.is_off_grid() {
            tick.state = ExecutorState::OffGrid;
            tick.message = match &winner {
                Some(slot) => format!("Off-grid, slot {} on hold", slot.id),
                None => "Off-grid".to_owned(),
            };
            warn!(soc = telemetry.soc, "Site is off-grid, commands suppressed");
        } else {
            match winner {
                Some(slot) if tick.active == Some(slot.id) => {
                    tick.state = ExecutorState::Charging;
                    tick.message = format!("Charging slot {}", slot.id);
                }
                Some(slot) => self.drive(&slot, &telemetry, now, &mut tick).await,
                None => self.settle_active(&telemetry, now, &mut tick).await,
            }
        }

        // Step 7
        let expired = match self.store.expire_overdue(now) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to expire overdue slots");
                tick.errors.push(format!("Expiry failed: {e}"));
                Vec::new()
            }
        };
        for id in &expired {
            info!(slot_id = id, "⌛ Slot expired without executing");
            self.audit(
                DecisionRecord::new(Some(*id), decision::EXPIRED, "window passed", Some(&telemetry), None, now),
            );
        }

        // Step 8
        let status = self.build_status(&tick, telemetry, now);
        self.publish(status).await;

        TickReport {
            telemetry_ok: true,
            command: tick.command,
            expired,
            state: tick.state,
        }
    }

    /// Steps 4-6 for a winning slot that is not yet executed
    async fn drive(
        &self,
        slot: &ScheduleSlot,
        telemetry: &BatteryTelemetry,
        now: DateTime<Utc>,
        tick: &mut TickState,
    ) {
        if let Some(last_retry) = slot.last_retry_utc {
            let backoff = chrono::Duration::seconds(
                i64::try_from(self.config.retry_backoff_secs).unwrap_or(i64::MAX),
            );
            if now < last_retry + backoff {
                tick.state = ExecutorState::Retrying;
                tick.message = format!(
                    "Retrying slot {} (attempt {} failed)",
                    slot.id, slot.retry_count
                );
                return;
            }
        }

        let live = self.live_conditions(slot).await;
        let price = live.price_p_per_kwh.or(slot.price_p_per_kwh);

        if let Some(reason) = self.policy.check(slot, telemetry, &live) {
            // Off-grid is handled before we get here, so every reason left is terminal
            if let Some(tag) = reason.decision() {
                info!(slot_id = slot.id, %reason, price = ?price, "🚫 Slot cancelled by safety policy");
                self.close(slot, tag, &reason.to_string(), telemetry, price, now, tick);
                tick.message = format!("Skipped slot {}: {reason}", slot.id);
            }
            return;
        }

        if self.config.skip_when_soc_at_target && telemetry.soc >= slot.target_soc {
            info!(
                slot_id = slot.id,
                soc = telemetry.soc,
                target_soc = slot.target_soc,
                "Battery already at target, slot not needed"
            );
            self.close(
                slot,
                decision::CANCELLED_TARGET_REACHED,
                "state of charge already at target",
                telemetry,
                price,
                now,
                tick,
            );
            tick.message = format!("Slot {} skipped, battery at {}%", slot.id, telemetry.soc);
            return;
        }

        let _in_flight = self.in_flight.begin(slot.id);
        // The slot may have been deleted between the query and the marker
        match self.store.get_slot(slot.id) {
            Ok(Some(current)) if current.is_pending() => {}
            Ok(_) => {
                info!(slot_id = slot.id, "Slot removed before command, skipping");
                return;
            }
            Err(e) => {
                error!(error = %e, slot_id = slot.id, "Failed to re-read slot before command");
                tick.errors.push(format!("Schedule read failed: {e}"));
                return;
            }
        }

        let result = bounded(
            "set target",
            self.command_timeout(),
            self.controller
                .set_target(slot.target_soc, ChargeMode::Charge),
        )
        .await;
        tick.command = Some(IssuedCommand {
            slot_id: Some(slot.id),
            target_soc: slot.target_soc,
            mode: ChargeMode::Charge,
            succeeded: result.is_ok(),
        });

        match result {
            Ok(()) => match self.store.finalize_slot(slot.id, decision::EXECUTED, now) {
                Ok(true) => {
                    info!(
                        slot_id = slot.id,
                        target_soc = slot.target_soc,
                        start = %slot.start_time,
                        end = %slot.end_time,
                        "⚡ Charge command accepted"
                    );
                    tick.active = Some(slot.id);
                    tick.state = ExecutorState::Charging;
                    tick.message = format!(
                        "Charging slot {} to {}% until {}",
                        slot.id,
                        slot.target_soc,
                        slot.end_time.format("%H:%M")
                    );
                    self.audit(DecisionRecord::new(
                        Some(slot.id),
                        decision::EXECUTED,
                        format!("charge to {}%", slot.target_soc),
                        Some(telemetry),
                        price,
                        now,
                    ));
                }
                Ok(false) => {
                    warn!(slot_id = slot.id, "Slot was closed while the command was in flight");
                }
                Err(e) => {
                    // Left pending on purpose: the command is resent next tick
                    error!(error = %e, slot_id = slot.id, "Failed to record executed slot");
                    tick.errors.push(format!("Failed to record slot {}: {e}", slot.id));
                }
            },
            Err(e) if e.is_transient() => match self.store.record_retry(slot.id, now) {
                Ok(Some(attempts)) if attempts > self.config.max_retries => {
                    error!(
                        slot_id = slot.id,
                        attempts,
                        error = %e,
                        "Retry budget exhausted, giving up on slot"
                    );
                    self.close(slot, decision::FAILED, &e.to_string(), telemetry, price, now, tick);
                    tick.errors.push(format!(
                        "Slot {} failed after {attempts} attempts: {e}",
                        slot.id
                    ));
                    tick.message = format!("Slot {} failed", slot.id);
                }
                Ok(Some(attempts)) => {
                    warn!(slot_id = slot.id, attempts, error = %e, "Charge command failed, will retry");
                    tick.state = ExecutorState::Retrying;
                    tick.message = format!("Retrying slot {} (attempt {attempts} failed)", slot.id);
                    tick.errors.push(format!("Charge command failed: {e}"));
                }
                Ok(None) => {
                    warn!(slot_id = slot.id, "Slot closed before the failed attempt was recorded");
                }
                Err(store_err) => {
                    error!(error = %store_err, slot_id = slot.id, "Failed to record retry");
                    tick.errors.push(format!("Failed to record retry for slot {}: {store_err}", slot.id));
                }
            },
            Err(e) => {
                error!(slot_id = slot.id, error = %e, "Charge command rejected, not retrying");
                self.close(slot, decision::FAILED, &e.to_string(), telemetry, price, now, tick);
                tick.errors.push(format!("Slot {} failed: {e}", slot.id));
                tick.message = format!("Slot {} failed", slot.id);
            }
        }
    }

    /// Fetch the optional execution-time inputs for `slot`. A failed source is logged
    /// and left empty so the slot proceeds.
    async fn live_conditions(&self, slot: &ScheduleSlot) -> LiveConditions {
        let mut live = LiveConditions::default();
        let timeout = self.command_timeout();

        if let Some(source) = &self.saving_sessions {
            match bounded(
                "saving session lookup",
                timeout,
                source.sessions(slot.start_time, slot.end_time),
            )
            .await
            {
                Ok(sessions) => live.saving_sessions = sessions,
                Err(e) => {
                    warn!(error = %e, source = source.name(), "Saving session check failed, proceeding without it");
                }
            }
        }

        // Manual slots bypass the price and solar checks
        if slot.manual_override {
            return live;
        }

        if let Some(tariff) = &self.tariff
            && self.policy.max_price_p_per_kwh.is_some()
        {
            match bounded(
                "live price lookup",
                timeout,
                tariff.price_curve(slot.start_time, slot.end_time),
            )
            .await
            {
                Ok(curve) => {
                    live.price_p_per_kwh = curve
                        .iter()
                        .find(|point| point.slot_start == slot.start_time)
                        .map(|point| point.price_p_per_kwh);
                    debug!(
                        slot_id = slot.id,
                        stored = ?slot.price_p_per_kwh,
                        live = ?live.price_p_per_kwh,
                        "Live price for slot"
                    );
                }
                Err(e) => {
                    warn!(error = %e, source = tariff.name(), "Live price unavailable, using stored price");
                }
            }
        }

        if let Some(forecast) = &self.forecast
            && self.policy.solar_skip_kwh.is_some()
        {
            match bounded(
                "solar forecast lookup",
                timeout,
                forecast.generation(slot.start_time, slot.end_time),
            )
            .await
            {
                Ok(points) if !points.is_empty() => {
                    live.solar_kwh = Some(points.iter().map(|p| p.forecast_kwh.max(0.0)).sum());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, source = forecast.name(), "Solar forecast unavailable, charging from grid");
                }
            }
        }

        live
    }

    /// Look up a charge that a previous process started and never stopped
    fn resume_active(&mut self) -> Option<SlotId> {
        match self.store.last_executed_without_hold() {
            Ok(slot) => {
                self.resumed = true;
                slot.map(|slot| {
                    info!(
                        slot_id = slot.id,
                        end = %slot.end_time,
                        "Resuming charge slot from previous run"
                    );
                    slot.id
                })
            }
            Err(e) => {
                warn!(error = %e, "Failed to look up charge from previous run");
                None
            }
        }
    }

    /// No winner this tick: stop charging once the previously active slot has ended
    async fn settle_active(
        &self,
        telemetry: &BatteryTelemetry,
        now: DateTime<Utc>,
        tick: &mut TickState,
    ) {
        let Some(active_id) = tick.active else {
            return;
        };

        let window_closed = match self.store.get_slot(active_id) {
            Ok(Some(slot)) => now >= slot.end_time,
            Ok(None) => true,
            Err(e) => {
                error!(error = %e, slot_id = active_id, "Failed to read active slot");
                tick.errors.push(format!("Schedule read failed: {e}"));
                false
            }
        };

        if !window_closed {
            tick.state = ExecutorState::Charging;
            tick.message = format!("Charging slot {active_id}");
            return;
        }

        let reserve = self.config.reserve_soc;
        let result = bounded(
            "hold",
            self.command_timeout(),
            self.controller.set_target(reserve, ChargeMode::Hold),
        )
        .await;
        tick.command = Some(IssuedCommand {
            slot_id: None,
            target_soc: reserve,
            mode: ChargeMode::Hold,
            succeeded: result.is_ok(),
        });

        match result {
            Ok(()) => {
                info!(slot_id = active_id, reserve_soc = reserve, "🔋 Charging window closed, holding reserve");
                tick.active = None;
                tick.message = format!("Holding at {reserve}% reserve");
                self.audit(DecisionRecord::new(
                    Some(active_id),
                    decision::HOLD,
                    "charging window closed",
                    Some(telemetry),
                    None,
                    now,
                ));
            }
            Err(e) => {
                // Active slot is kept so the hold is retried next tick
                warn!(error = %e, slot_id = active_id, "Hold command failed");
                tick.errors.push(format!("Hold command failed: {e}"));
                tick.state = ExecutorState::Retrying;
                tick.message = "Retrying hold command".to_owned();
            }
        }
    }

    /// Close a slot terminally and audit it
    #[expect(clippy::too_many_arguments, reason = "one call per terminal decision")]
    fn close(
        &self,
        slot: &ScheduleSlot,
        tag: &str,
        reason: &str,
        telemetry: &BatteryTelemetry,
        price: Option<f64>,
        now: DateTime<Utc>,
        tick: &mut TickState,
    ) {
        match self.store.finalize_slot(slot.id, tag, now) {
            Ok(true) => self.audit(DecisionRecord::new(
                Some(slot.id),
                tag,
                reason,
                Some(telemetry),
                price,
                now,
            )),
            Ok(false) => {
                debug!(slot_id = slot.id, decision = tag, "Slot already closed, nothing recorded");
            }
            Err(e) => {
                error!(error = %e, slot_id = slot.id, decision = tag, "Failed to close slot");
                tick.errors.push(format!("Failed to close slot {}: {e}", slot.id));
            }
        }
    }

    fn audit(&self, record: DecisionRecord) {
        if let Err(e) = self.store.record_decision(&record) {
            warn!(error = %e, action = %record.action, "Failed to write decision log");
        }
    }

    fn build_status(
        &self,
        tick: &TickState,
        telemetry: BatteryTelemetry,
        now: DateTime<Utc>,
    ) -> ExecutorStatus {
        let next_slot_start = self
            .store
            .next_pending_after(now)
            .inspect_err(|e| warn!(error = %e, "Failed to look up next slot"))
            .ok()
            .flatten()
            .map(|slot| slot.start_time);
        let last_planner_run = self
            .store
            .last_planner_run()
            .inspect_err(|e| warn!(error = %e, "Failed to look up last planner run"))
            .ok()
            .flatten()
            .map(|run| run.ran_at);

        let message = if tick.state == ExecutorState::Idle && tick.active.is_none() {
            match next_slot_start {
                Some(start) => format!("{}, next slot at {}", tick.message, start.format("%H:%M")),
                None => format!("{}, nothing scheduled", tick.message),
            }
        } else {
            tick.message.clone()
        };

        ExecutorStatus {
            message,
            state: tick.state,
            next_slot_start,
            last_planner_run,
            active_slot_id: tick.active,
            started_at: self.status.started_at,
            uptime_secs: (now - self.status.started_at).num_seconds().max(0),
            telemetry: Some(telemetry),
            last_error: (!tick.errors.is_empty()).then(|| tick.errors.join("; ")),
            updated_at: now,
        }
    }

    async fn publish(&mut self, status: ExecutorStatus) {
        let snapshot = Arc::new(status);
        self.status = Arc::clone(&snapshot);
        for publisher in &self.publishers {
            if let Err(e) = bounded(
                "status publish",
                self.command_timeout(),
                publisher.publish(Arc::clone(&snapshot)),
            )
            .await
            {
                warn!(error = %e, publisher = publisher.name(), "Failed to publish status");
            }
        }
    }

    /// Send a final hold if a slot is still being driven
    pub async fn shutdown_hold(&self) -> Option<IssuedCommand> {
        let active_id = self.status.active_slot_id?;
        let reserve = self.config.reserve_soc;
        let result = bounded(
            "shutdown hold",
            self.command_timeout(),
            self.controller.set_target(reserve, ChargeMode::Hold),
        )
        .await;
        match &result {
            Ok(()) => {
                info!(slot_id = active_id, reserve_soc = reserve, "Charging stopped for shutdown");
                self.audit(DecisionRecord::new(
                    Some(active_id),
                    decision::HOLD,
                    "shutdown",
                    self.status.telemetry.as_ref(),
                    None,
                    Utc::now(),
                ));
            }
            Err(e) => error!(error = %e, slot_id = active_id, "Failed to stop charging on shutdown"),
        }
        Some(IssuedCommand {
            slot_id: Some(active_id),
            target_soc: reserve,
            mode: ChargeMode::Hold,
            succeeded: result.is_ok(),
        })
    }

    /// Tick until `shutdown` flips to true. Each wait lasts one tick interval unless
    /// `wake` fires first.
    pub async fn run(mut self, wake: RefreshSignal, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_secs);
        info!(
            interval_secs = self.config.tick_interval_secs,
            controller = self.controller.name(),
            max_retries = self.config.max_retries,
            "Executor loop started"
        );

        loop {
            let report = self.tick_at(Utc::now()).await;
            debug!(state = %report.state, command = ?report.command, expired = report.expired.len(), "Tick complete");

            tokio::select! {
                woken = wake.wait(interval) => {
                    if woken {
                        debug!("Executor woken by schedule change");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, executor loop stopping");
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                info!("Executor loop stopping");
                break;
            }
        }

        self.shutdown_hold().await;
    }
}
