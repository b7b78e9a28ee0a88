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
use fluxion_charge_types::{NewSlot, PlannerConfig, PlannerRun, ScheduleSlot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::PlanError;
use crate::policy::SafetyPolicy;
use crate::selection::{SelectionParams, forecast_by_slot, select_cheapest};
use crate::store::ScheduleStore;
use crate::sync::RefreshSignal;
use crate::traits::{ForecastSource, TariffSource, bounded};

/// Turns the tariff curve into scheduler slots
pub struct Planner {
    store: Arc<dyn ScheduleStore>,
    tariff: Arc<dyn TariffSource>,
    forecast: Option<Arc<dyn ForecastSource>>,
    policy: SafetyPolicy,
    config: PlannerConfig,
    executor_wake: RefreshSignal,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("tariff", &self.tariff.name())
            .field("forecast", &self.forecast.as_ref().map(|f| f.name().to_owned()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Planner {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        tariff: Arc<dyn TariffSource>,
        policy: SafetyPolicy,
        config: PlannerConfig,
        executor_wake: RefreshSignal,
    ) -> Self {
        Self {
            store,
            tariff,
            forecast: None,
            policy,
            config,
            executor_wake,
        }
    }

    #[must_use]
    pub fn with_forecast(mut self, forecast: Arc<dyn ForecastSource>) -> Self {
        self.forecast = Some(forecast);
        self
    }

    /// Select and persist the `count` cheapest eligible slots in `[horizon_start, horizon_end)`.
    ///
    /// All-or-nothing: a tariff failure or a failed batch insert leaves the store untouched.
    /// Returns only newly created slots; slots already on the schedule are skipped.
    pub async fn plan(
        &self,
        horizon_start: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<ScheduleSlot>, PlanError> {
        self.plan_at(horizon_start, horizon_end, count, Utc::now())
            .await
    }

    async fn plan_at(
        &self,
        horizon_start: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleSlot>, PlanError> {
        if horizon_start >= horizon_end {
            return Err(PlanError::InvalidHorizon {
                start: horizon_start,
                end: horizon_end,
            });
        }

        let timeout = Duration::from_secs(self.config.source_timeout_secs);
        let curve = bounded(
            "tariff fetch",
            timeout,
            self.tariff.price_curve(horizon_start, horizon_end),
        )
        .await
        .map_err(PlanError::Tariff)?;

        if curve.is_empty() {
            warn!(
                source = self.tariff.name(),
                %horizon_start,
                %horizon_end,
                "No tariff data for planning horizon"
            );
            return Ok(Vec::new());
        }

        let forecast = match &self.forecast {
            Some(source) => {
                match bounded(
                    "forecast fetch",
                    timeout,
                    source.generation(horizon_start, horizon_end),
                )
                .await
                {
                    Ok(points) => forecast_by_slot(&points),
                    Err(e) => {
                        warn!(error = %e, source = source.name(), "Solar forecast unavailable, planning on raw prices");
                        HashMap::new()
                    }
                }
            }
            None => HashMap::new(),
        };

        let params = SelectionParams {
            policy: &self.policy,
            slot_width: chrono::Duration::minutes(i64::from(self.config.slot_minutes)),
            horizon_start,
            horizon_end,
            solar_credit_factor: self.config.solar_credit_factor,
            effective_cost_floor: self.config.effective_cost_floor,
        };
        let selected = select_cheapest(&curve, &forecast, &params, count);

        let new_slots: Vec<NewSlot> = selected
            .iter()
            .map(|c| {
                debug!(
                    start = %c.start,
                    price = c.price_p_per_kwh,
                    effective_cost = c.effective_cost,
                    "Selected charge slot"
                );
                NewSlot::scheduled(
                    c.start,
                    c.end,
                    self.config.target_soc_for(c.price_p_per_kwh),
                    c.price_p_per_kwh,
                )
            })
            .collect();

        let inserted = self.store.insert_slots(&new_slots, now)?;

        info!(
            curve_points = curve.len(),
            selected = new_slots.len(),
            inserted = inserted.len(),
            "📅 Planner run complete"
        );

        if !inserted.is_empty() {
            self.executor_wake.notify();
        }

        Ok(inserted)
    }

    /// One scheduled run over the configured horizon, recorded in the planner run log
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleSlot>, PlanError> {
        let horizon_end = now + chrono::Duration::hours(i64::from(self.config.horizon_hours));
        let result = self
            .plan_at(now, horizon_end, self.config.slot_count, now)
            .await;

        let run = PlannerRun {
            ran_at: now,
            horizon_start: now,
            horizon_end,
            requested: u32::try_from(self.config.slot_count).unwrap_or(u32::MAX),
            inserted: result
                .as_ref()
                .map_or(0, |slots| u32::try_from(slots.len()).unwrap_or(u32::MAX)),
            succeeded: result.is_ok(),
            detail: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(e) = self.store.record_planner_run(&run) {
            warn!(error = %e, "Failed to record planner run");
        }

        result
    }

    /// Cadence loop: runs immediately, then `runs_per_day` times a day and whenever
    /// `trigger` fires, until `shutdown` flips to true.
    pub async fn run(self, trigger: RefreshSignal, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(86_400) / self.config.runs_per_day.max(1);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            period_secs = period.as_secs(),
            horizon_hours = self.config.horizon_hours,
            slot_count = self.config.slot_count,
            "Planner loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                woken = trigger.wait(period) => {
                    if !woken {
                        continue;
                    }
                    info!("Planner run requested");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, planner loop stopping");
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                info!("Planner loop stopping");
                break;
            }

            if let Err(e) = self.run_once(Utc::now()).await {
                error!(error = %e, "Planner run failed, keeping previous schedule");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::test_support::{FakeForecast, FakeTariff, FlakyStore, at, half_hour_curve, utc_policy};
    use crate::error::ExternalError;
    use chrono::Duration as ChronoDuration;
    use fluxion_charge_types::{ForecastPoint, SlotOrigin};
    use std::sync::atomic::Ordering;

    fn planner(store: Arc<dyn ScheduleStore>, tariff: Arc<FakeTariff>, wake: RefreshSignal) -> Planner {
        Planner::new(store, tariff, utc_policy(), PlannerConfig::default(), wake)
    }

    fn tomorrow() -> DateTime<Utc> {
        at(0, 0) + ChronoDuration::days(1)
    }

    /// 48 half-hour prices falling from 30p to a 5p trough at 03:00 then climbing to 45p
    fn day_prices() -> Vec<f64> {
        let mut prices = Vec::with_capacity(48);
        for i in 0..48_i32 {
            let price = if i <= 6 {
                30.0 - f64::from(i) * 25.0 / 6.0
            } else {
                5.0 + f64::from(i - 6) * 40.0 / 41.0
            };
            prices.push(price);
        }
        prices
    }

    #[tokio::test]
    async fn test_persists_three_cheapest_slots() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &day_prices()));
        let wake = RefreshSignal::new();
        let planner = planner(store.clone(), tariff, wake.clone());

        let slots = planner
            .plan_at(tomorrow(), tomorrow() + ChronoDuration::hours(24), 3, at(12, 0))
            .await
            .unwrap();

        let starts: Vec<_> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(
            starts,
            vec![
                tomorrow() + ChronoDuration::minutes(180),
                tomorrow() + ChronoDuration::minutes(210),
                tomorrow() + ChronoDuration::minutes(240),
            ]
        );
        for slot in &slots {
            assert_eq!(slot.origin, SlotOrigin::Scheduler);
            assert!(!slot.manual_override);
            assert_eq!(slot.target_soc, 95);
            assert_eq!(slot.end_time - slot.start_time, ChronoDuration::minutes(30));
        }
        assert_eq!(slots[0].price_p_per_kwh, Some(5.0));
        assert_eq!(store.pending_slots().unwrap().len(), 3);
        assert!(wake.wait(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_tariff_failure_writes_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let wake = RefreshSignal::new();
        let planner = planner(store.clone(), FakeTariff::failing(), wake.clone());

        let err = planner.run_once(at(12, 0)).await.unwrap_err();
        assert!(matches!(err, PlanError::Tariff(ExternalError::Transient(_))));
        assert!(store.pending_slots().unwrap().is_empty());
        assert!(!wake.wait(Duration::from_millis(1)).await);

        let run = store.last_planner_run().unwrap().unwrap();
        assert!(!run.succeeded);
        assert_eq!(run.inserted, 0);
        assert!(run.detail.unwrap().contains("Tariff source failed"));
    }

    #[tokio::test]
    async fn test_store_failure_aborts_run() {
        let store = FlakyStore::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &day_prices()));
        let wake = RefreshSignal::new();
        let planner = planner(store.clone(), tariff, wake.clone());

        let err = planner
            .plan_at(tomorrow(), tomorrow() + ChronoDuration::hours(24), 3, at(12, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::Store(_)));
        assert!(store.inner.pending_slots().unwrap().is_empty());
        assert!(!wake.wait(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_empty_curve_is_not_an_error() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let planner = planner(store.clone(), FakeTariff::with_curve(Vec::new()), RefreshSignal::new());

        let slots = planner.run_once(at(12, 0)).await.unwrap();
        assert!(slots.is_empty());
        assert!(store.last_planner_run().unwrap().unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_rerun_does_not_duplicate() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &day_prices()));
        let planner = planner(store.clone(), tariff.clone(), RefreshSignal::new());
        let horizon_end = tomorrow() + ChronoDuration::hours(24);

        planner.plan_at(tomorrow(), horizon_end, 3, at(12, 0)).await.unwrap();
        let second = planner.plan_at(tomorrow(), horizon_end, 3, at(18, 0)).await.unwrap();

        assert!(second.is_empty());
        assert_eq!(store.pending_slots().unwrap().len(), 3);
        assert_eq!(tariff.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forecast_failure_falls_back_to_raw_prices() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &[10.0, 12.0, 11.0]));
        let forecast = Arc::new(FakeForecast {
            response: Err(ExternalError::Transient("timeout".to_owned())),
        });
        let planner = planner(store, tariff, RefreshSignal::new()).with_forecast(forecast);

        let slots = planner
            .plan_at(tomorrow(), tomorrow() + ChronoDuration::hours(2), 1, at(12, 0))
            .await
            .unwrap();
        assert_eq!(slots[0].start_time, tomorrow());
    }

    #[tokio::test]
    async fn test_forecast_credit_moves_selection() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &[10.0, 12.0, 11.0]));
        let forecast = Arc::new(FakeForecast {
            response: Ok(vec![ForecastPoint {
                slot_start: tomorrow() + ChronoDuration::minutes(60),
                forecast_kwh: 1.5,
            }]),
        });
        let planner = planner(store, tariff, RefreshSignal::new()).with_forecast(forecast);

        let slots = planner
            .plan_at(tomorrow(), tomorrow() + ChronoDuration::hours(2), 1, at(12, 0))
            .await
            .unwrap();
        assert_eq!(slots[0].start_time, tomorrow() + ChronoDuration::minutes(60));
        // Raw price is persisted, not the credited cost
        assert_eq!(slots[0].price_p_per_kwh, Some(11.0));
    }

    #[tokio::test]
    async fn test_cheap_slots_get_override_target() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(half_hour_curve(tomorrow(), &[-2.0, 6.0]));
        let config = PlannerConfig {
            cheap_price_threshold: Some(0.0),
            ..PlannerConfig::default()
        };
        let planner = Planner::new(store, tariff, utc_policy(), config, RefreshSignal::new());

        let slots = planner
            .plan_at(tomorrow(), tomorrow() + ChronoDuration::hours(1), 2, at(12, 0))
            .await
            .unwrap();
        assert_eq!(slots[0].target_soc, 100);
        assert_eq!(slots[1].target_soc, 95);
    }

    #[tokio::test]
    async fn test_invalid_horizon_rejected() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(Vec::new());
        let planner = planner(store, tariff.clone(), RefreshSignal::new());

        let err = planner.plan(at(5, 0), at(4, 0), 3).await.unwrap_err();
        assert!(matches!(err, PlanError::InvalidHorizon { .. }));
        assert_eq!(tariff.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_on_start_and_on_trigger() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tariff = FakeTariff::with_curve(Vec::new());
        let planner = planner(store, tariff.clone(), RefreshSignal::new());
        let trigger = RefreshSignal::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(planner.run(trigger.clone(), shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tariff.calls.load(Ordering::SeqCst), 1);

        trigger.notify();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tariff.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
