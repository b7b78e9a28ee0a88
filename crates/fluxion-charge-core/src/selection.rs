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

//! Greedy top-K slot selection over a price curve.
//!
//! This is not an optimizer: no contiguous-block packing and no SoC simulation. Slots in
//! the peak window or above the ceiling are dropped, the rest are ranked by effective
//! cost and the cheapest `count` win. Ties go to the lower raw price, then the earlier start.

use chrono::{DateTime, Duration, Utc};
use fluxion_charge_types::{ForecastPoint, PricePoint};
use std::collections::HashMap;

use crate::policy::SafetyPolicy;

/// A slot that survived filtering
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Raw tariff price, persisted with the slot
    pub price_p_per_kwh: f64,
    /// Price after solar credit, used only for ranking
    pub effective_cost: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionParams<'a> {
    pub policy: &'a SafetyPolicy,
    pub slot_width: Duration,
    pub horizon_start: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
    pub solar_credit_factor: f64,
    pub effective_cost_floor: f64,
}

/// `price - factor * forecast_kwh`, clamped to `floor`.
///
/// Slots that clamp to the same cost are told apart by raw price in [`select_cheapest`].
pub fn effective_cost(price: f64, forecast_kwh: f64, factor: f64, floor: f64) -> f64 {
    (price - factor * forecast_kwh.max(0.0)).max(floor)
}

pub fn forecast_by_slot(points: &[ForecastPoint]) -> HashMap<DateTime<Utc>, f64> {
    points
        .iter()
        .map(|point| (point.slot_start, point.forecast_kwh))
        .collect()
}

/// Pick the `count` cheapest eligible slots, returned in start order
pub fn select_cheapest(
    curve: &[PricePoint],
    forecast: &HashMap<DateTime<Utc>, f64>,
    params: &SelectionParams<'_>,
    count: usize,
) -> Vec<Candidate> {
    let mut points: Vec<&PricePoint> = curve
        .iter()
        .filter(|p| p.price_p_per_kwh.is_finite())
        .collect();
    points.sort_by_key(|p| p.slot_start);
    points.dedup_by_key(|p| p.slot_start);

    let mut candidates: Vec<Candidate> = points
        .into_iter()
        .filter_map(|point| {
            let start = point.slot_start;
            let end = start + params.slot_width;
            if end <= params.horizon_start || start >= params.horizon_end {
                return None;
            }
            if params.policy.in_peak(start, end) || params.policy.above_ceiling(point.price_p_per_kwh)
            {
                return None;
            }
            let forecast_kwh = forecast.get(&start).copied().unwrap_or(0.0);
            Some(Candidate {
                start,
                end,
                price_p_per_kwh: point.price_p_per_kwh,
                effective_cost: effective_cost(
                    point.price_p_per_kwh,
                    forecast_kwh,
                    params.solar_credit_factor,
                    params.effective_cost_floor,
                ),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.effective_cost
            .total_cmp(&b.effective_cost)
            .then_with(|| a.price_p_per_kwh.total_cmp(&b.price_p_per_kwh))
            .then_with(|| a.start.cmp(&b.start))
    });
    candidates.truncate(count);
    candidates.sort_by_key(|c| c.start);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fluxion_charge_types::PolicyConfig;

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap()
    }

    fn curve(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| PricePoint {
                slot_start: midnight() + Duration::minutes(30 * i64::try_from(i).unwrap()),
                price_p_per_kwh: *price,
            })
            .collect()
    }

    fn utc_policy(max_price: Option<f64>) -> SafetyPolicy {
        SafetyPolicy::from_config(&PolicyConfig {
            timezone: "UTC".to_owned(),
            max_price_p_per_kwh: max_price,
            ..PolicyConfig::default()
        })
        .unwrap()
    }

    fn params(policy: &SafetyPolicy) -> SelectionParams<'_> {
        SelectionParams {
            policy,
            slot_width: Duration::minutes(30),
            horizon_start: midnight(),
            horizon_end: midnight() + Duration::hours(24),
            solar_credit_factor: 2.0,
            effective_cost_floor: 0.0,
        }
    }

    #[test]
    fn test_picks_cheapest_with_earliest_tie_break() {
        let policy = utc_policy(None);
        let prices = [9.0, 4.0, 7.0, 4.0, 3.0, 4.0];
        let selected = select_cheapest(&curve(&prices), &HashMap::new(), &params(&policy), 3);

        let starts: Vec<_> = selected.iter().map(|c| c.start).collect();
        assert_eq!(
            starts,
            vec![
                midnight() + Duration::minutes(30),
                midnight() + Duration::minutes(90),
                midnight() + Duration::minutes(120),
            ]
        );
    }

    #[test]
    fn test_peak_and_ceiling_slots_never_selected() {
        let policy = utc_policy(Some(20.0));
        // Cheapest prices sit inside 16:00-19:00, and one cheap-looking slot is NaN
        let mut prices = vec![25.0; 48];
        for price in prices.iter_mut().skip(32).take(6) {
            *price = 1.0;
        }
        prices[10] = 15.0;
        prices[11] = 18.0;
        prices[12] = f64::NAN;
        let selected = select_cheapest(&curve(&prices), &HashMap::new(), &params(&policy), 5);

        assert_eq!(selected.len(), 2);
        for candidate in &selected {
            assert!(!policy.in_peak(candidate.start, candidate.end));
            assert!(candidate.price_p_per_kwh <= 20.0);
        }
    }

    #[test]
    fn test_solar_credit_reorders_ranking() {
        let policy = utc_policy(None);
        let prices = [10.0, 12.0];
        let forecast = HashMap::from([(midnight() + Duration::minutes(30), 2.0)]);
        let selected = select_cheapest(&curve(&prices), &forecast, &params(&policy), 1);

        assert_eq!(selected[0].start, midnight() + Duration::minutes(30));
        assert!((selected[0].effective_cost - 8.0).abs() < f64::EPSILON);
        assert!((selected[0].price_p_per_kwh - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_effective_cost_floor() {
        assert!((effective_cost(5.0, 10.0, 2.0, 0.0) - 0.0).abs() < f64::EPSILON);
        // The floor binds negative tariff prices too
        assert!((effective_cost(-3.0, 1.0, 2.0, 0.0) - 0.0).abs() < f64::EPSILON);
        assert!((effective_cost(-3.0, 0.0, 2.0, -10.0) - (-3.0)).abs() < f64::EPSILON);
        assert!((effective_cost(5.0, 1.0, 2.0, 0.0) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_floor_ties_prefer_lower_raw_price() {
        let policy = utc_policy(None);
        // 00:00 is credited down to the floor, 00:30 is already below it
        let forecast = HashMap::from([(midnight(), 10.0)]);
        let selected = select_cheapest(&curve(&[5.0, -3.0]), &forecast, &params(&policy), 1);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].start, midnight() + Duration::minutes(30));
        assert!((selected[0].effective_cost - 0.0).abs() < f64::EPSILON);
        assert!((selected[0].price_p_per_kwh + 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slots_outside_horizon_are_dropped() {
        let policy = utc_policy(None);
        let mut params = params(&policy);
        params.horizon_start = midnight() + Duration::minutes(45);
        let selected = select_cheapest(&curve(&[1.0, 2.0, 3.0]), &HashMap::new(), &params, 3);

        // 00:00 ended before the horizon, 00:30 is still running
        let starts: Vec<_> = selected.iter().map(|c| c.start).collect();
        assert_eq!(
            starts,
            vec![
                midnight() + Duration::minutes(30),
                midnight() + Duration::minutes(60)
            ]
        );
    }

    #[test]
    fn test_duplicate_points_selected_once() {
        let policy = utc_policy(None);
        let mut points = curve(&[1.0, 2.0]);
        points.push(points[0]);
        let selected = select_cheapest(&points, &HashMap::new(), &params(&policy), 3);
        assert_eq!(selected.len(), 2);
    }
}
