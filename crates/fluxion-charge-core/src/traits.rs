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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_charge_types::{
    BatteryTelemetry, ChargeMode, ExecutorStatus, ForecastPoint, PricePoint, SavingSession,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExternalError;

pub type ExternalResult<T> = std::result::Result<T, ExternalError>;

// ============= Collaborator Traits =============

/// Source of the half-hourly price curve
#[async_trait]
pub trait TariffSource: Send + Sync {
    /// Prices for slots starting in `[from, to)`, ordered by slot start.
    /// Ranges outside the published horizon yield an empty curve.
    async fn price_curve(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<PricePoint>>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}

/// Optional source of predicted solar generation aligned to the tariff grid
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn generation(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<ForecastPoint>>;

    fn name(&self) -> &str;
}

/// Optional source of saving sessions announced by the supplier
#[async_trait]
pub trait SavingSessionSource: Send + Sync {
    /// Sessions overlapping `[from, to)`
    async fn sessions(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<SavingSession>>;

    fn name(&self) -> &str;
}

/// The battery control API
///
/// `set_target` must be idempotent: retries resend the same command.
#[async_trait]
pub trait BatteryController: Send + Sync {
    async fn read_status(&self) -> ExternalResult<BatteryTelemetry>;

    async fn set_target(&self, target_soc: u8, mode: ChargeMode) -> ExternalResult<()>;

    fn name(&self) -> &str;
}

/// Receives every executor status snapshot
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, status: Arc<ExecutorStatus>) -> ExternalResult<()>;

    fn name(&self) -> &str;
}

/// Run an external call with an upper time bound, mapping the timeout to a transient failure
pub async fn bounded<T, F>(what: &str, limit: Duration, call: F) -> ExternalResult<T>
where
    F: Future<Output = ExternalResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ExternalError::Transient(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
