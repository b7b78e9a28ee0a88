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

//! Octopus Energy Agile tariff client.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fluxion_charge_core::{ExternalResult, TariffSource};
use fluxion_charge_types::PricePoint;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{AdapterError, AdapterResult};
use crate::http::{build_client, retry_request};

pub const DEFAULT_BASE_URL: &str = "https://api.octopus.energy";

/// Upper bound on followed `next` links per request
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct RatesPage {
    results: Vec<UnitRate>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnitRate {
    value_inc_vat: f64,
    valid_from: DateTime<Utc>,
}

/// Half-hourly Agile unit rates (p/kWh including VAT)
#[derive(Debug, Clone)]
pub struct OctopusAgileClient {
    base_url: String,
    product_code: String,
    tariff_code: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl OctopusAgileClient {
    pub fn new(
        base_url: impl Into<String>,
        product_code: impl Into<String>,
        tariff_code: impl Into<String>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        let product_code = product_code.into();
        let tariff_code = tariff_code.into();
        if product_code.is_empty() || tariff_code.is_empty() {
            return Err(AdapterError::Config(
                "Octopus product and tariff codes are required".to_owned(),
            ));
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            product_code,
            tariff_code,
            client: build_client(timeout)?,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn rates_url(&self) -> String {
        format!(
            "{}/v1/products/{}/electricity-tariffs/{}/standard-unit-rates/",
            self.base_url, self.product_code, self.tariff_code
        )
    }

    async fn fetch_page(&self, url: &str, query: &[(&str, String)]) -> AdapterResult<RatesPage> {
        let response = retry_request("octopus rates", self.max_retries, self.retry_delay, || {
            self.client.get(url).query(query).send()
        })
        .await?;
        response
            .json::<RatesPage>()
            .await
            .map_err(|e| AdapterError::Malformed(format!("Octopus rates: {e}")))
    }

    /// Fetch every published rate for slots starting in `[from, to)`
    pub async fn fetch_rates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AdapterResult<Vec<PricePoint>> {
        let query = [
            ("period_from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("period_to", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];

        let mut page = self.fetch_page(&self.rates_url(), &query).await?;
        let mut rates = std::mem::take(&mut page.results);
        let mut pages = 1;
        while let Some(next) = page.next.take() {
            if pages >= MAX_PAGES {
                warn!(pages, "Octopus pagination limit reached, using partial curve");
                break;
            }
            debug!(url = %next, "Following Octopus rates page");
            page = self.fetch_page(&next, &[]).await?;
            rates.append(&mut page.results);
            pages += 1;
        }

        let mut curve: Vec<PricePoint> = rates
            .into_iter()
            .filter(|rate| rate.valid_from >= from && rate.valid_from < to)
            .map(|rate| PricePoint {
                slot_start: rate.valid_from,
                price_p_per_kwh: rate.value_inc_vat,
            })
            .collect();
        curve.sort_by_key(|p| p.slot_start);
        curve.dedup_by_key(|p| p.slot_start);

        info!(
            points = curve.len(),
            pages,
            %from,
            %to,
            "💷 Agile prices fetched"
        );
        Ok(curve)
    }
}

#[async_trait]
impl TariffSource for OctopusAgileClient {
    async fn price_curve(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<PricePoint>> {
        Ok(self.fetch_rates(from, to).await?)
    }

    fn name(&self) -> &str {
        "octopus-agile"
    }
}
