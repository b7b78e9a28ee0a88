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
use fluxion_charge_core::{ExternalResult, StatusPublisher};
use fluxion_charge_types::ExecutorStatus;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::AdapterResult;
use crate::http::{build_client, check_status};

/// Pushes every status snapshot to a dashboard's `/update_status` endpoint
#[derive(Clone)]
pub struct DashboardPublisher {
    url: String,
    api_key: Option<String>,
    client: Client,
}

impl std::fmt::Debug for DashboardPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardPublisher")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl DashboardPublisher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        Ok(Self {
            url: format!("{}/update_status", base_url.into().trim_end_matches('/')),
            api_key,
            client: build_client(timeout)?,
        })
    }

    pub async fn push(&self, status: &ExecutorStatus) -> AdapterResult<()> {
        let mut request = self.client.post(&self.url).json(status);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        check_status(request.send().await?).await?;
        debug!(url = %self.url, state = %status.state, "Status pushed to dashboard");
        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for DashboardPublisher {
    async fn publish(&self, status: Arc<ExecutorStatus>) -> ExternalResult<()> {
        Ok(self.push(&status).await?)
    }

    fn name(&self) -> &str {
        "dashboard"
    }
}
