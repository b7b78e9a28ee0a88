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

//! Shared request plumbing for the HTTP adapters.

use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::errors::{AdapterError, AdapterResult};

pub(crate) fn build_client(timeout: Duration) -> AdapterResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AdapterError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Map non-success statuses onto `AdapterError`
pub(crate) async fn check_status(response: Response) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AdapterError::AuthenticationFailed);
    }
    let message = response.text().await.unwrap_or_default();
    Err(AdapterError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Retry a request with exponential backoff while it keeps failing transiently
pub(crate) async fn retry_request<F, Fut>(
    what: &str,
    max_retries: u32,
    retry_delay: Duration,
    mut request_fn: F,
) -> AdapterResult<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempts = 0;
    let mut delay = retry_delay;

    loop {
        attempts += 1;
        let result = match request_fn().await {
            Ok(response) => check_status(response).await,
            Err(e) => Err(AdapterError::Http(e)),
        };
        match result {
            Ok(response) => return Ok(response),
            Err(e) if !e.is_transient() || attempts >= max_retries => {
                error!(what, attempts, error = %e, "Request failed");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    what,
                    attempt = attempts,
                    max_retries,
                    error = %e,
                    "Request failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
