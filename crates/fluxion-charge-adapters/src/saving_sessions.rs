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

//! Octopus saving sessions over the Kraken GraphQL API.
//!
//! Each lookup trades the account API key for a short-lived Kraken token, then lists the
//! account's saving session events. Only events Octopus reports as ongoing are returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_charge_core::{ExternalResult, SavingSessionSource};
use fluxion_charge_types::SavingSession;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AdapterError, AdapterResult};
use crate::http::{build_client, retry_request};

pub const DEFAULT_GRAPHQL_URL: &str = "https://api.octopus.energy/v1/graphql/";

const OBTAIN_TOKEN: &str = "mutation ObtainKrakenToken($input: ObtainJSONWebTokenInput!) {
  obtainKrakenToken(input: $input) { token }
}";

const SAVING_SESSIONS: &str = "query SavingSessions($accountNumber: String!) {
  savingSessions(accountNumber: $accountNumber) {
    events { id code startAt endAt rewardPerKwhInOctoPoints status }
  }
}";

const ONGOING: &str = "ONGOING";

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Serialize)]
struct TokenVariables<'a> {
    input: TokenInput<'a>,
}

#[derive(Debug, Serialize)]
struct TokenInput<'a> {
    #[serde(rename = "APIKey")]
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    obtain_kraken_token: KrakenToken,
}

#[derive(Debug, Deserialize)]
struct KrakenToken {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionVariables<'a> {
    account_number: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionsData {
    saving_sessions: SessionEvents,
}

#[derive(Debug, Deserialize)]
struct SessionEvents {
    #[serde(default)]
    events: Vec<SessionEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEvent {
    #[serde(default)]
    code: Option<String>,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: String,
}

#[derive(Clone)]
pub struct OctopusSavingSessions {
    graphql_url: String,
    api_key: String,
    account_number: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for OctopusSavingSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctopusSavingSessions")
            .field("graphql_url", &self.graphql_url)
            .field("account_number", &self.account_number)
            .finish_non_exhaustive()
    }
}

impl OctopusSavingSessions {
    pub fn new(
        graphql_url: impl Into<String>,
        api_key: impl Into<String>,
        account_number: impl Into<String>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        let api_key = api_key.into();
        let account_number = account_number.into();
        if api_key.is_empty() {
            return Err(AdapterError::Config("Octopus API key is required".to_owned()));
        }
        if account_number.is_empty() {
            return Err(AdapterError::Config(
                "Octopus account number is required".to_owned(),
            ));
        }

        Ok(Self {
            graphql_url: graphql_url.into(),
            api_key,
            account_number,
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

    async fn post<V, T>(
        &self,
        what: &str,
        body: &GraphqlRequest<'_, V>,
        token: Option<&str>,
    ) -> AdapterResult<T>
    where
        V: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let response = retry_request(what, self.max_retries, self.retry_delay, || {
            let mut request = self.client.post(&self.graphql_url).json(body);
            if let Some(token) = token {
                request = request.header(reqwest::header::AUTHORIZATION, format!("JWT {token}"));
            }
            request.send()
        })
        .await?;
        let payload = response
            .json::<GraphqlResponse<T>>()
            .await
            .map_err(|e| AdapterError::Malformed(format!("{what}: {e}")))?;

        if let Some(error) = payload.errors.into_iter().next() {
            return Err(AdapterError::Graphql(format!("{what}: {}", error.message)));
        }
        payload
            .data
            .ok_or_else(|| AdapterError::Malformed(format!("{what}: response has no data")))
    }

    async fn kraken_token(&self) -> AdapterResult<String> {
        let body = GraphqlRequest {
            query: OBTAIN_TOKEN,
            variables: TokenVariables {
                input: TokenInput {
                    api_key: &self.api_key,
                },
            },
        };
        let data: TokenData = self.post("kraken token", &body, None).await?;
        Ok(data.obtain_kraken_token.token)
    }

    /// Saving sessions running right now for the configured account
    pub async fn ongoing_sessions(&self) -> AdapterResult<Vec<SavingSession>> {
        let token = self.kraken_token().await?;
        let body = GraphqlRequest {
            query: SAVING_SESSIONS,
            variables: SessionVariables {
                account_number: &self.account_number,
            },
        };
        let data: SessionsData = self.post("saving sessions", &body, Some(&token)).await?;

        let sessions: Vec<SavingSession> = data
            .saving_sessions
            .events
            .into_iter()
            .filter(|event| event.status == ONGOING)
            .inspect(|event| {
                debug!(
                    code = event.code.as_deref().unwrap_or("-"),
                    start = %event.start_at,
                    end = %event.end_at,
                    "Saving session ongoing"
                );
            })
            .map(|event| SavingSession {
                start: event.start_at,
                end: event.end_at,
            })
            .collect();

        info!(
            sessions = sessions.len(),
            account = %self.account_number,
            "🐙 Saving sessions checked"
        );
        Ok(sessions)
    }
}

#[async_trait]
impl SavingSessionSource for OctopusSavingSessions {
    async fn sessions(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExternalResult<Vec<SavingSession>> {
        let mut sessions = self.ongoing_sessions().await?;
        sessions.retain(|session| session.overlaps(from, to));
        Ok(sessions)
    }

    fn name(&self) -> &str {
        "octopus-saving-sessions"
    }
}
