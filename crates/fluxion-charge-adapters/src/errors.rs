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

use fluxion_charge_core::ExternalError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("GraphQL error: {0}")]
    Graphql(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    /// Timeouts, dropped connections, throttling and 5xx may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !(e.is_decode() || e.is_builder() || e.is_redirect()),
            Self::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::AuthenticationFailed
            | Self::Graphql(_)
            | Self::Malformed(_)
            | Self::Config(_) => false,
        }
    }
}

impl From<AdapterError> for ExternalError {
    fn from(e: AdapterError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Persistent(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server_error = AdapterError::Api {
            status: 503,
            message: "unavailable".to_owned(),
        };
        let throttled = AdapterError::Api {
            status: 429,
            message: "slow down".to_owned(),
        };
        let not_found = AdapterError::Api {
            status: 404,
            message: "no such site".to_owned(),
        };
        assert!(server_error.is_transient());
        assert!(throttled.is_transient());
        assert!(!not_found.is_transient());
        assert!(!AdapterError::AuthenticationFailed.is_transient());
    }

    #[test]
    fn test_conversion_keeps_message() {
        let external: ExternalError = AdapterError::Malformed("missing soc".to_owned()).into();
        assert_eq!(
            external,
            ExternalError::Persistent("Malformed response: missing soc".to_owned())
        );
    }
}
