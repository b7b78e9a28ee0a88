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
use fluxion_charge_types::SlotId;
use thiserror::Error;

/// Failure reported by a tariff, forecast or battery collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// Network error, timeout or 5xx. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Auth failure, malformed response or rejected request. Retrying will not help.
    #[error("persistent failure: {0}")]
    Persistent(String),
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Schedule store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration {version} ({description}) failed: {source}")]
    Migration {
        version: u32,
        description: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Reasons a planner run is aborted without writing anything
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Invalid planning horizon {start} .. {end}")]
    InvalidHorizon {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Tariff source failed: {0}")]
    Tariff(#[source] ExternalError),

    #[error("Failed to persist planned slots: {0}")]
    Store(#[from] StoreError),
}

/// Rejections from the command surface
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Slot overlaps pending manual slot {0}")]
    Overlap(SlotId),

    #[error("Slot {0} is being executed right now")]
    Busy(SlotId),

    #[error("Slot {0} not found")]
    NotFound(SlotId),

    #[error(transparent)]
    Store(#[from] StoreError),
}
