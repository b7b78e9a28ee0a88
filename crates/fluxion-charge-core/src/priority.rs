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

//! Overlap resolution between slots active at the same instant.
//!
//! Priority order, highest first:
//! 1. `manual_override` slots
//! 2. earlier `created_at`
//! 3. lower id (creation order within one batch)
//!
//! Losing candidates are not touched; they expire on their own once their window ends.

use fluxion_charge_types::ScheduleSlot;
use std::cmp::Ordering;

/// `Less` means `a` wins over `b`
pub fn compare_priority(a: &ScheduleSlot, b: &ScheduleSlot) -> Ordering {
    b.manual_override
        .cmp(&a.manual_override)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// The single slot the executor should drive, if any
pub fn select_winner(candidates: &[ScheduleSlot]) -> Option<&ScheduleSlot> {
    candidates.iter().min_by(|a, b| compare_priority(a, b))
}
