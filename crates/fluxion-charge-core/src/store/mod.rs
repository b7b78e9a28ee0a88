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

//! Durable schedule of charge slots.
//!
//! The store is shared by the planner, the executor and the command surface. Every
//! method is one logical operation and implementations must serialize them: a batch
//! insert and a per-slot update never interleave.

mod migrations;
mod sqlite;

pub use migrations::LATEST_SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use fluxion_charge_types::{DecisionRecord, NewSlot, PlannerRun, ScheduleSlot, SlotId};

use crate::error::StoreResult;

/// Outcome of [`ScheduleStore::insert_manual_slot`]
#[derive(Debug, Clone, PartialEq)]
pub enum ManualInsert {
    Created(ScheduleSlot),
    /// A pending manual slot already covers part of the window
    Overlaps(SlotId),
    /// The same manual window already exists in a closed state
    Duplicate,
}

pub trait ScheduleStore: Send + Sync {
    /// Insert all slots in one transaction, skipping exact duplicates of existing slots.
    /// Returns the slots that were actually created.
    fn insert_slots(
        &self,
        slots: &[NewSlot],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleSlot>>;

    /// Insert a manual slot unless it overlaps a pending manual slot.
    /// The overlap check and the insert happen in one transaction.
    fn insert_manual_slot(
        &self,
        slot: &NewSlot,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ManualInsert>;

    fn get_slot(&self, id: SlotId) -> StoreResult<Option<ScheduleSlot>>;

    /// Slots overlapping `[from, to)`, ordered by start time
    fn slots_in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>)
    -> StoreResult<Vec<ScheduleSlot>>;

    /// Pending slots whose window contains `now`
    fn active_slots(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleSlot>>;

    /// Neither executed nor expired, ordered by start time
    fn pending_slots(&self) -> StoreResult<Vec<ScheduleSlot>>;

    /// First pending slot starting after `now`
    fn next_pending_after(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduleSlot>>;

    /// Close a pending slot: `executed = true` plus the decision tag.
    /// Returns false when the slot was already closed or is gone.
    fn finalize_slot(&self, id: SlotId, decision: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Count a failed attempt. Returns the new retry count, or None if the slot is no longer pending.
    fn record_retry(&self, id: SlotId, at: DateTime<Utc>) -> StoreResult<Option<u32>>;

    /// Mark every pending slot that ended at or before `now` as expired
    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<SlotId>>;

    /// Most recently executed slot, unless a hold decision has been recorded for it.
    /// This is the charge a previous process may have left running.
    fn last_executed_without_hold(&self) -> StoreResult<Option<ScheduleSlot>>;

    /// Returns false when no slot had this id
    fn delete_slot(&self, id: SlotId) -> StoreResult<bool>;

    fn record_decision(&self, record: &DecisionRecord) -> StoreResult<()>;

    /// Newest first
    fn recent_decisions(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>>;

    fn record_planner_run(&self, run: &PlannerRun) -> StoreResult<()>;

    fn last_planner_run(&self) -> StoreResult<Option<PlannerRun>>;
}
