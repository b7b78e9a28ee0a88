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

//! Operations offered to external callers such as a dashboard or an API layer.

use chrono::{DateTime, Utc};
use fluxion_charge_types::{DecisionRecord, ExecutorStatus, NewSlot, ScheduleSlot, SlotId};
use std::sync::Arc;
use tracing::info;

use crate::error::CommandError;
use crate::store::{ManualInsert, ScheduleStore};
use crate::sync::{InFlightSlot, RefreshSignal, StatusBoard};

pub struct ChargeCommands {
    store: Arc<dyn ScheduleStore>,
    in_flight: InFlightSlot,
    board: Arc<StatusBoard>,
    executor_wake: RefreshSignal,
    planner_trigger: RefreshSignal,
}

impl std::fmt::Debug for ChargeCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargeCommands")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl ChargeCommands {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        in_flight: InFlightSlot,
        board: Arc<StatusBoard>,
        executor_wake: RefreshSignal,
        planner_trigger: RefreshSignal,
    ) -> Self {
        Self {
            store,
            in_flight,
            board,
            executor_wake,
            planner_trigger,
        }
    }

    /// Create a manual override slot.
    ///
    /// Rejects empty or past ranges, targets above 100% and any overlap with another
    /// pending manual slot. Nothing is normalized.
    pub fn create_manual_slot(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target_soc: u8,
        now: DateTime<Utc>,
    ) -> Result<ScheduleSlot, CommandError> {
        if start >= end {
            return Err(CommandError::InvalidSlot(format!(
                "start {start} is not before end {end}"
            )));
        }
        if end <= now {
            return Err(CommandError::InvalidSlot(format!("slot ended at {end}")));
        }
        if target_soc > 100 {
            return Err(CommandError::InvalidSlot(format!(
                "target {target_soc}% is above 100%"
            )));
        }

        let slot = match self
            .store
            .insert_manual_slot(&NewSlot::manual(start, end, target_soc), now)?
        {
            ManualInsert::Created(slot) => slot,
            ManualInsert::Overlaps(clash) => return Err(CommandError::Overlap(clash)),
            ManualInsert::Duplicate => {
                return Err(CommandError::InvalidSlot(format!(
                    "a manual slot {start} .. {end} already exists"
                )));
            }
        };

        info!(
            slot_id = slot.id,
            start = %slot.start_time,
            end = %slot.end_time,
            target_soc,
            "✋ Manual slot created"
        );
        self.executor_wake.notify();
        Ok(slot)
    }

    /// Pending slots ordered by start time
    pub fn list_pending(&self) -> Result<Vec<ScheduleSlot>, CommandError> {
        Ok(self.store.pending_slots()?)
    }

    /// Delete a slot unless the executor is sending a command for it right now
    pub fn delete_slot(&self, id: SlotId) -> Result<(), CommandError> {
        match self
            .in_flight
            .unless_in_flight(id, || self.store.delete_slot(id))
        {
            None => Err(CommandError::Busy(id)),
            Some(Ok(true)) => {
                info!(slot_id = id, "Slot deleted");
                self.executor_wake.notify();
                Ok(())
            }
            Some(Ok(false)) => Err(CommandError::NotFound(id)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    pub fn status(&self) -> Arc<ExecutorStatus> {
        self.board.snapshot()
    }

    /// Wake the executor for an immediate tick
    pub fn refresh_now(&self) {
        info!("Refresh requested");
        self.executor_wake.notify();
    }

    /// Ask the planner to run ahead of its cadence
    pub fn plan_now(&self) {
        info!("Planner run requested");
        self.planner_trigger.notify();
    }

    pub fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionRecord>, CommandError> {
        Ok(self.store.recent_decisions(limit)?)
    }
}
