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

//! Primitives shared between the planner, the executor and the command surface.
//!
//! Nothing here is global: every primitive is created once at startup and handed to
//! the components that need it.

use async_trait::async_trait;
use fluxion_charge_types::{ExecutorStatus, SlotId};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::traits::{ExternalResult, StatusPublisher};

// ============= Refresh Signal =============

/// Wake-up for a loop that otherwise sleeps for its normal interval.
///
/// A wake sent while nobody waits is kept, so the next `wait` returns at once.
#[derive(Debug, Clone, Default)]
pub struct RefreshSignal {
    notify: Arc<Notify>,
}

impl RefreshSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Returns true when woken, false when `timeout` elapsed first
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

// ============= Status Board =============

/// Latest executor status, replaced as a whole on every publish
#[derive(Debug)]
pub struct StatusBoard {
    current: RwLock<Arc<ExecutorStatus>>,
}

impl StatusBoard {
    pub fn new(initial: ExecutorStatus) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<ExecutorStatus> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, status: Arc<ExecutorStatus>) {
        *self.current.write() = status;
    }
}

#[async_trait]
impl StatusPublisher for StatusBoard {
    async fn publish(&self, status: Arc<ExecutorStatus>) -> ExternalResult<()> {
        self.replace(status);
        Ok(())
    }

    fn name(&self) -> &str {
        "status-board"
    }
}

// ============= In-Flight Slot =============

/// The slot the executor is currently sending a command for, if any
#[derive(Debug, Clone, Default)]
pub struct InFlightSlot {
    slot: Arc<Mutex<Option<SlotId>>>,
}

/// Clears the in-flight marker when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    slot: Arc<Mutex<Option<SlotId>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl InFlightSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as in flight until the returned guard is dropped
    pub fn begin(&self, id: SlotId) -> InFlightGuard {
        *self.slot.lock() = Some(id);
        InFlightGuard {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn current(&self) -> Option<SlotId> {
        *self.slot.lock()
    }

    /// Run `action` unless `id` is in flight. The marker stays locked while `action`
    /// runs, so the executor cannot pick the slot up halfway through.
    pub fn unless_in_flight<T>(&self, id: SlotId, action: impl FnOnce() -> T) -> Option<T> {
        let current = self.slot.lock();
        if *current == Some(id) {
            return None;
        }
        Some(action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_signal() {
        let signal = RefreshSignal::new();
        assert!(!signal.wait(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let signal = RefreshSignal::new();
        signal.notify();
        assert!(signal.wait(Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_wakes_waiting_task() {
        let signal = RefreshSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Duration::from_secs(3600)).await })
        };
        tokio::task::yield_now().await;
        signal.notify();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_board_replaces_whole_snapshot() {
        let board = StatusBoard::new(ExecutorStatus::starting(Utc::now()));
        let before = board.snapshot();

        let mut next = (*before).clone();
        next.message = "Charging slot 7".to_owned();
        next.active_slot_id = Some(7);
        board.publish(Arc::new(next)).await.unwrap();

        let after = board.snapshot();
        assert_eq!(before.message, "Starting");
        assert_eq!(after.message, "Charging slot 7");
        assert_eq!(after.active_slot_id, Some(7));
    }

    #[test]
    fn test_in_flight_blocks_matching_slot_only() {
        let in_flight = InFlightSlot::new();
        let guard = in_flight.begin(3);

        assert_eq!(in_flight.unless_in_flight(3, || "deleted"), None);
        assert_eq!(in_flight.unless_in_flight(4, || "deleted"), Some("deleted"));

        drop(guard);
        assert_eq!(in_flight.current(), None);
        assert_eq!(in_flight.unless_in_flight(3, || "deleted"), Some("deleted"));
    }
}
