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

use chrono::{DateTime, SecondsFormat, Utc};
use fluxion_charge_types::{
    DecisionRecord, NewSlot, PlannerRun, ScheduleSlot, SlotId, SlotOrigin, decision,
};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use std::path::Path;
use tracing::debug;

use super::{ManualInsert, ScheduleStore};
use super::migrations;
use crate::error::{StoreError, StoreResult};

const SLOT_COLUMNS: &str = "id, start_time, end_time, origin, target_soc, price_p_per_kwh, executed,
    expired, decision, decision_at, retry_count, last_retry_utc, manual_override, created_at";

/// SQLite-backed schedule store. One connection, one writer at a time.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    /// `":memory:"` gives a private in-memory store.
    pub fn open(path: &str) -> StoreResult<Self> {
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let version = migrations::apply(&mut conn)?;
        debug!(path, version, "Schedule store ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }

    pub fn schema_version(&self) -> StoreResult<u32> {
        let conn = self.conn.lock();
        migrations::schema_version(&conn)
    }

    fn query_slots(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<ScheduleSlot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SLOT_COLUMNS} FROM charge_slots {filter}"
        ))?;
        let slots = stmt
            .query_map(params, slot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }
}

impl ScheduleStore for SqliteStore {
    fn insert_slots(
        &self,
        slots: &[NewSlot],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleSlot>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(slots.len());
        for slot in slots {
            match insert_one(&tx, slot, created_at)? {
                Some(created) => inserted.push(created),
                None => {
                    debug!(start = %slot.start_time, origin = %slot.origin, "Slot already scheduled, skipping");
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_manual_slot(
        &self,
        slot: &NewSlot,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ManualInsert> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let clash: Option<SlotId> = tx
            .query_row(
                "SELECT id FROM charge_slots
                 WHERE origin = ?3 AND executed = 0 AND expired = 0
                   AND start_time < ?2 AND end_time > ?1
                 ORDER BY start_time, id LIMIT 1",
                params![
                    to_db(slot.start_time),
                    to_db(slot.end_time),
                    SlotOrigin::Manual.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = clash {
            return Ok(ManualInsert::Overlaps(id));
        }

        let outcome = match insert_one(&tx, slot, created_at)? {
            Some(created) => ManualInsert::Created(created),
            None => ManualInsert::Duplicate,
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn get_slot(&self, id: SlotId) -> StoreResult<Option<ScheduleSlot>> {
        let conn = self.conn.lock();
        let slot = conn
            .query_row(
                &format!("SELECT {SLOT_COLUMNS} FROM charge_slots WHERE id = ?1"),
                params![id],
                slot_from_row,
            )
            .optional()?;
        Ok(slot)
    }

    fn slots_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleSlot>> {
        self.query_slots(
            "WHERE start_time < ?2 AND end_time > ?1 ORDER BY start_time, id",
            params![to_db(from), to_db(to)],
        )
    }

    fn active_slots(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleSlot>> {
        self.query_slots(
            "WHERE start_time <= ?1 AND end_time > ?1 AND executed = 0 AND expired = 0
             ORDER BY start_time, id",
            params![to_db(now)],
        )
    }

    fn pending_slots(&self) -> StoreResult<Vec<ScheduleSlot>> {
        self.query_slots(
            "WHERE executed = 0 AND expired = 0 ORDER BY start_time, id",
            [],
        )
    }

    fn next_pending_after(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduleSlot>> {
        let mut slots = self.query_slots(
            "WHERE start_time > ?1 AND executed = 0 AND expired = 0
             ORDER BY start_time, id LIMIT 1",
            params![to_db(now)],
        )?;
        Ok(slots.pop())
    }

    fn finalize_slot(&self, id: SlotId, decision: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE charge_slots SET executed = 1, decision = ?2, decision_at = ?3
             WHERE id = ?1 AND executed = 0 AND expired = 0",
            params![id, decision, to_db(at)],
        )?;
        Ok(changed == 1)
    }

    fn record_retry(&self, id: SlotId, at: DateTime<Utc>) -> StoreResult<Option<u32>> {
        let conn = self.conn.lock();
        let count = conn
            .query_row(
                "UPDATE charge_slots SET retry_count = retry_count + 1, last_retry_utc = ?2
                 WHERE id = ?1 AND executed = 0 AND expired = 0
                 RETURNING retry_count",
                params![id, to_db(at)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<SlotId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "UPDATE charge_slots SET expired = 1, decision = ?2, decision_at = ?1
             WHERE end_time <= ?1 AND executed = 0 AND expired = 0
             RETURNING id",
        )?;
        let mut ids = stmt
            .query_map(params![to_db(now), decision::EXPIRED], |row| row.get(0))?
            .collect::<Result<Vec<SlotId>, _>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    fn last_executed_without_hold(&self) -> StoreResult<Option<ScheduleSlot>> {
        let conn = self.conn.lock();
        let slot = conn
            .query_row(
                &format!(
                    "SELECT {SLOT_COLUMNS} FROM (
                        SELECT * FROM charge_slots WHERE decision = ?1
                        ORDER BY decision_at DESC, id DESC LIMIT 1
                     ) AS latest
                     WHERE NOT EXISTS (
                        SELECT 1 FROM slot_decisions
                        WHERE slot_id = latest.id AND action = ?2
                     )"
                ),
                params![decision::EXECUTED, decision::HOLD],
                slot_from_row,
            )
            .optional()?;
        Ok(slot)
    }

    fn delete_slot(&self, id: SlotId) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM charge_slots WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }

    fn record_decision(&self, record: &DecisionRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO slot_decisions
                (slot_id, action, reason, soc, power_flow_kw, grid_connected, price_p_per_kwh, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.slot_id,
                record.action,
                record.reason,
                record.soc,
                record.power_flow_kw,
                record.grid_connected,
                record.price_p_per_kwh,
                to_db(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn recent_decisions(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT slot_id, action, reason, soc, power_flow_kw, grid_connected, price_p_per_kwh, recorded_at
             FROM slot_decisions ORDER BY recorded_at DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![limit], |row| {
                Ok(DecisionRecord {
                    slot_id: row.get(0)?,
                    action: row.get(1)?,
                    reason: row.get(2)?,
                    soc: row.get(3)?,
                    power_flow_kw: row.get(4)?,
                    grid_connected: row.get(5)?,
                    price_p_per_kwh: row.get(6)?,
                    recorded_at: timestamp(row, 7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn record_planner_run(&self, run: &PlannerRun) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO planner_runs
                (ran_at, horizon_start, horizon_end, requested, inserted, succeeded, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_db(run.ran_at),
                to_db(run.horizon_start),
                to_db(run.horizon_end),
                run.requested,
                run.inserted,
                run.succeeded,
                run.detail,
            ],
        )?;
        Ok(())
    }

    fn last_planner_run(&self) -> StoreResult<Option<PlannerRun>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT ran_at, horizon_start, horizon_end, requested, inserted, succeeded, detail
                 FROM planner_runs ORDER BY ran_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(PlannerRun {
                        ran_at: timestamp(row, 0)?,
                        horizon_start: timestamp(row, 1)?,
                        horizon_end: timestamp(row, 2)?,
                        requested: row.get(3)?,
                        inserted: row.get(4)?,
                        succeeded: row.get(5)?,
                        detail: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }
}

// ============= Row Mapping =============

/// Insert one slot inside an open transaction. None when it duplicates an existing slot.
fn insert_one(
    tx: &rusqlite::Transaction<'_>,
    slot: &NewSlot,
    created_at: DateTime<Utc>,
) -> rusqlite::Result<Option<ScheduleSlot>> {
    let changed = tx
        .prepare_cached(
            "INSERT OR IGNORE INTO charge_slots
                (start_time, end_time, origin, target_soc, price_p_per_kwh, manual_override, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            to_db(slot.start_time),
            to_db(slot.end_time),
            slot.origin.as_str(),
            slot.target_soc,
            slot.price_p_per_kwh,
            slot.manual_override,
            to_db(created_at),
        ])?;
    if changed == 0 {
        return Ok(None);
    }
    Ok(Some(ScheduleSlot {
        id: tx.last_insert_rowid(),
        start_time: slot.start_time,
        end_time: slot.end_time,
        origin: slot.origin,
        target_soc: slot.target_soc,
        price_p_per_kwh: slot.price_p_per_kwh,
        executed: false,
        expired: false,
        decision: None,
        decision_at: None,
        retry_count: 0,
        last_retry_utc: None,
        manual_override: slot.manual_override,
        created_at: from_db(&to_db(created_at)).unwrap_or(created_at),
    }))
}

/// Fixed-width UTC text so that lexical order matches time order in SQL comparisons
fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_db(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        from_db(&value)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleSlot> {
    let origin: String = row.get(3)?;
    Ok(ScheduleSlot {
        id: row.get(0)?,
        start_time: timestamp(row, 1)?,
        end_time: timestamp(row, 2)?,
        origin: origin
            .parse()
            .map_err(|e: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?,
        target_soc: row.get(4)?,
        price_p_per_kwh: row.get(5)?,
        executed: row.get(6)?,
        expired: row.get(7)?,
        decision: row.get(8)?,
        decision_at: optional_timestamp(row, 9)?,
        retry_count: row.get(10)?,
        last_retry_utc: optional_timestamp(row, 11)?,
        manual_override: row.get(12)?,
        created_at: timestamp(row, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn half_hour(h: u32, m: u32, price: f64) -> NewSlot {
        NewSlot::scheduled(at(h, m), at(h, m) + Duration::minutes(30), 95, price)
    }

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.schema_version().unwrap(),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn test_open_on_disk_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("schedule.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).unwrap();
            store.insert_slots(&[half_hour(1, 0, 5.0)], at(0, 0)).unwrap();
        }

        let reopened = SqliteStore::open(path).unwrap();
        assert_eq!(reopened.pending_slots().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_round_trips_all_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manual = NewSlot::manual(at(3, 0), at(4, 0), 80);

        let inserted = store.insert_slots(&[manual.clone()], at(0, 0)).unwrap();
        assert_eq!(inserted.len(), 1);

        let loaded = store.get_slot(inserted[0].id).unwrap().unwrap();
        assert_eq!(loaded, inserted[0]);
        assert_eq!(loaded.origin, SlotOrigin::Manual);
        assert!(loaded.manual_override);
        assert_eq!(loaded.target_soc, 80);
        assert_eq!(loaded.price_p_per_kwh, None);
    }

    #[test]
    fn test_duplicate_slots_are_skipped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .insert_slots(&[half_hour(1, 0, 5.0), half_hour(1, 30, 6.0)], at(0, 0))
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = store
            .insert_slots(&[half_hour(1, 30, 6.0), half_hour(2, 0, 7.0)], at(0, 10))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].start_time, at(2, 0));
        assert_eq!(store.pending_slots().unwrap().len(), 3);
    }

    #[test]
    fn test_window_and_active_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_slots(
                &[half_hour(1, 0, 5.0), half_hour(1, 30, 6.0), half_hour(3, 0, 4.0)],
                at(0, 0),
            )
            .unwrap();

        let window = store.slots_in_window(at(1, 15), at(2, 0)).unwrap();
        assert_eq!(window.len(), 2);

        let active = store.active_slots(at(1, 30)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].start_time, at(1, 30));

        let next = store.next_pending_after(at(1, 30)).unwrap().unwrap();
        assert_eq!(next.start_time, at(3, 0));
    }

    #[test]
    fn test_finalize_is_one_way() {
        let store = SqliteStore::open_in_memory().unwrap();
        let slot = store.insert_slots(&[half_hour(1, 0, 5.0)], at(0, 0)).unwrap()[0].clone();

        assert!(store.finalize_slot(slot.id, decision::EXECUTED, at(1, 1)).unwrap());
        assert!(!store.finalize_slot(slot.id, decision::FAILED, at(1, 2)).unwrap());
        assert_eq!(store.record_retry(slot.id, at(1, 3)).unwrap(), None);

        let loaded = store.get_slot(slot.id).unwrap().unwrap();
        assert!(loaded.executed);
        assert_eq!(loaded.decision.as_deref(), Some(decision::EXECUTED));
        assert_eq!(loaded.decision_at, Some(at(1, 1)));
        assert!(store.active_slots(at(1, 10)).unwrap().is_empty());
    }

    #[test]
    fn test_retry_counts_up() {
        let store = SqliteStore::open_in_memory().unwrap();
        let slot = store.insert_slots(&[half_hour(1, 0, 5.0)], at(0, 0)).unwrap()[0].clone();

        assert_eq!(store.record_retry(slot.id, at(1, 1)).unwrap(), Some(1));
        assert_eq!(store.record_retry(slot.id, at(1, 2)).unwrap(), Some(2));

        let loaded = store.get_slot(slot.id).unwrap().unwrap();
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.last_retry_utc, Some(at(1, 2)));
        assert!(!loaded.executed);
    }

    #[test]
    fn test_expire_overdue_skips_executed_and_open_slots() {
        let store = SqliteStore::open_in_memory().unwrap();
        let slots = store
            .insert_slots(
                &[half_hour(1, 0, 5.0), half_hour(1, 30, 6.0), half_hour(2, 0, 7.0)],
                at(0, 0),
            )
            .unwrap();
        store
            .finalize_slot(slots[1].id, decision::EXECUTED, at(1, 30))
            .unwrap();

        let expired = store.expire_overdue(at(2, 0)).unwrap();
        assert_eq!(expired, vec![slots[0].id]);

        let loaded = store.get_slot(slots[0].id).unwrap().unwrap();
        assert!(loaded.expired);
        assert!(!loaded.executed);
        assert_eq!(loaded.decision.as_deref(), Some(decision::EXPIRED));

        // An expired slot can no longer be executed
        assert!(!store.finalize_slot(slots[0].id, decision::EXECUTED, at(2, 1)).unwrap());
        assert!(store.expire_overdue(at(2, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_delete_slot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let slot = store.insert_slots(&[half_hour(1, 0, 5.0)], at(0, 0)).unwrap()[0].clone();

        assert!(store.delete_slot(slot.id).unwrap());
        assert!(!store.delete_slot(slot.id).unwrap());
        assert!(store.get_slot(slot.id).unwrap().is_none());
    }

    #[test]
    fn test_decision_log_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (minute, action) in [(0, "executed"), (5, "hold"), (10, "expired")] {
            store
                .record_decision(&DecisionRecord::new(
                    Some(1),
                    action,
                    "test",
                    None,
                    Some(4.2),
                    at(1, minute),
                ))
                .unwrap();
        }

        let recent = store.recent_decisions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "expired");
        assert_eq!(recent[1].action, "hold");
    }

    #[test]
    fn test_last_planner_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.last_planner_run().unwrap().is_none());

        for (hour, succeeded) in [(0, true), (8, false)] {
            store
                .record_planner_run(&PlannerRun {
                    ran_at: at(hour, 0),
                    horizon_start: at(hour, 0),
                    horizon_end: at(hour, 0) + Duration::hours(24),
                    requested: 4,
                    inserted: if succeeded { 4 } else { 0 },
                    succeeded,
                    detail: None,
                })
                .unwrap();
        }

        let last = store.last_planner_run().unwrap().unwrap();
        assert_eq!(last.ran_at, at(8, 0));
        assert!(!last.succeeded);
    }

    #[test]
    fn test_manual_insert_rejects_pending_manual_overlap() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_slots(&[half_hour(3, 0, 5.0)], at(0, 0)).unwrap();

        // Scheduler slots do not block manual ones
        let ManualInsert::Created(first) = store
            .insert_manual_slot(&NewSlot::manual(at(3, 0), at(4, 0), 80), at(1, 0))
            .unwrap()
        else {
            panic!("manual slot not created");
        };

        assert_eq!(
            store
                .insert_manual_slot(&NewSlot::manual(at(3, 30), at(4, 30), 90), at(1, 0))
                .unwrap(),
            ManualInsert::Overlaps(first.id)
        );

        // Once closed, the window is free again but the exact duplicate stays unique
        store.finalize_slot(first.id, decision::EXECUTED, at(3, 0)).unwrap();
        assert_eq!(
            store
                .insert_manual_slot(&NewSlot::manual(at(3, 0), at(4, 0), 80), at(1, 0))
                .unwrap(),
            ManualInsert::Duplicate
        );
        assert!(matches!(
            store
                .insert_manual_slot(&NewSlot::manual(at(3, 30), at(4, 30), 90), at(1, 0))
                .unwrap(),
            ManualInsert::Created(_)
        ));
    }

    #[test]
    fn test_last_executed_without_hold() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.last_executed_without_hold().unwrap(), None);

        let slots = store
            .insert_slots(&[half_hour(1, 0, 5.0), half_hour(2, 0, 6.0)], at(0, 0))
            .unwrap();
        store.finalize_slot(slots[0].id, decision::EXECUTED, at(1, 5)).unwrap();
        store.finalize_slot(slots[1].id, decision::FAILED, at(2, 5)).unwrap();

        let running = store.last_executed_without_hold().unwrap().unwrap();
        assert_eq!(running.id, slots[0].id);

        store
            .record_decision(&DecisionRecord::new(
                Some(slots[0].id),
                decision::HOLD,
                "charging window closed",
                None,
                None,
                at(1, 30),
            ))
            .unwrap();
        assert_eq!(store.last_executed_without_hold().unwrap(), None);
    }
}
