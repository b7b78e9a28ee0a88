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

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};

/// One additive schema step. Applied versions are tracked in `PRAGMA user_version`.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "charge slot table",
        sql: "CREATE TABLE IF NOT EXISTS charge_slots (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time  TEXT NOT NULL,
                end_time    TEXT NOT NULL,
                origin      TEXT NOT NULL DEFAULT 'scheduler',
                executed    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_charge_slots_window
                ON charge_slots(start_time, end_time);",
    },
    Migration {
        version: 2,
        description: "execution bookkeeping columns",
        sql: "ALTER TABLE charge_slots ADD COLUMN expired INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE charge_slots ADD COLUMN decision TEXT;
            ALTER TABLE charge_slots ADD COLUMN decision_at TEXT;
            ALTER TABLE charge_slots ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE charge_slots ADD COLUMN last_retry_utc TEXT;
            ALTER TABLE charge_slots ADD COLUMN price_p_per_kwh REAL;",
    },
    Migration {
        version: 3,
        description: "target SoC and manual override",
        sql: "ALTER TABLE charge_slots ADD COLUMN target_soc INTEGER NOT NULL DEFAULT 95;
            ALTER TABLE charge_slots ADD COLUMN manual_override INTEGER NOT NULL DEFAULT 0;",
    },
    Migration {
        version: 4,
        description: "duplicate guard, decision audit and planner run log",
        sql: "DELETE FROM charge_slots WHERE id NOT IN (
                SELECT MIN(id) FROM charge_slots GROUP BY start_time, end_time, origin
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_charge_slots_unique
                ON charge_slots(start_time, end_time, origin);

            CREATE TABLE IF NOT EXISTS slot_decisions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                slot_id         INTEGER,
                action          TEXT NOT NULL,
                reason          TEXT NOT NULL,
                soc             INTEGER,
                power_flow_kw   REAL,
                grid_connected  INTEGER,
                price_p_per_kwh REAL,
                recorded_at     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_slot_decisions_time
                ON slot_decisions(recorded_at DESC);

            CREATE TABLE IF NOT EXISTS planner_runs (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                ran_at         TEXT NOT NULL,
                horizon_start  TEXT NOT NULL,
                horizon_end    TEXT NOT NULL,
                requested      INTEGER NOT NULL,
                inserted       INTEGER NOT NULL,
                succeeded      INTEGER NOT NULL,
                detail         TEXT
            );",
    },
];

pub const LATEST_SCHEMA_VERSION: u32 = 4;

pub(super) fn schema_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the schema up to `LATEST_SCHEMA_VERSION`, one transaction per step
pub(super) fn apply(conn: &mut Connection) -> StoreResult<u32> {
    let current = schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        warn!(
            current,
            latest = LATEST_SCHEMA_VERSION,
            "Database schema is newer than this build"
        );
        return Ok(current);
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                description: migration.description,
                source,
            })?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        info!(
            version = migration.version,
            "Applied schema migration: {}", migration.description
        );
    }

    schema_version(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_contiguous() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1);
        }
        assert_eq!(
            MIGRATIONS.last().map(|m| m.version),
            Some(LATEST_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply(&mut conn).unwrap(), LATEST_SCHEMA_VERSION);
        assert_eq!(apply(&mut conn).unwrap(), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_upgrade_preserves_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO charge_slots (start_time, end_time, origin, created_at)
             VALUES ('2025-01-01T01:00:00.000000Z', '2025-01-01T01:30:00.000000Z', 'scheduler',
                     '2025-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        // Duplicate left behind by an older build
        conn.execute(
            "INSERT INTO charge_slots (start_time, end_time, origin, created_at)
             VALUES ('2025-01-01T01:00:00.000000Z', '2025-01-01T01:30:00.000000Z', 'scheduler',
                     '2025-01-01T00:05:00.000000Z')",
            [],
        )
        .unwrap();

        assert_eq!(apply(&mut conn).unwrap(), LATEST_SCHEMA_VERSION);

        let (count, target_soc, retry_count): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), MIN(target_soc), MIN(retry_count) FROM charge_slots",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(target_soc, 95);
        assert_eq!(retry_count, 0);
    }
}
