//! SQLite ledger backing the Quota Store.
//!
//! Every mutation is a single SQL statement on the row, so concurrent
//! writers cannot interleave a read-modify-write:
//! - purchases increment `total_minutes` in place
//! - usage reports raise `used_minutes` with `MAX`, so a stale report from a
//!   second session never rolls consumption back

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{clamp_minutes, UserQuota};
use crate::error::{DatabaseError, QuotaError};
use crate::storage::migrations;

/// One accepted usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub user_id: String,
    pub used_minutes: u32,
    pub reported_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

pub struct QuotaLedger {
    conn: Connection,
}

impl QuotaLedger {
    /// Open (or create) the ledger at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory ledger.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Create the record for a new account with `bonus_minutes` granted.
    pub fn create_account(&self, user_id: &str, bonus_minutes: u32) -> Result<UserQuota, QuotaError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_quota (user_id, total_minutes, used_minutes, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![user_id, bonus_minutes, now],
            )
            .map_err(DatabaseError::from)?;
        if inserted == 0 {
            return Err(QuotaError::Conflict {
                user_id: user_id.to_string(),
            });
        }
        self.get(user_id)?.ok_or_else(|| QuotaError::NotFound {
            user_id: user_id.to_string(),
        })
    }

    pub fn get(&self, user_id: &str) -> Result<Option<UserQuota>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT total_minutes, used_minutes, updated_at FROM user_quota WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(total, used, updated_at)| UserQuota {
            total_minutes: clamp_minutes(total),
            used_minutes: clamp_minutes(used),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    /// Raise `used_minutes` to at least `used_minutes` and log the report.
    /// Returns `false` if the user has no record.
    pub fn record_usage(
        &self,
        user_id: &str,
        used_minutes: u32,
        reported_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE user_quota
             SET used_minutes = MAX(used_minutes, ?2), updated_at = ?3
             WHERE user_id = ?1",
            params![user_id, used_minutes, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO checkpoint_log (user_id, used_minutes, reported_at, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, used_minutes, reported_at.to_rfc3339(), now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Atomically add purchased minutes. `None` if the user has no record.
    pub fn add_minutes(&self, user_id: &str, minutes: u32) -> Result<Option<UserQuota>, DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE user_quota
             SET total_minutes = total_minutes + ?2, updated_at = ?3
             WHERE user_id = ?1",
            params![user_id, minutes, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.get(user_id)
    }

    /// Start a new accounting window. `None` if the user has no record.
    pub fn reset_usage(&self, user_id: &str) -> Result<Option<UserQuota>, DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE user_quota SET used_minutes = 0, updated_at = ?2 WHERE user_id = ?1",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.get(user_id)
    }

    /// Most recent usage reports for a user, newest first.
    pub fn checkpoint_history(&self, user_id: &str, limit: usize) -> Result<Vec<CheckpointRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, used_minutes, reported_at, received_at
             FROM checkpoint_log
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (user_id, used, reported_at, received_at) = row?;
            records.push(CheckpointRecord {
                user_id,
                used_minutes: clamp_minutes(used),
                reported_at: parse_timestamp(&reported_at).unwrap_or_default(),
                received_at: parse_timestamp(&received_at).unwrap_or_default(),
            });
        }
        Ok(records)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
