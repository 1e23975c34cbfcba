//! Reconciliation outcome operations

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NewReconciliation, ReconciliationOutcome, ReconciliationStatus};

const OUTCOME_COLUMNS: &str = "id, account_id, local_balance, external_balance, difference, status, type, error_message, created_at, updated_at";

/// How a reconciliation attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResolution {
    /// Discrepancy within tolerance, nothing to correct
    Settled,
    /// The provider accepted an adjustment; local balance follows the provider
    Adjusted {
        amount: f64,
        description: String,
        external_balance: f64,
    },
    /// Held for manual review
    Held { reason: String },
    Failed { error: String },
}

impl AttemptResolution {
    fn terminal_status(&self) -> ReconciliationStatus {
        match self {
            Self::Settled | Self::Adjusted { .. } => ReconciliationStatus::Completed,
            Self::Held { .. } => ReconciliationStatus::Pending,
            Self::Failed { .. } => ReconciliationStatus::Failed,
        }
    }

    fn message(&self) -> Option<&str> {
        match self {
            Self::Held { reason } => Some(reason),
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

fn row_to_outcome(row: &Row) -> rusqlite::Result<ReconciliationOutcome> {
    let status: String = row.get(5)?;
    let kind: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(ReconciliationOutcome {
        id: row.get(0)?,
        account_id: row.get(1)?,
        local_balance: row.get(2)?,
        external_balance: row.get(3)?,
        difference: row.get(4)?,
        status: status.parse().unwrap_or(ReconciliationStatus::Failed),
        reconciliation_type: kind.parse().unwrap_or_default(),
        error_message: row.get(7)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl Database {
    /// Move an outcome to a new status. Completed and failed outcomes are final.
    pub fn update_reconciliation_status(
        &self,
        id: i64,
        status: ReconciliationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM reconciliations WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let current: ReconciliationStatus = current
            .ok_or_else(|| Error::NotFound(format!("Reconciliation {}", id)))?
            .parse()
            .map_err(Error::InvalidData)?;
        if current.is_terminal() {
            return Err(Error::InvalidData(format!(
                "Reconciliation {} is already {}",
                id, current
            )));
        }

        conn.execute(
            "UPDATE reconciliations SET status = ?, error_message = ?, updated_at = datetime('now') WHERE id = ?",
            params![status.as_str(), error_message, id],
        )?;
        Ok(())
    }

    /// Get an outcome by ID
    pub fn get_reconciliation(&self, id: i64) -> Result<Option<ReconciliationOutcome>> {
        let conn = self.conn()?;
        let outcome = conn
            .query_row(
                &format!(
                    "SELECT {} FROM reconciliations WHERE id = ?",
                    OUTCOME_COLUMNS
                ),
                params![id],
                row_to_outcome,
            )
            .optional()?;
        Ok(outcome)
    }

    /// An account's outcomes, newest first
    pub fn list_reconciliations_for_account(
        &self,
        account_id: i64,
        limit: usize,
    ) -> Result<Vec<ReconciliationOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reconciliations WHERE account_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
            OUTCOME_COLUMNS
        ))?;

        let outcomes = stmt
            .query_map(params![account_id, limit as i64], row_to_outcome)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }

    /// An account's outcomes created strictly before `before`, newest first
    pub fn list_reconciliations_before(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReconciliationOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reconciliations WHERE account_id = ? AND created_at < ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
            OUTCOME_COLUMNS
        ))?;

        let outcomes = stmt
            .query_map(
                params![account_id, format_datetime(&before), limit as i64],
                row_to_outcome,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }

    /// Most recent outcomes across all accounts
    pub fn list_recent_reconciliations(&self, limit: usize) -> Result<Vec<ReconciliationOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reconciliations ORDER BY created_at DESC, id DESC LIMIT ?",
            OUTCOME_COLUMNS
        ))?;

        let outcomes = stmt
            .query_map(params![limit as i64], row_to_outcome)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }

    /// All outcomes with a given status, oldest first
    pub fn list_reconciliations_by_status(
        &self,
        status: ReconciliationStatus,
    ) -> Result<Vec<ReconciliationOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reconciliations WHERE status = ? ORDER BY created_at, id",
            OUTCOME_COLUMNS
        ))?;

        let outcomes = stmt
            .query_map(params![status.as_str()], row_to_outcome)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }

    /// Count outcomes with a given status created at or after `since`
    pub fn count_reconciliations_since(
        &self,
        status: ReconciliationStatus,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reconciliations WHERE status = ? AND created_at >= ?",
            params![status.as_str(), format_datetime(&since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Persist one reconciliation attempt atomically
    ///
    /// The outcome row is written as `in_progress`, the adjustment and
    /// balance update (if any) follow, and the row is moved to its terminal
    /// status. Any failure rolls back every write of the attempt.
    pub fn record_attempt(
        &self,
        new: &NewReconciliation,
        resolution: &AttemptResolution,
        at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        let conn = self.conn()?;

        // Use explicit transaction for atomicity
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;

        let result = (|| {
            let id = insert_outcome(&conn, new, ReconciliationStatus::InProgress, at)?;

            if let AttemptResolution::Adjusted {
                amount,
                description,
                external_balance,
            } = resolution
            {
                conn.execute(
                    "INSERT INTO adjustments (reconciliation_id, amount, description, created_at)
                     VALUES (?, ?, ?, ?)",
                    params![id, amount, description, format_datetime(&at)],
                )?;
                let updated = conn.execute(
                    "UPDATE accounts SET current_balance = ?, last_sync = ?, updated_at = ? WHERE id = ?",
                    params![
                        external_balance,
                        format_datetime(&at),
                        format_datetime(&at),
                        new.account_id
                    ],
                )?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("Account {}", new.account_id)));
                }
            }

            conn.execute(
                "UPDATE reconciliations SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
                params![
                    resolution.terminal_status().as_str(),
                    resolution.message(),
                    format_datetime(&at),
                    id
                ],
            )?;
            Ok(id)
        })();

        match result {
            Ok(id) => {
                conn.execute("COMMIT", [])?;
                drop(conn);
                self.get_reconciliation(id)?
                    .ok_or_else(|| Error::NotFound(format!("Reconciliation {}", id)))
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

fn insert_outcome(
    conn: &rusqlite::Connection,
    new: &NewReconciliation,
    status: ReconciliationStatus,
    at: DateTime<Utc>,
) -> Result<i64> {
    let at = format_datetime(&at);
    conn.execute(
        "INSERT INTO reconciliations
            (account_id, local_balance, external_balance, difference, status, type, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            new.account_id,
            new.local_balance,
            new.external_balance,
            new.difference,
            status.as_str(),
            new.reconciliation_type.as_str(),
            at,
            at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
