//! Adjustment records (append-only)

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::AdjustmentRecord;

fn row_to_adjustment(row: &Row) -> rusqlite::Result<AdjustmentRecord> {
    let created_at: String = row.get(4)?;
    Ok(AdjustmentRecord {
        id: row.get(0)?,
        reconciliation_id: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// The adjustment made for an outcome, if any
    pub fn get_adjustment_for_reconciliation(
        &self,
        reconciliation_id: i64,
    ) -> Result<Option<AdjustmentRecord>> {
        let conn = self.conn()?;
        let adjustment = conn
            .query_row(
                "SELECT id, reconciliation_id, amount, description, created_at
                 FROM adjustments WHERE reconciliation_id = ?",
                params![reconciliation_id],
                row_to_adjustment,
            )
            .optional()?;
        Ok(adjustment)
    }

    /// All adjustments for an account, newest first
    pub fn list_adjustments_for_account(&self, account_id: i64) -> Result<Vec<AdjustmentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.reconciliation_id, a.amount, a.description, a.created_at
             FROM adjustments a
             JOIN reconciliations r ON r.id = a.reconciliation_id
             WHERE r.account_id = ?
             ORDER BY a.created_at DESC, a.id DESC",
        )?;

        let adjustments = stmt
            .query_map(params![account_id], row_to_adjustment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(adjustments)
    }
}
