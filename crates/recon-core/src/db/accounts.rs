//! Account operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Account, NewAccount};

const ACCOUNT_COLUMNS: &str =
    "id, external_ref, name, current_balance, last_sync, created_at, updated_at";

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    let last_sync: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Account {
        id: row.get(0)?,
        external_ref: row.get(1)?,
        name: row.get(2)?,
        current_balance: row.get(3)?,
        last_sync: last_sync.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl Database {
    /// Register an account. External references are unique.
    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        if account.external_ref.trim().is_empty() {
            return Err(Error::InvalidData(
                "external_ref must not be empty".to_string(),
            ));
        }

        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM accounts WHERE external_ref = ?",
                params![account.external_ref],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(Error::InvalidData(format!(
                "Account with external_ref '{}' already exists",
                account.external_ref
            )));
        }

        conn.execute(
            "INSERT INTO accounts (external_ref, name, current_balance) VALUES (?, ?, ?)",
            params![account.external_ref, account.name, account.current_balance],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_account(id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", id)))
    }

    /// List all accounts
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Get an account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
                params![id],
                row_to_account,
            )
            .optional()?;

        Ok(account)
    }
}
