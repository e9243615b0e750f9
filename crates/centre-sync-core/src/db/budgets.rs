//! Monthly budget operations

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::Database;
use crate::error::StoreError;
use crate::store::{BudgetStore, StoreResult};

/// A stored monthly budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetEntry {
    pub tenant_id: String,
    pub category: String,
    pub year: i32,
    pub month: u32,
    pub amount: f64,
}

impl Database {
    /// Set (or replace) the budget for one category and month
    pub fn set_budget(
        &self,
        tenant_id: &str,
        category: &str,
        year: i32,
        month: u32,
        amount: f64,
    ) -> StoreResult<()> {
        if !(1..=12).contains(&month) {
            return Err(StoreError::InvalidData(format!(
                "month must be 1-12, got {}",
                month
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO monthly_budgets (tenant_id, category, year, month, amount)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, category, year, month) DO UPDATE SET amount = excluded.amount",
            params![tenant_id, category, year, month, amount],
        )?;
        Ok(())
    }

    /// List budgets for a year, optionally for one tenant
    pub fn list_budgets(&self, tenant_id: Option<&str>, year: i32) -> StoreResult<Vec<BudgetEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tenant_id, category, year, month, amount FROM monthly_budgets
             WHERE year = ?1 AND (?2 IS NULL OR tenant_id = ?2)
             ORDER BY tenant_id, category, month",
        )?;

        let entries = stmt
            .query_map(params![year, tenant_id], |row| {
                Ok(BudgetEntry {
                    tenant_id: row.get(0)?,
                    category: row.get(1)?,
                    year: row.get(2)?,
                    month: row.get(3)?,
                    amount: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}

impl BudgetStore for Database {
    fn monthly_budget(
        &self,
        tenant_id: &str,
        category: &str,
        year: i32,
        month: u32,
    ) -> StoreResult<Option<f64>> {
        let conn = self.conn()?;
        let amount = conn
            .query_row(
                "SELECT amount FROM monthly_budgets
                 WHERE tenant_id = ? AND category = ? AND year = ? AND month = ?",
                params![tenant_id, category, year, month],
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount)
    }
}
