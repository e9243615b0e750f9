//! Synced actuals

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use tracing::debug;

use super::{format_datetime, Database};
use crate::models::{AggregateResult, CellFailure};
use crate::store::{ActualsStore, StoreResult};

/// One persisted aggregate cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredActual {
    pub tenant_id: String,
    pub category: String,
    pub month_key: String,
    pub amount: f64,
    pub failure: Option<CellFailure>,
    pub synced_at: String,
}

impl Database {
    /// Stored actuals for a year, optionally for one tenant
    pub fn list_actuals(&self, tenant_id: Option<&str>, year: i32) -> StoreResult<Vec<StoredActual>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tenant_id, category, month_key, amount, failure, synced_at FROM monthly_actuals
             WHERE year = ?1 AND (?2 IS NULL OR tenant_id = ?2)
             ORDER BY tenant_id, category, month_key",
        )?;

        let actuals = stmt
            .query_map(params![year, tenant_id], |row| {
                let failure: Option<String> = row.get(4)?;
                Ok(StoredActual {
                    tenant_id: row.get(0)?,
                    category: row.get(1)?,
                    month_key: row.get(2)?,
                    amount: row.get(3)?,
                    failure: failure.and_then(|f| serde_json::from_str(&f).ok()),
                    synced_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(actuals)
    }
}

impl ActualsStore for Database {
    fn save_actuals(&self, aggregate: &AggregateResult) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let synced_at = format_datetime(&Utc::now());

        tx.execute(
            "DELETE FROM monthly_actuals WHERE tenant_id = ? AND year = ?",
            params![aggregate.tenant_id, aggregate.year],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO monthly_actuals
                    (tenant_id, category, year, month_key, amount, failure, synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;

            for (category, month_key, cell) in aggregate.cells() {
                let failure = cell
                    .failure
                    .as_ref()
                    .and_then(|f| serde_json::to_string(f).ok());
                insert.execute(params![
                    aggregate.tenant_id,
                    category,
                    aggregate.year,
                    month_key,
                    cell.amount,
                    failure,
                    synced_at,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            tenant_id = %aggregate.tenant_id,
            year = aggregate.year,
            "Saved actuals"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;
    use std::collections::BTreeMap;

    fn aggregate(amount: f64) -> AggregateResult {
        let mut months = BTreeMap::new();
        months.insert("2025-03-01".to_string(), Cell::actual(amount));
        months.insert(
            "2025-04-01".to_string(),
            Cell::failed(CellFailure::RateLimited { attempts: 3 }),
        );
        let mut categories = BTreeMap::new();
        categories.insert("Food Costs".to_string(), months);
        AggregateResult {
            tenant_id: "t1".into(),
            year: 2025,
            categories,
        }
    }

    #[test]
    fn test_save_actuals_replaces_year() {
        let db = Database::in_memory().unwrap();
        db.save_actuals(&aggregate(100.0)).unwrap();
        db.save_actuals(&aggregate(3120.0)).unwrap();

        let stored = db.list_actuals(Some("t1"), 2025).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].month_key, "2025-03-01");
        assert_eq!(stored[0].amount, 3120.0);
        assert_eq!(stored[0].failure, None);
        assert_eq!(
            stored[1].failure,
            Some(CellFailure::RateLimited { attempts: 3 })
        );
        assert!(db.list_actuals(Some("t2"), 2025).unwrap().is_empty());
    }
}
