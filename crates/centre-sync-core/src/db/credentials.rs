//! Xero credential operations

use rusqlite::{params, OptionalExtension, Row};

use super::{format_datetime, parse_datetime, Database};
use crate::error::StoreError;
use crate::models::{CredentialUpdate, TenantCredential};
use crate::store::{CredentialStore, StoreResult};

const CREDENTIAL_COLUMNS: &str =
    "tenant_id, tenant_name, access_token, refresh_token, expires_at, updated_at";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<TenantCredential> {
    let expires_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(TenantCredential {
        tenant_id: row.get(0)?,
        tenant_name: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_at: parse_datetime(&expires_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl Database {
    /// Update the display name for a tenant (from the connections endpoint)
    pub fn set_tenant_name(&self, tenant_id: &str, name: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE xero_credentials SET tenant_name = ? WHERE tenant_id = ?",
            params![name, tenant_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(tenant_id.to_string()));
        }
        Ok(())
    }
}

impl CredentialStore for Database {
    fn get(&self, tenant_id: &str) -> StoreResult<TenantCredential> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM xero_credentials WHERE tenant_id = ?",
                CREDENTIAL_COLUMNS
            ),
            params![tenant_id],
            credential_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(tenant_id.to_string()))
    }

    fn list_all(&self) -> StoreResult<Vec<TenantCredential>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM xero_credentials ORDER BY tenant_id",
            CREDENTIAL_COLUMNS
        ))?;

        let credentials = stmt
            .query_map([], credential_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(credentials)
    }

    fn update(&self, tenant_id: &str, update: &CredentialUpdate) -> StoreResult<()> {
        let conn = self.conn()?;

        // Conditional on the exchanged refresh token so a concurrent refresh can't be overwritten
        let changed = conn.execute(
            "UPDATE xero_credentials
             SET access_token = ?, refresh_token = ?, expires_at = ?, updated_at = ?
             WHERE tenant_id = ? AND refresh_token = ?",
            params![
                update.access_token,
                update.refresh_token,
                format_datetime(&update.expires_at),
                format_datetime(&update.updated_at),
                tenant_id,
                update.previous_refresh_token,
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM xero_credentials WHERE tenant_id = ?)",
            params![tenant_id],
            |row| row.get(0),
        )?;

        if exists {
            Err(StoreError::Conflict(tenant_id.to_string()))
        } else {
            Err(StoreError::NotFound(tenant_id.to_string()))
        }
    }

    fn upsert(&self, credential: &TenantCredential) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO xero_credentials
                (tenant_id, tenant_name, access_token, refresh_token, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                tenant_name = COALESCE(excluded.tenant_name, xero_credentials.tenant_name),
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                credential.tenant_id,
                credential.tenant_name,
                credential.access_token,
                credential.refresh_token,
                format_datetime(&credential.expires_at),
                format_datetime(&credential.updated_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn credential(tenant_id: &str) -> TenantCredential {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        TenantCredential {
            tenant_id: tenant_id.into(),
            tenant_name: Some("Papamoa Beach".into()),
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
            expires_at: at + Duration::minutes(30),
            updated_at: at,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let db = Database::in_memory().unwrap();
        db.upsert(&credential("t1")).unwrap();

        let stored = db.get("t1").unwrap();
        assert_eq!(stored, credential("t1"));
        assert!(matches!(db.get("t2"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_upsert_replaces_single_record() {
        let db = Database::in_memory().unwrap();
        db.upsert(&credential("t1")).unwrap();

        let mut replacement = credential("t1");
        replacement.tenant_name = None;
        replacement.refresh_token = "refresh-2".into();
        db.upsert(&replacement).unwrap();

        let all = db.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].refresh_token, "refresh-2");
        // Name is kept when the new record doesn't carry one
        assert_eq!(all[0].tenant_name.as_deref(), Some("Papamoa Beach"));
    }

    #[test]
    fn test_update_is_conditional_on_previous_refresh_token() {
        let db = Database::in_memory().unwrap();
        db.upsert(&credential("t1")).unwrap();

        let now = Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap();
        let mut update = CredentialUpdate {
            access_token: "access-2".into(),
            refresh_token: "refresh-2".into(),
            expires_at: now + Duration::minutes(30),
            updated_at: now,
            previous_refresh_token: "refresh-1".into(),
        };
        db.update("t1", &update).unwrap();

        let stored = db.get("t1").unwrap();
        assert_eq!(stored.access_token, "access-2");
        assert_eq!(stored.refresh_token, "refresh-2");
        assert_eq!(stored.updated_at, now);

        // Replaying the same exchange now conflicts
        update.access_token = "access-3".into();
        assert!(matches!(
            db.update("t1", &update),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            db.update("missing", &update),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(db.get("t1").unwrap().access_token, "access-2");
    }

    #[test]
    fn test_set_tenant_name() {
        let db = Database::in_memory().unwrap();
        db.upsert(&credential("t1")).unwrap();
        db.set_tenant_name("t1", "The Bach").unwrap();
        assert_eq!(db.get("t1").unwrap().tenant_name.as_deref(), Some("The Bach"));
        assert!(db.set_tenant_name("t9", "x").is_err());
    }
}
