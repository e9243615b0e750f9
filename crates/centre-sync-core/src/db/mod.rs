//! SQLite store with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `credentials` - Xero OAuth credentials (implements `CredentialStore`)
//! - `budgets` - Monthly budget figures (implements `BudgetStore`)
//! - `actuals` - Synced actuals (implements `ActualsStore`)

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::StoreError;
use crate::store::StoreResult;

mod actuals;
mod budgets;
mod credentials;

pub use actuals::StoredActual;
pub use budgets::BudgetEntry;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "CENTRE_SYNC_DB_KEY";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> StoreResult<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"centre-sync-v1-k";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| StoreError::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| StoreError::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| StoreError::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a SQLite datetime string into a DateTime<Utc>
///
/// Unparseable values become the Unix epoch, which reads as "expired"
/// and forces a token refresh rather than trusting a corrupt expiry.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open an encrypted database
    ///
    /// Requires the `CENTRE_SYNC_DB_KEY` environment variable. The database
    /// holds OAuth refresh tokens, so unencrypted storage must be requested
    /// explicitly with `new_unencrypted()`.
    pub fn new(path: &str) -> StoreResult<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(StoreError::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open an unencrypted database (development and tests only)
    pub fn new_unencrypted(path: &str) -> StoreResult<Self> {
        Self::new_with_key(path, None)
    }

    /// Open a database with an explicit encryption passphrase
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(8).build(manager)?
        } else {
            Pool::builder().max_size(8).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> StoreResult<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "centre_sync_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> StoreResult<DbConn> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- One live OAuth credential per Xero tenant
            CREATE TABLE IF NOT EXISTS xero_credentials (
                tenant_id TEXT PRIMARY KEY,
                tenant_name TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            -- Monthly budget per tenant and category
            CREATE TABLE IF NOT EXISTS monthly_budgets (
                tenant_id TEXT NOT NULL,
                category TEXT NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
                amount REAL NOT NULL,
                PRIMARY KEY (tenant_id, category, year, month)
            );

            -- Actual spend from Xero, one row per aggregate cell
            CREATE TABLE IF NOT EXISTS monthly_actuals (
                tenant_id TEXT NOT NULL,
                category TEXT NOT NULL,
                year INTEGER NOT NULL,
                month_key TEXT NOT NULL,
                amount REAL NOT NULL,
                failure TEXT,
                synced_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (tenant_id, category, month_key)
            );

            CREATE INDEX IF NOT EXISTS idx_actuals_year ON monthly_actuals(tenant_id, year);
            "#,
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_round_trip_and_fallback() {
        let dt = Utc.with_ymd_and_hms(2025, 4, 30, 23, 59, 1).unwrap();
        assert_eq!(parse_datetime(&format_datetime(&dt)), dt);
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::default());
    }

    #[test]
    fn test_derive_key_is_stable() {
        let a = derive_key("passphrase").unwrap();
        let b = derive_key("passphrase").unwrap();
        let c = derive_key("other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_encrypted_database_requires_same_passphrase() {
        use crate::store::CredentialStore;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new_with_key(path, Some("correct horse")).unwrap();
            db.set_budget("T1", "Food Costs", 2025, 3, 3000.0).unwrap();
        }

        let reopened = Database::new_with_key(path, Some("correct horse")).unwrap();
        assert_eq!(reopened.list_budgets(Some("T1"), 2025).unwrap().len(), 1);
        assert!(reopened.list_all().unwrap().is_empty());
        drop(reopened);

        assert!(Database::new_with_key(path, Some("wrong")).is_err());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.conn().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('xero_credentials', 'monthly_budgets', 'monthly_actuals')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
