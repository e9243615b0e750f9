//! Error types for centre-sync
//!
//! Failures are recovered at the narrowest scope that can absorb them:
//! a `FetchError` becomes a failed cell, an `AuthError` fails one tenant,
//! and only `Error` reaches the caller of a sync run.

use thiserror::Error;

/// Run-level and infrastructure errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Xero request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the credential, budget and actuals stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No record for {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The record changed underneath a conditional write
    #[error("Conflicting update for tenant {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Fatal token errors. The tenant needs re-authorization before it can sync again.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("XERO_CLIENT_ID / XERO_CLIENT_SECRET are not configured")]
    MissingClientCredentials,

    #[error("Token endpoint rejected refresh (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token response is missing `{0}`")]
    MissingField(&'static str),

    #[error("Token response is not valid JSON: {0}")]
    InvalidResponse(String),

    #[error("Identity endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to persist refreshed credential: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single Xero API request after the retry policy ran
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("access token rejected")]
    Unauthorized,

    #[error("request rejected with HTTP {status}")]
    Rejected { status: u16 },
}
