// src/error.rs

//! Unified error handling for the paper tracker.

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{PaperId, Source};

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Date range whose start lies after its end
    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// A source exhausted its retry budget
    #[error("Fetch from {origin} failed after {attempts} attempts: {message}")]
    FetchFailed {
        origin: Source,
        attempts: u32,
        message: String,
    },

    /// A single source-native record could not be normalized
    #[error("Malformed {origin} record: {message}")]
    MalformedRecord { origin: Source, message: String },

    /// The store rejected a write for one record
    #[error("Store write failed for {id}: {message}")]
    StoreWriteFailed { id: String, message: String },

    /// No paper with the given identity
    #[error("No such paper: {0}")]
    NotFound(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Store bookkeeping failed outside SQLite itself
    #[error("Storage error: {0}")]
    Storage(String),

    /// Atom feed parsing failed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an inverted-range error.
    pub fn invalid_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self::InvalidRange { start, end }
    }

    /// Create a fetch failure for a source.
    pub fn fetch_failed(origin: Source, attempts: u32, message: impl fmt::Display) -> Self {
        Self::FetchFailed {
            origin,
            attempts,
            message: message.to_string(),
        }
    }

    /// Create a malformed record error.
    pub fn malformed(origin: Source, message: impl fmt::Display) -> Self {
        Self::MalformedRecord {
            origin,
            message: message.to_string(),
        }
    }

    /// Create a store write failure for a paper.
    pub fn store_write(id: &PaperId, message: impl fmt::Display) -> Self {
        Self::StoreWriteFailed {
            id: id.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a not-found error for a paper identity.
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error rejects the request itself rather than one unit of work.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::NotFound(_) | Self::Validation(_)
        )
    }
}
