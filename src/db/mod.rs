//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed entities and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `tg_relaybot::db`; the repository API
//! and commonly used models are re-exported here.

pub mod model;
pub mod repo;

use thiserror::Error;

pub use model::{Job, JobRecord, ListSummary};
pub use repo::*;

/// Failure of the persistence layer.
///
/// Only duplicate names are interpreted; every other constraint or I/O
/// problem surfaces as `Database`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("list {0} does not exist")]
    MissingList(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Map a unique-constraint violation to `Duplicate(what)`.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(what.into())
            }
            _ => StoreError::Database(err),
        }
    }
}
