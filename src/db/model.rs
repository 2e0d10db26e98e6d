//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recurring relay job: relay the newest source message to `list_name`
/// every `interval_secs` seconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub list_name: String,
    pub interval_secs: i64,
}

/// Job row with its bookkeeping columns, for listings.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub created_at: DateTime<Utc>,
}

/// Destination list name with the number of destinations it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub name: String,
    pub destinations: i64,
}
