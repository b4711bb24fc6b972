//! Durable home of identity and team records.
//!
//! Providers never mutate stored records directly: they read the stored copy
//! and ask the store to upsert a replacement.

pub mod models;

mod memory;
mod sqlite;

use async_trait::async_trait;
use models::{IdentityRecord, TeamName, TeamRecord, UserName};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("stored record is not valid json")]
    Encoding(#[from] serde_json::Error),
}

/// Keyed access to the local user and team directory.
///
/// Implementations must make each key linearizable; nothing stronger is
/// assumed by callers.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_identity(&self, name: &UserName) -> Result<Option<IdentityRecord>, StoreError>;

    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    async fn get_team(&self, name: &TeamName) -> Result<Option<TeamRecord>, StoreError>;

    async fn upsert_team(&self, record: &TeamRecord) -> Result<(), StoreError>;
}
