use std::{path::Path, time::Duration};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::{
    models::{IdentityRecord, TeamName, TeamRecord, UserName},
    IdentityStore, StoreError,
};

/// Records are kept as json documents keyed by name.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(file: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(file)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        debug!(file = %file.display(), "opened sqlite identity store");

        Self::with_pool(pool).await
    }

    /// A private in-memory database. The pool is pinned to one connection
    /// that never expires, otherwise the data would vanish with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(include_str!("../../schema.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn get_identity(&self, name: &UserName) -> Result<Option<IdentityRecord>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("select record from identities where name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;

        sqlx::query(
            "insert into identities (name, record) values (?, ?)
            on conflict (name) do update set record = excluded.record",
        )
        .bind(&record.name)
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<TeamRecord>, StoreError> {
        let row: Option<String> = sqlx::query_scalar("select record from teams where name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn upsert_team(&self, record: &TeamRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;

        sqlx::query(
            "insert into teams (name, record) values (?, ?)
            on conflict (name) do update set record = excluded.record",
        )
        .bind(&record.name)
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
