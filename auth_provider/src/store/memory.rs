use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    models::{IdentityRecord, TeamName, TeamRecord, UserName},
    IdentityStore, StoreError,
};

/// Process-local store, mostly useful for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: DashMap<UserName, IdentityRecord>,
    teams: DashMap<TeamName, TeamRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_identity(&self, name: &UserName) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.identities.get(name).map(|entry| entry.value().clone()))
    }

    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.identities.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<TeamRecord>, StoreError> {
        Ok(self.teams.get(name).map(|entry| entry.value().clone()))
    }

    async fn upsert_team(&self, record: &TeamRecord) -> Result<(), StoreError> {
        self.teams.insert(record.name.clone(), record.clone());
        Ok(())
    }
}
