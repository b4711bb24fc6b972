//! Bringing the local store in line with what a backend just reported.

use tracing::{debug, warn};

use crate::{
    fingerprint::ChangeDetector,
    store::{
        models::{IdentityRecord, TeamRecord},
        IdentityStore, StoreError,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Written,
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to load stored record for {name}")]
    Load {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to write record for {name}")]
    Write {
        name: String,
        #[source]
        source: StoreError,
    },
}

pub async fn load_identity(
    store: &dyn IdentityStore,
    candidate: &IdentityRecord,
) -> Result<Option<IdentityRecord>, ReconcileError> {
    store
        .get_identity(&candidate.name)
        .await
        .map_err(|source| ReconcileError::Load {
            name: candidate.name.to_string(),
            source,
        })
}

/// Upserts `candidate` unless `stored` already matches it.
pub async fn reconcile_identity(
    store: &dyn IdentityStore,
    candidate: &IdentityRecord,
    stored: Option<&IdentityRecord>,
) -> Result<Reconciled, ReconcileError> {
    if !ChangeDetector::needs_write(candidate, stored) {
        return Ok(Reconciled::Unchanged);
    }

    store
        .upsert_identity(candidate)
        .await
        .map_err(|source| ReconcileError::Write {
            name: candidate.name.to_string(),
            source,
        })?;

    debug!(user = %candidate.name, "stored updated identity");
    Ok(Reconciled::Written)
}

/// Upserts the backend's view of a team, keeping members that other logins
/// already recorded. A backend only knows about the user it just checked.
///
/// An unreadable stored team is logged and overwritten.
pub async fn reconcile_team(
    store: &dyn IdentityStore,
    candidate: &TeamRecord,
) -> Result<Reconciled, ReconcileError> {
    let stored = match store.get_team(&candidate.name).await {
        Ok(stored) => stored,
        Err(error) => {
            warn!(?error, team = %candidate.name, "failed to load stored team, writing anyway");
            None
        }
    };

    let mut merged = candidate.clone();
    if let Some(stored) = &stored {
        merged.members.extend(stored.members.iter().cloned());
    }

    if !ChangeDetector::needs_write(&merged, stored.as_ref()) {
        return Ok(Reconciled::Unchanged);
    }

    store
        .upsert_team(&merged)
        .await
        .map_err(|source| ReconcileError::Write {
            name: merged.name.to_string(),
            source,
        })?;

    debug!(team = %merged.name, members = merged.members.len(), "stored updated team");
    Ok(Reconciled::Written)
}
