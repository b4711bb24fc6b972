use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    config::{
        ConfigError, Settings, DEFAULT_RECONCILE_ALERT_THRESHOLD, RECONCILE_ALERT_THRESHOLD_KEY,
    },
    cookie::CookieMinter,
    provider::{
        AuthenticationProvider, BackendError, Capabilities, ProviderContext, NULL_PROVIDER,
    },
    reconcile::{self, ReconcileError},
    store::{
        models::{AccountType, Credential, IdentityRecord, UserName},
        IdentityStore,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication provider has not been set up")]
    NotInitialized,
    #[error("authentication provider is already set up")]
    AlreadyInitialized,
    #[error("authentication provider has been stopped")]
    Stopped,
    #[error("authentication backend failed")]
    BackendUnavailable(#[from] BackendError),
    #[error("invalid authentication settings")]
    Config(#[from] ConfigError),
}

enum Lifecycle {
    Unconfigured,
    Ready(Ready),
    Stopped,
}

struct Ready {
    store: Arc<dyn IdentityStore>,
    alert_threshold: u32,
}

struct Hosted {
    provider: Box<dyn AuthenticationProvider>,
    lifecycle: Lifecycle,
}

/// Hosts one authentication backend and keeps the local store in sync with
/// the records it returns.
///
/// `setup` and `stop` take the lifecycle lock exclusively, so they are
/// ordered before or after any in-flight `authenticate`.
pub struct Authenticator {
    service_name: String,
    description: String,
    account_type: AccountType,
    capabilities: Capabilities,
    hosted: RwLock<Hosted>,
    reconcile_failures: AtomicU32,
}

impl Authenticator {
    pub fn new(provider: Box<dyn AuthenticationProvider>) -> Self {
        Self {
            service_name: provider.service_name().to_owned(),
            description: provider.to_string(),
            account_type: provider.account_type(),
            capabilities: provider.capabilities(),
            hosted: RwLock::new(Hosted {
                provider,
                lifecycle: Lifecycle::Unconfigured,
            }),
            reconcile_failures: AtomicU32::new(0),
        }
    }

    pub fn null() -> Self {
        Self::new(Box::new(NULL_PROVIDER))
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    /// Captured once when the provider is hosted.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub async fn is_ready(&self) -> bool {
        matches!(self.hosted.read().await.lifecycle, Lifecycle::Ready(_))
    }

    /// Store sync failures since the last authentication that synced cleanly.
    pub fn consecutive_reconcile_failures(&self) -> u32 {
        self.reconcile_failures.load(Ordering::Relaxed)
    }

    pub async fn setup(
        &self,
        settings: Arc<Settings>,
        store: Arc<dyn IdentityStore>,
    ) -> Result<(), AuthError> {
        let mut hosted = self.hosted.write().await;

        match hosted.lifecycle {
            Lifecycle::Unconfigured => {}
            Lifecycle::Ready(_) => return Err(AuthError::AlreadyInitialized),
            Lifecycle::Stopped => return Err(AuthError::Stopped),
        }

        let alert_threshold = settings
            .get_u32(
                RECONCILE_ALERT_THRESHOLD_KEY,
                DEFAULT_RECONCILE_ALERT_THRESHOLD,
            )?
            .max(1);

        let context = ProviderContext::new(settings, Arc::clone(&store));
        hosted.provider.setup(&context).await?;

        hosted.lifecycle = Lifecycle::Ready(Ready {
            store,
            alert_threshold,
        });

        info!(provider = %self.description, "authentication provider ready");
        Ok(())
    }

    /// Safe to call repeatedly; only the first call reaches the backend.
    pub async fn stop(&self) {
        let mut hosted = self.hosted.write().await;

        match std::mem::replace(&mut hosted.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(_) => {
                hosted.provider.stop().await;
                info!(provider = %self.description, "authentication provider stopped");
            }
            Lifecycle::Unconfigured => {
                debug!(provider = %self.description, "authentication provider stopped before setup");
            }
            Lifecycle::Stopped => {}
        }
    }

    /// Verifies the credential with the backend.
    ///
    /// `Ok(None)` means the credential was not accepted. On success the
    /// returned record carries the session cookie and has been synced to the
    /// store; sync failures are logged and do not affect the result.
    pub async fn authenticate(
        &self,
        username: &str,
        credential: &Credential,
    ) -> Result<Option<IdentityRecord>, AuthError> {
        let hosted = self.hosted.read().await;

        let ready = match &hosted.lifecycle {
            Lifecycle::Unconfigured => return Err(AuthError::NotInitialized),
            Lifecycle::Stopped => return Err(AuthError::Stopped),
            Lifecycle::Ready(ready) => ready,
        };

        let Some(name) = UserName::parse(username) else {
            debug!("rejecting empty username");
            return Ok(None);
        };

        let record = match hosted.provider.authenticate(&name, credential).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(user = %name, provider = %self.service_name, "credential rejected");
                return Ok(None);
            }
            Err(error) => {
                warn!(?error, user = %name, provider = %self.service_name, "authentication backend failed");
                return Err(error.into());
            }
        };

        if record.name != name {
            let error = BackendError::Misconfigured(format!(
                "asked for {name} but the backend returned {}",
                record.name
            ));
            warn!(?error, provider = %self.service_name, "authentication backend failed");
            return Err(error.into());
        }

        Ok(Some(self.sync(ready, record, credential).await))
    }

    async fn sync(
        &self,
        ready: &Ready,
        mut record: IdentityRecord,
        credential: &Credential,
    ) -> IdentityRecord {
        let store = ready.store.as_ref();
        let mut failed = false;

        let stored = match reconcile::load_identity(store, &record).await {
            Ok(stored) => stored,
            Err(error) => {
                self.reconcile_failed(ready, &error);
                failed = true;
                None
            }
        };

        if record.cookie.is_none() {
            record.cookie = stored.as_ref().and_then(|stored| stored.cookie.clone());
        }
        if CookieMinter::mint(&mut record, credential) {
            debug!(user = %record.name, "minted session cookie");
        }

        // Without the stored copy its cookie is unknown, and writing would
        // replace it.
        if !failed {
            if let Err(error) = reconcile::reconcile_identity(store, &record, stored.as_ref()).await {
                self.reconcile_failed(ready, &error);
                failed = true;
            }
        }

        for team in record.teams.values() {
            if let Err(error) = reconcile::reconcile_team(store, team).await {
                self.reconcile_failed(ready, &error);
                failed = true;
            }
        }

        if !failed {
            self.reconcile_failures.store(0, Ordering::Relaxed);
        }

        record
    }

    fn reconcile_failed(&self, ready: &Ready, error: &ReconcileError) {
        let failures = self
            .reconcile_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_add(1))
            })
            .map_or(u32::MAX, |previous| previous.saturating_add(1));

        if failures >= ready.alert_threshold {
            error!(?error, failures, provider = %self.service_name, "store sync keeps failing");
        } else {
            warn!(?error, failures, provider = %self.service_name, "failed to sync record to store");
        }
    }
}

impl fmt::Display for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::null()
    }
}
