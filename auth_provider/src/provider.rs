//! The contract every authentication backend implements.
//!
//! A backend only verifies credentials and describes itself. Lifecycle
//! bookkeeping, cookie minting and store reconciliation are done by the
//! [`Authenticator`](crate::authenticator::Authenticator) that hosts it.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    config::{ConfigError, Settings, DEFAULT_PROVIDER, PROVIDER_KEY},
    store::{
        models::{AccountType, Credential, IdentityRecord, UserName},
        IdentityStore,
    },
};

pub mod null;

pub use null::{NullProvider, NULL_PROVIDER};

/// Failures that make an authentication result impossible to compute.
///
/// A rejected credential is not one of them; backends report it as
/// `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("authentication backend is unavailable: {0}")]
    Unavailable(String),
    #[error("authentication backend is misconfigured: {0}")]
    Misconfigured(String),
    #[error("authentication backend i/o failed")]
    Io(#[from] std::io::Error),
}

/// Which attribute categories a backend lets administrators edit.
///
/// Advisory only: authentication never consults it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities {
    pub credential_changes: bool,
    pub display_name_changes: bool,
    pub email_address_changes: bool,
    pub team_membership_changes: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        credential_changes: true,
        display_name_changes: true,
        email_address_changes: true,
        team_membership_changes: true,
    };

    pub const NONE: Self = Self {
        credential_changes: false,
        display_name_changes: false,
        email_address_changes: false,
        team_membership_changes: false,
    };

    pub fn supports_credential_changes(&self) -> bool {
        self.credential_changes
    }

    pub fn supports_display_name_changes(&self) -> bool {
        self.display_name_changes
    }

    pub fn supports_email_address_changes(&self) -> bool {
        self.email_address_changes
    }

    pub fn supports_team_membership_changes(&self) -> bool {
        self.team_membership_changes
    }
}

/// Runtime handles given to a backend during setup.
#[derive(Clone)]
pub struct ProviderContext {
    settings: Arc<Settings>,
    store: Arc<dyn IdentityStore>,
}

impl ProviderContext {
    pub fn new(settings: Arc<Settings>, store: Arc<dyn IdentityStore>) -> Self {
        Self { settings, store }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base_folder(&self) -> &Path {
        self.settings.base_folder()
    }

    /// Backends may read the stored copy of a user, e.g. to keep locally
    /// managed attributes, but must leave writes to the host.
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn resolve_file_or_folder(&self, key: &str, default: &str) -> PathBuf {
        self.settings.resolve_file_or_folder(key, default)
    }
}

#[async_trait]
pub trait AuthenticationProvider: Send + Sync {
    /// Stable name used in diagnostics.
    fn service_name(&self) -> &str;

    /// The implementing type, shown next to the service name.
    fn implementation(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn account_type(&self) -> AccountType;

    /// Must not change over the lifetime of the provider.
    fn capabilities(&self) -> Capabilities;

    async fn setup(&mut self, _context: &ProviderContext) -> Result<(), BackendError> {
        Ok(())
    }

    async fn stop(&mut self) {}

    /// Verifies `credential` for `username`.
    ///
    /// Returns `Ok(None)` when the backend does not accept the credential.
    /// The credential must not be retained past the call.
    async fn authenticate(
        &self,
        username: &UserName,
        credential: &Credential,
    ) -> Result<Option<IdentityRecord>, BackendError>;
}

impl fmt::Display for dyn AuthenticationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service_name(), self.implementation())
    }
}

type ProviderFactory = Box<dyn Fn(&Settings) -> Box<dyn AuthenticationProvider> + Send + Sync>;

/// Maps the `auth.provider` setting to a backend constructor.
///
/// Nothing is selected implicitly: the null provider is used only because
/// it is the documented default value of that setting.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_PROVIDER, |_| Box::new(NULL_PROVIDER));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Box<dyn AuthenticationProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, settings: &Settings) -> Result<Box<dyn AuthenticationProvider>, ConfigError> {
        let name = settings.get_string(PROVIDER_KEY, DEFAULT_PROVIDER).trim();

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_owned()))?;

        Ok(factory(settings))
    }
}
