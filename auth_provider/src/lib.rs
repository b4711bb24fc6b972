//! Pluggable authentication backends with a locally synced user directory.
//!
//! A backend implements [`AuthenticationProvider`]; an [`Authenticator`]
//! hosts it, runs its lifecycle and reconciles every record it returns with
//! an [`IdentityStore`].

pub mod authenticator;
pub mod config;
pub mod cookie;
pub mod fingerprint;
pub mod provider;
pub mod reconcile;
pub mod store;

pub use authenticator::{AuthError, Authenticator};
pub use config::{ConfigError, Settings};
pub use provider::{
    AuthenticationProvider, BackendError, Capabilities, NullProvider, ProviderContext,
    ProviderRegistry, NULL_PROVIDER,
};
pub use store::{
    models::{AccountType, Cookie, Credential, IdentityRecord, TeamName, TeamRecord, UserName},
    IdentityStore, MemoryStore, SqliteStore, StoreError,
};
