use async_trait::async_trait;

use super::{AuthenticationProvider, BackendError, Capabilities};
use crate::store::models::{AccountType, Credential, IdentityRecord, UserName};

/// Shared default for deployments without a configured backend.
pub static NULL_PROVIDER: NullProvider = NullProvider::new();

/// A backend that never authenticates anybody.
///
/// It places no restrictions on edits, so all capabilities are reported;
/// enforcement is left to whichever backend replaces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullProvider {
    _private: (),
}

impl NullProvider {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[async_trait]
impl AuthenticationProvider for NullProvider {
    fn service_name(&self) -> &str {
        "NULL"
    }

    fn account_type(&self) -> AccountType {
        AccountType::Local
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn authenticate(
        &self,
        _username: &UserName,
        _credential: &Credential,
    ) -> Result<Option<IdentityRecord>, BackendError> {
        Ok(None)
    }
}
