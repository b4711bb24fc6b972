//! Session cookies for cookie based re-authentication.

use blake2::{Blake2s256, Digest};

use crate::store::models::{Cookie, Credential, IdentityRecord, UserName};

const COOKIE_DOMAIN: &[u8] = b"auth_provider/cookie/v1";

pub struct CookieMinter;

impl CookieMinter {
    /// Assigns a cookie unless the record already has one or the credential
    /// is empty. Returns whether a cookie was assigned.
    ///
    /// Existing cookies are never replaced, since outstanding sessions are
    /// bound to them.
    pub fn mint(record: &mut IdentityRecord, credential: &Credential) -> bool {
        if record.cookie.is_some() || credential.is_empty() {
            return false;
        }

        record.cookie = Some(Self::derive(&record.name, credential));
        true
    }

    /// One-way digest of the username and credential.
    pub fn derive(name: &UserName, credential: &Credential) -> Cookie {
        let name = name.as_str().as_bytes();
        let secret = credential.expose_secret();

        let mut hasher = Blake2s256::new();
        hasher.update(COOKIE_DOMAIN);
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name);
        hasher.update((secret.len() as u64).to_le_bytes());
        hasher.update(secret);

        Cookie(hex::encode(hasher.finalize()))
    }
}
