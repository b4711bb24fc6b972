use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use sqlx::prelude::Type;
use zeroize::Zeroizing;

/// Name of a user. Never empty; the sole identity key across the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct UserName(String);

impl UserName {
    /// Returns `None` for an empty or all-whitespace name.
    pub fn parse(name: &str) -> Option<Self> {
        if name.trim().is_empty() {
            None
        } else {
            Some(Self(name.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserName {
    type Error = EmptyName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            Err(EmptyName)
        } else {
            Ok(Self(value))
        }
    }
}

impl From<UserName> for String {
    fn from(value: UserName) -> Self {
        value.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a team. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct TeamName(String);

impl TeamName {
    pub fn parse(name: &str) -> Option<Self> {
        if name.trim().is_empty() {
            None
        } else {
            Some(Self(name.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TeamName {
    type Error = EmptyName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            Err(EmptyName)
        } else {
            Ok(Self(value))
        }
    }
}

impl From<TeamName> for String {
    fn from(value: TeamName) -> Self {
        value.0
    }
}

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("names must not be empty")]
pub struct EmptyName;

/// Session token derived from a username and credential, see [`crate::cookie`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(pub String);

impl Cookie {
    pub fn get(&self) -> &str {
        &self.0
    }
}

/// Which kind of backend owns a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Local,
    Container,
    Ldap,
    Redmine,
    Salesforce,
    Windows,
    Pam,
    Htpasswd,
    HttpHeader,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Local => "local",
            AccountType::Container => "container",
            AccountType::Ldap => "ldap",
            AccountType::Redmine => "redmine",
            AccountType::Salesforce => "salesforce",
            AccountType::Windows => "windows",
            AccountType::Pam => "pam",
            AccountType::Htpasswd => "htpasswd",
            AccountType::HttpHeader => "http_header",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AccountType::Local)
    }

    /// External records are owned by a remote backend; local edits to them
    /// are usually overwritten on the next login.
    pub fn is_external(&self) -> bool {
        !self.is_local()
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: UserName,
    #[serde(default)]
    pub cookie: Option<Cookie>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub teams: BTreeMap<TeamName, TeamRecord>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl IdentityRecord {
    pub fn new(name: UserName, account_type: AccountType) -> Self {
        Self {
            name,
            cookie: None,
            display_name: None,
            email: None,
            account_type,
            teams: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds the team and records this user as one of its members.
    pub fn join(&mut self, mut team: TeamRecord) {
        team.members.insert(self.name.clone());
        self.teams.insert(team.name.clone(), team);
    }

    pub fn is_member_of(&self, team: &TeamName) -> bool {
        self.teams.contains_key(team)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub name: TeamName,
    #[serde(default)]
    pub members: BTreeSet<UserName>,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl TeamRecord {
    pub fn new(name: TeamName, account_type: AccountType) -> Self {
        Self {
            name,
            members: BTreeSet::new(),
            account_type,
            attributes: BTreeMap::new(),
        }
    }
}

/// A plaintext credential, wiped from memory when dropped.
///
/// Providers only ever borrow it for the duration of a call.
#[derive(Clone)]
pub struct Credential(Zeroizing<Vec<u8>>);

impl Credential {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn expose_secret(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
