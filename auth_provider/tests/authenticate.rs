use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use auth_provider::{
    config::RECONCILE_ALERT_THRESHOLD_KEY,
    fingerprint::Fingerprint, AccountType, AuthError, AuthenticationProvider, Authenticator,
    BackendError, Capabilities, Credential, IdentityRecord, IdentityStore, MemoryStore,
    ProviderContext, Settings, SqliteStore, StoreError, TeamName, TeamRecord, UserName,
};
use tracing_test::traced_test;

#[derive(Clone)]
struct Entry {
    password: String,
    email: Option<String>,
    teams: Vec<&'static str>,
}

/// A directory backend whose contents tests can edit between logins.
#[derive(Clone, Default)]
struct Directory {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
    rename_to: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    resolved: Arc<Mutex<Option<PathBuf>>>,
}

impl Directory {
    fn with_user(self, name: &str, password: &str, teams: &[&'static str]) -> Self {
        self.entries.lock().unwrap().insert(
            name.to_owned(),
            Entry {
                password: password.to_owned(),
                email: Some(format!("{name}@example.com")),
                teams: teams.to_vec(),
            },
        );
        self
    }

    fn edit(&self, name: &str, edit: impl FnOnce(&mut Entry)) {
        edit(self.entries.lock().unwrap().get_mut(name).unwrap());
    }
}

#[async_trait]
impl AuthenticationProvider for Directory {
    fn service_name(&self) -> &str {
        "directory"
    }

    fn account_type(&self) -> AccountType {
        AccountType::Ldap
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    async fn setup(&mut self, context: &ProviderContext) -> Result<(), BackendError> {
        *self.resolved.lock().unwrap() =
            Some(context.resolve_file_or_folder("realm.directory.file", "${baseFolder}/dir.conf"));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn authenticate(
        &self,
        username: &UserName,
        credential: &Credential,
    ) -> Result<Option<IdentityRecord>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".into()));
        }

        let entry = match self.entries.lock().unwrap().get(username.as_str()) {
            Some(entry) if entry.password.as_bytes() == credential.expose_secret() => entry.clone(),
            _ => return Ok(None),
        };

        let name = match self.rename_to.lock().unwrap().as_deref() {
            Some(other) => UserName::parse(other).unwrap(),
            None => username.clone(),
        };

        let mut record = IdentityRecord::new(name, AccountType::Ldap);
        record.email = entry.email;
        for team in entry.teams {
            record.join(TeamRecord::new(TeamName::parse(team).unwrap(), AccountType::Ldap));
        }
        Ok(Some(record))
    }
}

#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    identity_writes: AtomicUsize,
    team_writes: AtomicUsize,
    fail_identity_writes: AtomicBool,
    fail_team_reads: AtomicBool,
}

impl CountingStore {
    fn identity_writes(&self) -> usize {
        self.identity_writes.load(Ordering::SeqCst)
    }

    fn team_writes(&self) -> usize {
        self.team_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityStore for CountingStore {
    async fn get_identity(&self, name: &UserName) -> Result<Option<IdentityRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_identity(name).await
    }

    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        if self.fail_identity_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.identity_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_identity(record).await
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<TeamRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_team_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.get_team(name).await
    }

    async fn upsert_team(&self, record: &TeamRecord) -> Result<(), StoreError> {
        self.team_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_team(record).await
    }
}

fn settings() -> Arc<Settings> {
    Arc::new(Settings::new("/srv/auth"))
}

async fn ready(directory: &Directory) -> (Authenticator, Arc<CountingStore>) {
    ready_with(directory, settings()).await
}

async fn ready_with(
    directory: &Directory,
    settings: Arc<Settings>,
) -> (Authenticator, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::default());
    let authenticator = Authenticator::new(Box::new(directory.clone()));
    authenticator.setup(settings, store.clone()).await.unwrap();
    (authenticator, store)
}

#[tokio::test]
async fn authenticate_before_setup_fails_fast() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let authenticator = Authenticator::new(Box::new(directory.clone()));

    let result = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await;

    assert!(matches!(result, Err(AuthError::NotInitialized)));
    assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_setup_is_rejected() {
    let directory = Directory::default();
    let (authenticator, store) = ready(&directory).await;

    let again = authenticator.setup(settings(), store).await;

    assert!(matches!(again, Err(AuthError::AlreadyInitialized)));
    assert!(authenticator.is_ready().await);
}

#[tokio::test]
async fn setup_hands_the_backend_its_context() {
    let directory = Directory::default();
    let _ = ready(&directory).await;

    assert_eq!(
        *directory.resolved.lock().unwrap(),
        Some(PathBuf::from("/srv/auth/dir.conf"))
    );
}

#[tokio::test]
async fn stop_is_idempotent_and_terminal() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;

    authenticator.stop().await;
    authenticator.stop().await;

    assert_eq!(directory.stops.load(Ordering::SeqCst), 1);
    assert!(matches!(
        authenticator
            .authenticate("alice", &Credential::from("secret"))
            .await,
        Err(AuthError::Stopped)
    ));
    assert!(matches!(
        authenticator.setup(settings(), store).await,
        Err(AuthError::Stopped)
    ));
}

#[tokio::test]
async fn stop_before_setup_skips_the_backend() {
    let directory = Directory::default();
    let authenticator = Authenticator::new(Box::new(directory.clone()));

    authenticator.stop().await;

    assert_eq!(directory.stops.load(Ordering::SeqCst), 0);
    assert!(!authenticator.is_ready().await);
    assert!(matches!(
        authenticator
            .setup(settings(), Arc::new(CountingStore::default()))
            .await,
        Err(AuthError::Stopped)
    ));
    assert!(directory.resolved.lock().unwrap().is_none());
}

#[tokio::test]
async fn malformed_alert_threshold_fails_setup() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let authenticator = Authenticator::new(Box::new(directory.clone()));
    let settings = Settings::new("/srv/auth").with(RECONCILE_ALERT_THRESHOLD_KEY, "abc");

    let result = authenticator
        .setup(Arc::new(settings), Arc::new(CountingStore::default()))
        .await;

    assert!(matches!(result, Err(AuthError::Config(_))));
    assert!(!authenticator.is_ready().await);
    assert!(matches!(
        authenticator
            .authenticate("alice", &Credential::from("secret"))
            .await,
        Err(AuthError::NotInitialized)
    ));
}

#[tokio::test]
async fn first_login_is_stored_and_repeat_login_writes_nothing() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;

    let first = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name.as_str(), "alice");
    assert!(first.cookie.is_some());
    assert_eq!(store.identity_writes(), 1);

    let second = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        Fingerprint::of(&first).unwrap(),
        Fingerprint::of(&second).unwrap()
    );
    assert_eq!(store.identity_writes(), 1);

    let stored = store.get_identity(&first.name).await.unwrap();
    assert_eq!(stored, Some(first));
}

#[tokio::test]
async fn wrong_credential_is_no_match() {
    let directory = Directory::default().with_user("alice", "secret", &["dev"]);
    let (authenticator, store) = ready(&directory).await;

    for (user, password) in [("alice", "nope"), ("alice", ""), ("mallory", "secret")] {
        let outcome = authenticator
            .authenticate(user, &Credential::from(password))
            .await
            .unwrap();
        assert!(outcome.is_none(), "{user}/{password}");
    }

    assert_eq!(store.identity_writes(), 0);
    assert_eq!(store.team_writes(), 0);
}

#[tokio::test]
async fn empty_username_never_reaches_the_backend() {
    let directory = Directory::default();
    let (authenticator, _) = ready(&directory).await;

    let outcome = authenticator
        .authenticate("  ", &Credential::from("secret"))
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_backend_is_a_distinct_error() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;
    directory.unavailable.store(true, Ordering::SeqCst);

    let result = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::BackendUnavailable(BackendError::Unavailable(_)))
    ));
    assert_eq!(store.identity_writes(), 0);
}

#[tokio::test]
async fn record_for_another_user_is_rejected() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;
    *directory.rename_to.lock().unwrap() = Some("bob".into());

    let result = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::BackendUnavailable(BackendError::Misconfigured(_)))
    ));
    assert_eq!(store.identity_writes(), 0);
}

#[tokio::test]
async fn one_changed_attribute_means_one_write() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;
    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap();

    directory.edit("alice", |entry| entry.email = Some("a.lice@example.com".into()));
    let fresh = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.identity_writes(), 2);
    let stored = store.get_identity(&fresh.name).await.unwrap().unwrap();
    assert_eq!(stored.email.as_deref(), Some("a.lice@example.com"));
    assert_eq!(stored, fresh);
}

#[tokio::test]
async fn cookie_survives_a_credential_change() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let (authenticator, store) = ready(&directory).await;
    let first = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();

    directory.edit("alice", |entry| entry.password = "rotated".into());
    let second = authenticator
        .authenticate("alice", &Credential::from("rotated"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.cookie, second.cookie);
    assert_eq!(store.identity_writes(), 1);
}

#[tokio::test]
async fn every_team_membership_is_reconciled() {
    let directory = Directory::default().with_user("alice", "secret", &["dev", "ops"]);
    let (authenticator, store) = ready(&directory).await;

    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.team_writes(), 2);
    for team in ["dev", "ops"] {
        let team = store
            .get_team(&TeamName::parse(team).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(team.members.contains(&UserName::parse("alice").unwrap()));
    }

    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap();
    assert_eq!(store.team_writes(), 2);
}

#[tokio::test]
async fn failed_identity_write_still_authenticates_and_syncs_teams() {
    let directory = Directory::default().with_user("alice", "secret", &["dev", "ops"]);
    let (authenticator, store) = ready(&directory).await;
    store.fail_identity_writes.store(true, Ordering::SeqCst);

    let record = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap();

    assert!(record.is_some());
    assert_eq!(store.team_writes(), 2);
    assert_eq!(authenticator.consecutive_reconcile_failures(), 1);

    store.fail_identity_writes.store(false, Ordering::SeqCst);
    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap();

    assert_eq!(store.identity_writes(), 1);
    assert_eq!(authenticator.consecutive_reconcile_failures(), 0);
}

#[tokio::test]
async fn null_provider_denies_without_touching_the_store() {
    let store = Arc::new(CountingStore::default());
    let authenticator = Authenticator::null();
    authenticator.setup(settings(), store.clone()).await.unwrap();

    let outcome = authenticator
        .authenticate("anyone", &Credential::from("anything"))
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    assert_eq!(store.identity_writes(), 0);
    assert_eq!(authenticator.capabilities(), Capabilities::ALL);
    assert_eq!(authenticator.account_type(), AccountType::Local);
    assert!(authenticator.to_string().starts_with("NULL ("));
}

#[tokio::test]
async fn concurrent_logins_for_different_users_are_independent() {
    let mut directory = Directory::default();
    let names: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
    for name in &names {
        directory = directory.with_user(name, "pw", &["dev"]);
    }
    let (authenticator, store) = ready(&directory).await;
    let authenticator = Arc::new(authenticator);

    let handles: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let authenticator = Arc::clone(&authenticator);
            tokio::spawn(async move {
                authenticator
                    .authenticate(&name, &Credential::from("pw"))
                    .await
                    .map(|record| record.map(|record| record.name.to_string()))
            })
        })
        .collect();

    for (handle, name) in handles.into_iter().zip(&names) {
        let authenticated = handle.await.unwrap().unwrap();
        assert_eq!(authenticated.as_deref(), Some(name.as_str()));
    }
    assert_eq!(store.identity_writes(), names.len());
}

#[tokio::test]
async fn sqlite_store_keeps_cookie_between_logins() {
    let directory = Directory::default().with_user("alice", "secret", &["dev"]);
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let authenticator = Authenticator::new(Box::new(directory));
    authenticator.setup(settings(), store.clone()).await.unwrap();

    let first = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();
    let second = authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.get_identity(&first.name).await.unwrap(), Some(first));
}

#[tokio::test]
#[traced_test]
async fn repeated_sync_failures_escalate_past_the_threshold() {
    let directory = Directory::default().with_user("alice", "secret", &[]);
    let settings = Settings::new("/srv/auth").with(RECONCILE_ALERT_THRESHOLD_KEY, "3");
    let (authenticator, store) = ready_with(&directory, Arc::new(settings)).await;
    store.fail_identity_writes.store(true, Ordering::SeqCst);

    for expected in 1..=2 {
        authenticator
            .authenticate("alice", &Credential::from("secret"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(authenticator.consecutive_reconcile_failures(), expected);
    }
    assert!(logs_contain("failed to sync record to store"));
    assert!(!logs_contain("store sync keeps failing"));

    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(authenticator.consecutive_reconcile_failures(), 3);
    assert!(logs_contain("store sync keeps failing"));

    store.fail_identity_writes.store(false, Ordering::SeqCst);
    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap();
    assert_eq!(authenticator.consecutive_reconcile_failures(), 0);
}

#[tokio::test]
async fn users_sharing_a_team_keep_each_others_membership() {
    let directory = Directory::default()
        .with_user("alice", "secret", &["dev"])
        .with_user("bob", "hunter2", &["dev"]);
    let (authenticator, store) = ready(&directory).await;
    let dev = TeamName::parse("dev").unwrap();

    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();
    authenticator
        .authenticate("bob", &Credential::from("hunter2"))
        .await
        .unwrap()
        .unwrap();

    let members = store.get_team(&dev).await.unwrap().unwrap().members;
    assert_eq!(
        members,
        ["alice", "bob"]
            .into_iter()
            .map(|name| UserName::parse(name).unwrap())
            .collect::<BTreeSet<_>>()
    );
    assert_eq!(store.team_writes(), 2);

    for (user, password) in [("alice", "secret"), ("bob", "hunter2")] {
        authenticator
            .authenticate(user, &Credential::from(password))
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(store.team_writes(), 2);
}

#[tokio::test]
async fn unreadable_team_is_written_anyway() {
    let directory = Directory::default().with_user("alice", "secret", &["dev", "ops"]);
    let (authenticator, store) = ready(&directory).await;
    store.fail_team_reads.store(true, Ordering::SeqCst);

    authenticator
        .authenticate("alice", &Credential::from("secret"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.team_writes(), 2);
    assert_eq!(authenticator.consecutive_reconcile_failures(), 0);
}
