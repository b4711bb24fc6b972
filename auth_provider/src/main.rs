use std::{io::BufRead, sync::Arc};

use auth_provider::{
    config::{DEFAULT_STORE_FILE, STORE_FILE_KEY},
    Authenticator, Credential, ProviderRegistry, Settings, SqliteStore,
};
use tracing::{info, warn};
use zeroize::Zeroize;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    {
        use tracing_subscriber::prelude::*;

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(
                        tracing_subscriber::EnvFilter::builder()
                            .with_default_directive(
                                tracing::level_filters::LevelFilter::INFO.into(),
                            )
                            .with_env_var("AUTH_LOG")
                            .from_env()?,
                    ),
            )
            .init();
    }

    let settings = Arc::new(Settings::from_env()?);

    let authenticator = Authenticator::new(ProviderRegistry::with_defaults().build(&settings)?);

    let store_file = settings.resolve_file_or_folder(STORE_FILE_KEY, DEFAULT_STORE_FILE);
    let store = Arc::new(SqliteStore::open(&store_file).await?);

    authenticator.setup(settings.clone(), store.clone()).await?;

    let capabilities = authenticator.capabilities();
    info!(
        provider = %authenticator,
        account_type = %authenticator.account_type(),
        store = %store_file.display(),
        credential_changes = capabilities.credential_changes,
        display_name_changes = capabilities.display_name_changes,
        email_address_changes = capabilities.email_address_changes,
        team_membership_changes = capabilities.team_membership_changes,
        "authentication provider configured"
    );

    if let Some(username) = std::env::args().nth(1) {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let credential = Credential::from(line.trim_end_matches(&['\r', '\n'][..]));
        line.zeroize();

        match authenticator.authenticate(&username, &credential).await {
            Ok(Some(record)) => info!(
                user = %record.name,
                account_type = %record.account_type,
                teams = record.teams.len(),
                "authenticated"
            ),
            Ok(None) => warn!(user = %username, "credential not accepted"),
            Err(error) => warn!(?error, user = %username, "authentication failed"),
        }
    }

    authenticator.stop().await;
    store.close().await;

    Ok(())
}
