//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use gmail_cli::client_config::ClientConfig;
use gmail_cli::config::AuthSettings;
use gmail_cli::error::Result;
use gmail_cli::provider::TokenProvider;
use gmail_cli::record::{CredentialRecord, TokenGrant};
use gmail_cli::scopes::ScopeSet;
use gmail_cli::store::CredentialStore;
use gmail_cli::CredentialManager;
use mockall::mock;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const CLIENT_ID: &str = "1234-test.apps.googleusercontent.com";
pub const CLIENT_SECRET: &str = "GOCSPX-test-secret";

/// Client identity pointing every endpoint at `base_url` (e.g. a wiremock server)
pub fn test_client(base_url: &str) -> ClientConfig {
    let mut client = ClientConfig::google(CLIENT_ID, CLIENT_SECRET);
    client.auth_uri = format!("{}/o/oauth2/auth", base_url);
    client.token_uri = format!("{}/token", base_url);
    client.revoke_uri = format!("{}/revoke", base_url);
    client
}

/// Scope set from aliases, panicking on typos
pub fn scopes(aliases: &[&str]) -> ScopeSet {
    ScopeSet::parse(aliases).unwrap()
}

pub fn grant(access: &str, refresh: Option<&str>, lifetime_secs: i64) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        expires_in: Duration::seconds(lifetime_secs),
        refresh_token: refresh.map(str::to_string),
        scopes: None,
        token_type: Some("Bearer".to_string()),
    }
}

/// A record whose access token expires at `expiry`
pub fn create_test_record(expiry: DateTime<Utc>, scope_aliases: &[&str]) -> CredentialRecord {
    let now = Utc::now();
    let mut record = CredentialRecord::from_grant(
        grant("ya29.stored-access", Some("1//stored-refresh"), 3600),
        &scopes(scope_aliases),
        CLIENT_ID,
        now - Duration::hours(2),
    )
    .unwrap();
    record.expiry = expiry;
    record
}

pub fn fresh_record(scope_aliases: &[&str]) -> CredentialRecord {
    create_test_record(Utc::now() + Duration::minutes(30), scope_aliases)
}

pub fn expired_record(scope_aliases: &[&str]) -> CredentialRecord {
    create_test_record(Utc::now() - Duration::minutes(5), scope_aliases)
}

/// Store rooted in a temp directory, kept alive by the returned guard
pub fn temp_store() -> (TempDir, CredentialStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".gmail_token.json"));
    (dir, store)
}

pub async fn write_record(store: &CredentialStore, record: &CredentialRecord) {
    let lock = store.lock().await.unwrap();
    store.save(record, &lock).await.unwrap();
}

pub fn test_settings() -> AuthSettings {
    AuthSettings {
        consent_timeout_secs: 10,
        ..AuthSettings::default()
    }
}

pub fn manager_with(
    store: &CredentialStore,
    provider: impl TokenProvider + 'static,
) -> CredentialManager {
    CredentialManager::new(
        ClientConfig::google(CLIENT_ID, CLIENT_SECRET),
        store.clone(),
        Arc::new(provider),
        test_settings(),
    )
}

/// Manager with no application identity, as when credentials.json is missing
pub fn manager_without_client(
    store: &CredentialStore,
    provider: impl TokenProvider + 'static,
) -> CredentialManager {
    CredentialManager::without_client(store.clone(), Arc::new(provider), test_settings())
}

#[cfg(unix)]
pub fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

mock! {
    pub TokenProvider {}

    #[async_trait::async_trait]
    impl TokenProvider for TokenProvider {
        async fn exchange_code(
            &self,
            client: &ClientConfig,
            code: &str,
            redirect_uri: &str,
            code_verifier: &str,
        ) -> Result<TokenGrant>;
        async fn refresh(&self, client: &ClientConfig, refresh_token: &str) -> Result<TokenGrant>;
        async fn revoke(&self, client: &ClientConfig, token: &str) -> Result<()>;
    }
}
