//! Credential lifecycle: initial authorization, silent refresh, revocation
//!
//! [`CredentialManager`] is the only writer of the persisted record. Callers
//! ask for "a valid access token with scopes S" and get either a token with
//! more than the safety margin left, or an [`AuthError`] telling them what to do.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client_config::ClientConfig;
use crate::config::AuthSettings;
use crate::consent::{authorization_request, LoopbackReceiver, UserAgent};
use crate::error::{AuthError, Result};
use crate::provider::TokenProvider;
use crate::record::{mask_secret, CredentialRecord};
use crate::scopes::ScopeSet;
use crate::store::CredentialStore;

/// A bearer token guaranteed valid for longer than the safety margin
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, token_type: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            token_type: token_type.into(),
            expiry,
        }
    }

    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            secret: record.access_token.clone(),
            token_type: record.token_type.clone(),
            expiry: record.expiry,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Value for the HTTP `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.secret)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &mask_secret(&self.secret))
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// A local record existed and was deleted
    pub had_record: bool,
    /// The provider confirmed the revocation
    pub remote_revoked: bool,
}

/// Snapshot of the stored credentials, computed without network access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenHealth {
    Missing,
    Corrupted { reason: String },
    Unreadable { reason: String },
    Valid { expires_in: Duration, scopes: ScopeSet },
    /// Past the safety margin; the next use refreshes it
    Expired { scopes: ScopeSet },
}

pub struct CredentialManager {
    /// Absent when no application identity could be found; only stored
    /// tokens can then be used or deleted
    client: Option<ClientConfig>,
    store: CredentialStore,
    provider: Arc<dyn TokenProvider>,
    settings: AuthSettings,
}

impl CredentialManager {
    pub fn new(
        client: ClientConfig,
        store: CredentialStore,
        provider: Arc<dyn TokenProvider>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            client: Some(client),
            store,
            provider,
            settings,
        }
    }

    /// Manager for a store whose application identity is unavailable.
    ///
    /// Fresh tokens are still served and `revoke` still deletes the local
    /// record; anything that talks to the token endpoint fails with
    /// [`AuthError::InvalidClientConfig`].
    pub fn without_client(
        store: CredentialStore,
        provider: Arc<dyn TokenProvider>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            client: None,
            store,
            provider,
            settings,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn client(&self) -> Result<&ClientConfig> {
        self.client.as_ref().ok_or_else(|| {
            AuthError::InvalidClientConfig("No OAuth client credentials configured".to_string())
        })
    }

    /// Run the interactive authorization flow, cancellable with Ctrl-C
    pub async fn initialize(
        &self,
        requested: &ScopeSet,
        agent: &dyn UserAgent,
    ) -> Result<CredentialRecord> {
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal support; rely on the timeout alone
                std::future::pending::<()>().await;
            }
        };
        self.initialize_until(requested, agent, interrupted).await
    }

    /// Run the interactive authorization flow until it completes, times out,
    /// or `cancel` resolves
    pub async fn initialize_until<F>(
        &self,
        requested: &ScopeSet,
        agent: &dyn UserAgent,
        cancel: F,
    ) -> Result<CredentialRecord>
    where
        F: Future<Output = ()>,
    {
        if requested.is_empty() {
            return Err(AuthError::Config(
                "At least one scope must be requested".to_string(),
            ));
        }
        let client = self.client()?;
        client.validate()?;

        let receiver = LoopbackReceiver::bind(self.settings.redirect_port)?;
        let request = authorization_request(client, requested, receiver.redirect_uri())?;

        info!("Requesting consent for scopes: {}", requested);
        agent.present(&request.url)?;

        let timeout = self.settings.consent_timeout();
        let code = tokio::select! {
            result = tokio::time::timeout(timeout, receiver.wait_for_code(request.state.secret())) => match result {
                Ok(code) => code?,
                Err(_) => {
                    return Err(AuthError::Cancelled(format!(
                        "No response from the browser within {} seconds",
                        timeout.as_secs()
                    )))
                }
            },
            _ = cancel => {
                return Err(AuthError::Cancelled("Interrupted by user".to_string()));
            }
        };

        let grant = self
            .provider
            .exchange_code(
                client,
                &code,
                receiver.redirect_uri(),
                request.pkce_verifier.secret(),
            )
            .await?;

        let record = CredentialRecord::from_grant(grant, requested, &client.client_id, Utc::now())?;

        let missing = record.scopes.missing(requested);
        if !missing.is_empty() {
            warn!(
                "Consent granted fewer scopes than requested, missing: {}",
                missing.join(", ")
            );
        }

        let lock = self.store.lock().await?;
        self.store.save(&record, &lock).await?;
        drop(lock);

        info!(
            "Stored credentials at {:?} (expires {})",
            self.store.path(),
            record.expiry
        );
        Ok(record)
    }

    /// Return an access token covering `required`, refreshing it if needed.
    ///
    /// Scope coverage is checked before any network call. A rejected refresh
    /// is reported as [`AuthError::RefreshFailed`] and never retried.
    pub async fn get_valid_token(&self, required: &ScopeSet) -> Result<AccessToken> {
        let margin = self.settings.safety_margin();

        let record = self.load_record().await?;
        check_scopes(&record, required)?;
        if record.is_fresh(margin, Utc::now()) {
            debug!("Using stored access token (expires {})", record.expiry);
            return Ok(AccessToken::from_record(&record));
        }

        info!("Access token expires at {}, refreshing", record.expiry);
        let lock = self.store.lock().await?;

        // Another invocation may have refreshed while we waited for the lock
        let mut record = self.load_record().await?;
        check_scopes(&record, required)?;
        if record.is_fresh(margin, Utc::now()) {
            debug!("Record was refreshed concurrently, reusing it");
            return Ok(AccessToken::from_record(&record));
        }

        let client = self.client()?;
        if record.client_id != client.client_id {
            warn!(
                "Stored grant belongs to client {}, refreshing with {}",
                record.client_id, client.client_id
            );
        }

        let previous_expiry = record.expiry;
        let grant = self.provider.refresh(client, &record.refresh_token).await?;
        let now = Utc::now();
        record.apply_refresh(grant, now)?;

        self.store.save(&record, &lock).await?;
        drop(lock);

        if !record.is_fresh(margin, now) {
            return Err(AuthError::RefreshFailed(format!(
                "Provider issued a token expiring at {}, inside the {} second safety margin",
                record.expiry,
                margin.num_seconds()
            )));
        }
        check_scopes(&record, required)?;

        info!(
            "Refreshed access token (expiry {} -> {})",
            previous_expiry, record.expiry
        );
        Ok(AccessToken::from_record(&record))
    }

    /// Revoke the grant at the provider (best effort) and delete the local record.
    ///
    /// Network failures and a missing client identity never prevent local
    /// deletion.
    pub async fn revoke(&self) -> Result<RevokeOutcome> {
        let lock = self.store.lock().await?;

        let record = match self.store.load().await {
            Ok(record) => record,
            Err(e) => {
                warn!("Cannot read credential record, deleting it anyway: {}", e);
                None
            }
        };

        let mut remote_revoked = false;
        match (&record, &self.client) {
            (Some(record), Some(client)) => {
                let token = if record.refresh_token.is_empty() {
                    &record.access_token
                } else {
                    &record.refresh_token
                };
                match self.provider.revoke(client, token).await {
                    Ok(()) => {
                        info!("Provider revoked the grant");
                        remote_revoked = true;
                    }
                    Err(e) => warn!("Could not revoke the grant at the provider: {}", e),
                }
            }
            (Some(_), None) => {
                warn!("No OAuth client credentials available, skipping remote revocation")
            }
            (None, _) => {}
        }

        let had_record = self.store.remove(&lock).await?;
        drop(lock);

        info!("Removed local credentials at {:?}", self.store.path());
        Ok(RevokeOutcome {
            had_record,
            remote_revoked,
        })
    }

    /// Inspect the stored record without touching the network
    pub async fn status(&self) -> TokenHealth {
        status_of(&self.store, self.settings.safety_margin()).await
    }

    async fn load_record(&self) -> Result<CredentialRecord> {
        self.store.load().await?.ok_or_else(|| {
            AuthError::NotAuthenticated(format!("No credentials stored at {:?}", self.store.path()))
        })
    }
}

/// Classify whatever is stored in `store`; needs no client identity
pub async fn status_of(store: &CredentialStore, margin: Duration) -> TokenHealth {
    match store.load().await {
        Ok(None) => TokenHealth::Missing,
        Ok(Some(record)) => {
            let now = Utc::now();
            if record.is_fresh(margin, now) {
                TokenHealth::Valid {
                    expires_in: record.remaining(now),
                    scopes: record.scopes,
                }
            } else {
                TokenHealth::Expired {
                    scopes: record.scopes,
                }
            }
        }
        Err(AuthError::StorageCorrupted { reason, .. }) => TokenHealth::Corrupted { reason },
        Err(e) => TokenHealth::Unreadable {
            reason: e.to_string(),
        },
    }
}

fn check_scopes(record: &CredentialRecord, required: &ScopeSet) -> Result<()> {
    let missing = record.scopes.missing(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::InsufficientScope { missing })
    }
}
