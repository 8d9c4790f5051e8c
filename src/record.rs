//! The persisted authorization state for the single local account

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, Result};
use crate::scopes::ScopeSet;

/// Mask a secret for log output: first 4 chars, then `***`
pub fn mask_secret(secret: &str) -> String {
    match secret.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &secret[..idx]),
        None => "***".to_string(),
    }
}

/// Result of a successful token endpoint exchange
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Duration,
    /// Providers may omit this on refresh
    pub refresh_token: Option<String>,
    /// Granted scopes, when the provider reports them
    pub scopes: Option<ScopeSet>,
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &mask_secret(&self.access_token))
            .field("expires_in", &self.expires_in.num_seconds())
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_secret))
            .field("scopes", &self.scopes)
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
    pub scopes: ScopeSet,
    pub client_id: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub obtained_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// `now + lifetime`, rejecting lifetimes no real token endpoint would issue
fn expiry_after(now: DateTime<Utc>, lifetime: Duration) -> Result<DateTime<Utc>> {
    if lifetime <= Duration::zero() {
        return Err(AuthError::NetworkError(format!(
            "Malformed token response: non-positive lifetime {}s",
            lifetime.num_seconds()
        )));
    }
    now.checked_add_signed(lifetime).ok_or_else(|| {
        AuthError::NetworkError(format!(
            "Malformed token response: lifetime {}s is out of range",
            lifetime.num_seconds()
        ))
    })
}

impl CredentialRecord {
    /// Build the initial record from an authorization-code exchange.
    ///
    /// A grant without a refresh token is rejected, since the record could
    /// never be renewed silently.
    pub fn from_grant(
        grant: TokenGrant,
        requested: &ScopeSet,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let refresh_token = grant.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::InvalidClientConfig(
                "Provider did not issue a refresh token. Remove this app's access at \
                 https://myaccount.google.com/permissions and run setup again"
                    .to_string(),
            )
        })?;
        Ok(Self {
            access_token: grant.access_token,
            refresh_token,
            expiry: expiry_after(now, grant.expires_in)?,
            scopes: grant.scopes.unwrap_or_else(|| requested.clone()),
            client_id: client_id.to_string(),
            token_type: grant.token_type.unwrap_or_else(default_token_type),
            obtained_at: now,
            refreshed_at: None,
        })
    }

    /// True if the access token stays valid for longer than `margin` after `now`
    pub fn is_fresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expiry > now + margin
    }

    /// Remaining validity, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry - now).max(Duration::zero())
    }

    /// Fold a refresh result into the record.
    ///
    /// An absent or empty refresh token in the grant keeps the current one.
    /// On error the record is left unchanged.
    pub fn apply_refresh(&mut self, grant: TokenGrant, now: DateTime<Utc>) -> Result<()> {
        self.expiry = expiry_after(now, grant.expires_in)?;
        self.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = refresh_token;
        }
        if let Some(scopes) = grant.scopes.filter(|s| !s.is_empty()) {
            self.scopes = scopes;
        }
        if let Some(token_type) = grant.token_type {
            self.token_type = token_type;
        }
        self.refreshed_at = Some(now);
        Ok(())
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("token_type", &self.token_type)
            .field("obtained_at", &self.obtained_at)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}
