//! OAuth2 token endpoint client
//!
//! Requests are form-encoded, bounded by a timeout, and never retried here:
//! a rejected refresh or a denied consent is a decision made outside this
//! program, and transient failures are left to the user re-running the command.

use async_trait::async_trait;
use chrono::Duration;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client_config::ClientConfig;
use crate::error::{AuthError, Result};
use crate::record::TokenGrant;
use crate::scopes::ScopeSet;

/// Lifetime assumed when the provider does not report `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Upper bound on a reported lifetime; Google issues one hour
const MAX_EXPIRES_IN_SECS: i64 = 86_400;

/// Token endpoint operations needed by the credential manager
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Exchange an authorization code for the initial token pair, proving
    /// possession of the PKCE `code_verifier` sent with the consent request
    async fn exchange_code(
        &self,
        client: &ClientConfig,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant>;

    /// Mint a new access token from a refresh token
    async fn refresh(&self, client: &ClientConfig, refresh_token: &str) -> Result<TokenGrant>;

    /// Ask the provider to invalidate a token (and the grant behind it)
    async fn revoke(&self, client: &ClientConfig, token: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            expires_in: Duration::seconds(
                response
                    .expires_in
                    .filter(|secs| *secs > 0)
                    .map(|secs| secs.min(MAX_EXPIRES_IN_SECS))
                    .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            ),
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            scopes: response
                .scope
                .as_deref()
                .map(ScopeSet::from_space_delimited)
                .filter(|s| !s.is_empty()),
            token_type: response.token_type,
        }
    }
}

/// Standard OAuth2 error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize, Default)]
struct OAuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthErrorBody {
    fn describe(&self, status: StatusCode) -> String {
        match (&self.error, &self.error_description) {
            (e, Some(d)) if !e.is_empty() => format!("{}: {} (HTTP {})", e, d, status.as_u16()),
            (e, None) if !e.is_empty() => format!("{} (HTTP {})", e, status.as_u16()),
            _ => format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    AuthorizationCode,
    Refresh,
    Revoke,
}

/// Map a non-success token endpoint response onto the error taxonomy
fn classify_failure(exchange: Exchange, status: StatusCode, body: &str) -> AuthError {
    let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.describe(status);

    if status.is_server_error() {
        return AuthError::NetworkError(format!("Provider unavailable: {}", message));
    }

    match (exchange, parsed.error.as_str()) {
        (_, "invalid_client") | (_, "unauthorized_client") => {
            AuthError::InvalidClientConfig(message)
        }
        (Exchange::AuthorizationCode, "access_denied") => AuthError::UserDenied(message),
        (Exchange::AuthorizationCode, _) => AuthError::InvalidClientConfig(format!(
            "Authorization code exchange rejected: {}",
            message
        )),
        (Exchange::Refresh, _) => AuthError::RefreshFailed(message),
        (Exchange::Revoke, _) => {
            AuthError::NetworkError(format!("Revocation rejected: {}", message))
        }
    }
}

/// Token provider talking to Google's OAuth2 endpoints (or any RFC 6749 server)
#[derive(Debug, Clone)]
pub struct GoogleTokenProvider {
    http: reqwest::Client,
}

impl GoogleTokenProvider {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn post_token(
        &self,
        exchange: Exchange,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant> {
        let response = self.http.post(url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = classify_failure(exchange, status, &body);
            warn!("Token endpoint returned {} for {:?}: {}", status, exchange, err);
            return Err(err);
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::NetworkError(format!("Malformed token response: {}", e))
        })?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::NetworkError(
                "Token response contained an empty access_token".to_string(),
            ));
        }

        let grant = TokenGrant::from(parsed);
        debug!("Token endpoint issued {:?}", grant);
        Ok(grant)
    }
}

#[async_trait]
impl TokenProvider for GoogleTokenProvider {
    async fn exchange_code(
        &self,
        client: &ClientConfig,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant> {
        self.post_token(
            Exchange::AuthorizationCode,
            &client.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn refresh(&self, client: &ClientConfig, refresh_token: &str) -> Result<TokenGrant> {
        self.post_token(
            Exchange::Refresh,
            &client.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn revoke(&self, client: &ClientConfig, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&client.revoke_uri)
            .form(&[("token", token)])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(Exchange::Revoke, status, &body))
    }
}
