//! OAuth2 application identity (the user-supplied `credentials.json`)

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;
use yup_oauth2::ApplicationSecret;

use crate::error::{AuthError, Result};

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Application identity issued by the provider, consumed read-only
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub revoke_uri: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("revoke_uri", &self.revoke_uri)
            .finish()
    }
}

impl From<ApplicationSecret> for ClientConfig {
    fn from(secret: ApplicationSecret) -> Self {
        Self {
            client_id: secret.client_id,
            client_secret: secret.client_secret,
            auth_uri: secret.auth_uri,
            token_uri: secret.token_uri,
            revoke_uri: GOOGLE_REVOKE_URI.to_string(),
        }
    }
}

impl ClientConfig {
    /// Identity pointing at Google's production endpoints
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            revoke_uri: GOOGLE_REVOKE_URI.to_string(),
        }
    }

    /// Parse the JSON downloaded from Google Cloud Console
    ///
    /// Both the `installed` (desktop) and `web` layouts are accepted.
    pub fn from_json(content: &str) -> Result<Self> {
        let secret = yup_oauth2::parse_application_secret(content).map_err(|e| {
            AuthError::InvalidClientConfig(format!("Failed to parse credentials: {}", e))
        })?;
        let config = Self::from(secret);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the identity artifact from disk
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AuthError::InvalidClientConfig(format!(
                "Credentials file not found at {:?}",
                path
            )),
            _ => AuthError::storage_io(path, e),
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!("Loaded client identity {} from {:?}", config.client_id, path);
        Ok(config)
    }

    /// Load credentials from environment variables
    ///
    /// # Environment Variables
    /// - `GMAIL_CLIENT_ID`: OAuth2 client ID
    /// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("GMAIL_CLIENT_ID").map_err(|_| {
            AuthError::InvalidClientConfig("GMAIL_CLIENT_ID not set".to_string())
        })?;
        let client_secret = env::var("GMAIL_CLIENT_SECRET").map_err(|_| {
            AuthError::InvalidClientConfig("GMAIL_CLIENT_SECRET not set".to_string())
        })?;

        let config = Self::google(client_id, client_secret);
        config.validate()?;
        Ok(config)
    }

    /// Resolve the identity: explicit path, then `credentials.json` in the
    /// working directory, then in the home directory, then the environment
    pub async fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path).await;
        }

        if let Some(path) = find_credentials_file() {
            return Self::load(&path).await;
        }

        Self::from_env().map_err(|_| {
            AuthError::InvalidClientConfig(format!(
                "No {} found in the current or home directory, and GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET are not set",
                CREDENTIALS_FILE_NAME
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidClientConfig(
                "client_id is empty".to_string(),
            ));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::InvalidClientConfig(
                "client_secret is empty".to_string(),
            ));
        }
        for (name, uri) in [
            ("auth_uri", &self.auth_uri),
            ("token_uri", &self.token_uri),
            ("revoke_uri", &self.revoke_uri),
        ] {
            Url::parse(uri).map_err(|e| {
                AuthError::InvalidClientConfig(format!("{} '{}' is not a valid URL: {}", name, uri, e))
            })?;
        }
        Ok(())
    }
}

fn find_credentials_file() -> Option<PathBuf> {
    let candidates = [
        env::current_dir().ok().map(|dir| dir.join(CREDENTIALS_FILE_NAME)),
        dirs::home_dir().map(|home| home.join(CREDENTIALS_FILE_NAME)),
    ];
    candidates.into_iter().flatten().find(|path| path.exists())
}
