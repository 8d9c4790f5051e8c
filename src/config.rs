use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuthError, Result};
use crate::scopes::{ScopeSet, DEFAULT_SCOPE_ALIASES};

/// File name of the persisted credential record in the home directory
pub const TOKEN_FILE_NAME: &str = ".gmail_token.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Refresh when the access token has less than this many seconds left
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// How long `init` waits for the browser redirect
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    /// Loopback port for the redirect receiver, 0 picks a free one
    #[serde(default)]
    pub redirect_port: u16,
    #[serde(default = "default_scopes")]
    pub default_scopes: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            consent_timeout_secs: default_consent_timeout_secs(),
            redirect_port: 0,
            default_scopes: default_scopes(),
        }
    }
}

impl AuthSettings {
    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs as i64)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    pub fn default_scope_set(&self) -> Result<ScopeSet> {
        ScopeSet::parse(&self.default_scopes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Credential record location, defaults to `~/.gmail_token.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,
    /// Application identity artifact, discovered when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
}

impl StorageConfig {
    /// The one canonical credential record location
    pub fn resolved_token_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.token_path {
            return Ok(expand_home(path));
        }
        dirs::home_dir()
            .map(|home| home.join(TOKEN_FILE_NAME))
            .ok_or_else(|| {
                AuthError::Config("Cannot determine home directory for the token file".to_string())
            })
    }
}

fn default_safety_margin_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_consent_timeout_secs() -> u64 {
    300
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPE_ALIASES.iter().map(|s| s.to_string()).collect()
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gmail-cli")
        .join("config.toml")
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AuthError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AuthError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AuthError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| AuthError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let auth = &self.auth;

        // The margin must be positive and shorter than a typical token lifetime
        if auth.safety_margin_secs == 0 {
            return Err(AuthError::Config(
                "auth.safety_margin_secs must be greater than 0".to_string(),
            ));
        }
        if auth.safety_margin_secs > 3600 {
            return Err(AuthError::Config(
                "auth.safety_margin_secs cannot exceed 3600 (access tokens live one hour)"
                    .to_string(),
            ));
        }

        if auth.http_timeout_secs == 0 || auth.http_timeout_secs > 300 {
            return Err(AuthError::Config(
                "auth.http_timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        if auth.consent_timeout_secs < 10 || auth.consent_timeout_secs > 3600 {
            return Err(AuthError::Config(
                "auth.consent_timeout_secs must be between 10 and 3600".to_string(),
            ));
        }

        if auth.default_scopes.is_empty() {
            return Err(AuthError::Config(
                "auth.default_scopes cannot be empty".to_string(),
            ));
        }
        ScopeSet::parse(&auth.default_scopes).map_err(|e| {
            AuthError::Config(format!("Invalid auth.default_scopes: {}", e))
        })?;

        if let Some(path) = &self.storage.token_path {
            if path.as_os_str().is_empty() {
                return Err(AuthError::Config(
                    "storage.token_path cannot be empty".to_string(),
                ));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.auth.safety_margin_secs, 60);
        assert_eq!(config.auth.http_timeout_secs, 30);
        assert_eq!(config.auth.consent_timeout_secs, 300);
        assert_eq!(config.auth.redirect_port, 0);
        assert_eq!(
            config.auth.default_scopes,
            vec!["read", "send", "modify", "settings"]
        );
        assert!(config.storage.token_path.is_none());
        assert!(config.storage.credentials_path.is_none());
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validation_safety_margin_bounds() {
        let mut config = Config::default();
        config.auth.safety_margin_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("safety_margin_secs must be greater than 0"));

        config.auth.safety_margin_secs = 3601;
        assert!(config.validate().unwrap_err().to_string().contains("cannot exceed 3600"));

        config.auth.safety_margin_secs = 1;
        assert!(config.validate().is_ok());
        config.auth.safety_margin_secs = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_http_timeout() {
        let mut config = Config::default();
        config.auth.http_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.auth.http_timeout_secs = 301;
        assert!(config.validate().is_err());
        config.auth.http_timeout_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_consent_timeout() {
        let mut config = Config::default();
        config.auth.consent_timeout_secs = 9;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consent_timeout_secs"));
    }

    #[test]
    fn test_validation_scopes() {
        let mut config = Config::default();
        config.auth.default_scopes.clear();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("default_scopes cannot be empty"));

        config.auth.default_scopes = vec!["read".to_string(), "everything".to_string()];
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Invalid auth.default_scopes"));
    }

    #[test]
    fn test_validation_empty_token_path() {
        let mut config = Config::default();
        config.storage.token_path = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_token_path() {
        let storage = StorageConfig {
            token_path: Some(PathBuf::from("/var/tmp/tok.json")),
            credentials_path: None,
        };
        assert_eq!(
            storage.resolved_token_path().unwrap(),
            PathBuf::from("/var/tmp/tok.json")
        );

        if let Some(home) = dirs::home_dir() {
            let default = StorageConfig::default().resolved_token_path().unwrap();
            assert_eq!(default, home.join(".gmail_token.json"));

            let tilde = StorageConfig {
                token_path: Some(PathBuf::from("~/tokens/gmail.json")),
                credentials_path: None,
            };
            assert_eq!(
                tilde.resolved_token_path().unwrap(),
                home.join("tokens/gmail.json")
            );
        }
    }

    #[test]
    fn test_duration_helpers() {
        let settings = AuthSettings::default();
        assert_eq!(settings.safety_margin(), chrono::Duration::seconds(60));
        assert_eq!(settings.http_timeout(), Duration::from_secs(30));
        assert_eq!(settings.consent_timeout(), Duration::from_secs(300));
        assert_eq!(settings.default_scope_set().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_config_load_save_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = Config::default();
        config.auth.safety_margin_secs = 120;
        config.storage.token_path = Some(PathBuf::from("/tmp/gmail-token.json"));
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.auth.safety_margin_secs, 120);
        assert_eq!(
            loaded.storage.token_path,
            Some(PathBuf::from("/tmp/gmail-token.json"))
        );
    }

    #[tokio::test]
    async fn test_config_load_nonexistent_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.toml")).await.unwrap();
        assert_eq!(config.auth.safety_margin_secs, 60);
    }

    #[tokio::test]
    async fn test_config_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "this is not valid toml {[}]")
            .await
            .unwrap();

        let result = Config::load(temp_file.path()).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_config_partial_with_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let partial_config = r#"
[auth]
safety_margin_secs = 30
redirect_port = 8085
"#;
        tokio::fs::write(temp_file.path(), partial_config).await.unwrap();

        let config = Config::load(temp_file.path()).await.unwrap();
        assert_eq!(config.auth.safety_margin_secs, 30);
        assert_eq!(config.auth.redirect_port, 8085);
        assert_eq!(config.auth.http_timeout_secs, 30); // default
        assert!(config.storage.token_path.is_none()); // default
    }

    #[tokio::test]
    async fn test_config_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[auth]\nsafety_margin_secs = 0\n")
            .await
            .unwrap();

        let err = Config::load(temp_file.path()).await.unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[tokio::test]
    async fn test_config_create_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::create_example(&path).await.unwrap();
        assert!(path.exists());

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.auth.consent_timeout_secs, 300);
    }
}
