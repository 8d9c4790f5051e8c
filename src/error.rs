use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Result with AuthError
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error types for the credential lifecycle
#[derive(Error, Debug)]
pub enum AuthError {
    /// The user refused consent in the browser
    #[error("Authorization denied: {0}")]
    UserDenied(String),

    /// Transport failure talking to the provider (connection, timeout, 5xx)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Application identity is malformed or rejected by the provider
    #[error("Invalid client configuration: {0}")]
    InvalidClientConfig(String),

    /// No credential record exists
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// The provider rejected the refresh exchange (revoked or expired grant)
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The stored grant does not cover the scopes an operation needs
    #[error("Insufficient scope, missing: {}", missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    /// The persisted record exists but cannot be parsed
    #[error("Credential record at {path:?} is corrupted: {reason}")]
    StorageCorrupted { path: PathBuf, reason: String },

    /// The credential file cannot be read or written
    #[error("Permission denied accessing {path:?}: {source}")]
    StoragePermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The interactive consent step was abandoned or timed out
    #[error("Authorization cancelled: {0}")]
    Cancelled(String),

    /// Configuration file problems
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other IO error (file operations, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Discriminant of [`AuthError`], convenient for matching in callers and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    UserDenied,
    NetworkError,
    InvalidClientConfig,
    NotAuthenticated,
    RefreshFailed,
    InsufficientScope,
    StorageCorrupted,
    StoragePermissionDenied,
    Cancelled,
    Config,
    Io,
    Serialization,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::UserDenied(_) => AuthErrorKind::UserDenied,
            AuthError::NetworkError(_) => AuthErrorKind::NetworkError,
            AuthError::InvalidClientConfig(_) => AuthErrorKind::InvalidClientConfig,
            AuthError::NotAuthenticated(_) => AuthErrorKind::NotAuthenticated,
            AuthError::RefreshFailed(_) => AuthErrorKind::RefreshFailed,
            AuthError::InsufficientScope { .. } => AuthErrorKind::InsufficientScope,
            AuthError::StorageCorrupted { .. } => AuthErrorKind::StorageCorrupted,
            AuthError::StoragePermissionDenied { .. } => AuthErrorKind::StoragePermissionDenied,
            AuthError::Cancelled(_) => AuthErrorKind::Cancelled,
            AuthError::Config(_) => AuthErrorKind::Config,
            AuthError::Io(_) => AuthErrorKind::Io,
            AuthError::Serialization(_) => AuthErrorKind::Serialization,
        }
    }

    /// Whether the only remedy is running the setup flow again.
    ///
    /// A corrupted record is handled exactly like a missing one.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated(_)
                | AuthError::StorageCorrupted { .. }
                | AuthError::RefreshFailed(_)
                | AuthError::InsufficientScope { .. }
        )
    }

    /// Actionable advice for the user, if there is any
    pub fn hint(&self) -> Option<String> {
        match self {
            AuthError::NotAuthenticated(_) | AuthError::StorageCorrupted { .. } => {
                Some("Run `gmail init` to authenticate.".to_string())
            }
            AuthError::RefreshFailed(_) => Some(
                "Access was probably revoked from your Google account. Run `gmail init` again."
                    .to_string(),
            ),
            AuthError::InsufficientScope { missing } => Some(format!(
                "Run `gmail init --force` and grant: {}",
                missing.join(" ")
            )),
            AuthError::UserDenied(_) => {
                Some("Consent is required. Run `gmail init` and approve access.".to_string())
            }
            AuthError::InvalidClientConfig(_) => Some(
                "Check credentials.json. Download an OAuth desktop client from Google Cloud Console."
                    .to_string(),
            ),
            AuthError::NetworkError(_) => {
                Some("Check your connection and run the command again.".to_string())
            }
            AuthError::StoragePermissionDenied { path, .. } => Some(format!(
                "Fix the ownership or permissions of {:?} (expected owner read/write only).",
                path
            )),
            AuthError::Cancelled(_) => Some("Run `gmail init` to start over.".to_string()),
            AuthError::Config(_) => {
                Some("Check your configuration file, or run `gmail init-config --force`.".to_string())
            }
            AuthError::Io(_) | AuthError::Serialization(_) => None,
        }
    }

    /// Map an IO error on the credential file, singling out permission problems
    pub(crate) fn storage_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            AuthError::StoragePermissionDenied {
                path: path.into(),
                source,
            }
        } else {
            AuthError::Io(source)
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AuthError::NetworkError(format!("Request timed out: {}", error))
        } else if error.is_connect() {
            AuthError::NetworkError(format!("Connection error: {}", error))
        } else if error.is_decode() {
            AuthError::NetworkError(format!("Malformed response: {}", error))
        } else {
            AuthError::NetworkError(error.to_string())
        }
    }
}
