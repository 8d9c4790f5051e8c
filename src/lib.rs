//! Gmail CLI credential management
//!
//! OAuth 2.0 credential lifecycle for a single-user command-line Gmail client:
//! interactive consent, secure persistence, proactive refresh and revocation.
//!
//! # Overview
//!
//! - **Consent**: browser-based authorization with a loopback redirect receiver
//! - **Storage**: one owner-only JSON record, written atomically under a file lock
//! - **Refresh**: access tokens are renewed before they enter the safety margin
//! - **Scopes**: every token request states the scopes it needs
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_cli::{
//!     client_config::ClientConfig, config::Config, provider::GoogleTokenProvider,
//!     store::CredentialStore, CredentialManager, ScopeSet,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let client = ClientConfig::discover(None).await?;
//!     let provider = GoogleTokenProvider::new(config.auth.http_timeout())?;
//!
//!     let manager = CredentialManager::new(
//!         client,
//!         CredentialStore::new(config.storage.resolved_token_path()?),
//!         Arc::new(provider),
//!         config.auth.clone(),
//!     );
//!
//!     let token = manager.get_valid_token(&ScopeSet::parse(["read"])?).await?;
//!     println!("Authorization: {}", token.authorization_header());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`cli`] - Command-line interface and command handlers
//! - [`client_config`] - OAuth2 application identity (credentials.json)
//! - [`config`] - Configuration management
//! - [`consent`] - Authorization URL and loopback redirect receiver
//! - [`error`] - Error types and result aliases
//! - [`manager`] - Credential lifecycle operations
//! - [`profile`] - Gmail profile lookup
//! - [`provider`] - OAuth2 token endpoint client
//! - [`record`] - Persisted credential record
//! - [`scopes`] - Gmail scope names and scope sets
//! - [`store`] - Atomic, locked credential file storage

pub mod cli;
pub mod client_config;
pub mod config;
pub mod consent;
pub mod error;
pub mod manager;
pub mod profile;
pub mod provider;
pub mod record;
pub mod scopes;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{AuthError, AuthErrorKind, Result};

pub use client_config::ClientConfig;
pub use config::Config;
pub use manager::{AccessToken, CredentialManager, RevokeOutcome, TokenHealth};
pub use provider::{GoogleTokenProvider, TokenProvider};
pub use record::{CredentialRecord, TokenGrant};
pub use scopes::ScopeSet;
pub use store::CredentialStore;
