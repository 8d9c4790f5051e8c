//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client_config::ClientConfig;
use crate::config::{default_config_path, expand_home, Config};
use crate::consent::SystemBrowser;
use crate::error::{AuthError, Result};
use crate::manager::{AccessToken, CredentialManager, TokenHealth};
use crate::profile::{fetch_profile, GMAIL_API_BASE};
use crate::provider::GoogleTokenProvider;
use crate::scopes::{alias_of, ScopeSet};
use crate::store::CredentialStore;

#[derive(Parser, Debug)]
#[command(name = "gmail")]
#[command(version)]
#[command(about = "Gmail from the command line", long_about = None)]
pub struct Cli {
    /// Path to configuration file [default: <config dir>/gmail-cli/config.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to OAuth2 client credentials (credentials.json)
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Path to the stored token [default: ~/.gmail_token.json]
    #[arg(long, global = true)]
    pub token_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize this program to access your Gmail account
    Init {
        /// Scope to request (read, send, modify, labels, settings, metadata,
        /// compose, or a full URL). Repeatable; defaults to the configured set
        #[arg(short, long = "scope", value_name = "SCOPE")]
        scopes: Vec<String>,

        /// Re-authorize even if a valid token exists
        #[arg(long)]
        force: bool,

        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Print a valid access token, refreshing it if needed
    Token {
        /// Scope the token must carry. Repeatable
        #[arg(short, long = "scope", value_name = "SCOPE")]
        scopes: Vec<String>,
    },

    /// Show the authenticated Gmail account
    Me,

    /// Show the state of the stored credentials without network access
    Status,

    /// Revoke access and delete the stored token
    Revoke {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file [default: <config dir>/gmail-cli/config.toml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_config_path)
    }
}

/// Everything a command needs, resolved from flags and configuration
pub struct Session {
    pub config: Config,
    pub manager: CredentialManager,
    pub http: reqwest::Client,
}

impl Session {
    /// Resolve paths (flags win over the config file) and build the manager
    pub async fn open(cli: &Cli, config: Config) -> Result<Self> {
        let client = ClientConfig::discover(credentials_path(cli, &config).as_deref()).await?;
        Self::build(cli, config, Some(client))
    }

    /// Like [`Session::open`], but an unusable client identity only disables
    /// the remote half of revocation
    pub async fn open_for_revoke(cli: &Cli, config: Config) -> Result<Self> {
        let client = match ClientConfig::discover(credentials_path(cli, &config).as_deref()).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("{}; the stored token will only be deleted locally", e);
                None
            }
        };
        Self::build(cli, config, client)
    }

    fn build(cli: &Cli, config: Config, client: Option<ClientConfig>) -> Result<Self> {
        let store = Self::store_for(cli, &config)?;
        let provider = GoogleTokenProvider::new(config.auth.http_timeout())?;
        let http = provider.http().clone();

        let manager = match client {
            Some(client) => {
                CredentialManager::new(client, store, Arc::new(provider), config.auth.clone())
            }
            None => CredentialManager::without_client(store, Arc::new(provider), config.auth.clone()),
        };

        Ok(Self {
            config,
            manager,
            http,
        })
    }

    /// Token store only, for commands that never talk to the provider
    pub fn store_for(cli: &Cli, config: &Config) -> Result<CredentialStore> {
        let token_path = match &cli.token_path {
            Some(path) => expand_home(path),
            None => config.storage.resolved_token_path()?,
        };
        Ok(CredentialStore::new(token_path))
    }
}

fn credentials_path(cli: &Cli, config: &Config) -> Option<PathBuf> {
    cli.credentials
        .as_deref()
        .or(config.storage.credentials_path.as_deref())
        .map(expand_home)
}

/// Parse `--scope` values, falling back to `default` when none were given
pub fn requested_scopes(values: &[String], default: ScopeSet) -> Result<ScopeSet> {
    if values.is_empty() {
        Ok(default)
    } else {
        ScopeSet::parse(values)
    }
}

pub async fn run_init(session: &Session, scopes: &[String], force: bool, no_browser: bool) -> Result<()> {
    let requested = requested_scopes(scopes, session.config.auth.default_scope_set()?)?;

    if !force {
        match session.manager.get_valid_token(&requested).await {
            Ok(token) => {
                println!("Already authenticated. Use --force to authorize again.");
                print_account(session, &token).await;
                return Ok(());
            }
            Err(e) if e.requires_reauth() => {
                info!("Starting authorization: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    let agent = SystemBrowser {
        open_browser: !no_browser,
    };
    let record = session.manager.initialize(&requested, &agent).await?;

    println!("Successfully authenticated with Gmail");
    println!("Token stored at: {:?}", session.manager.store().path());
    println!("Granted scopes: {}", record.scopes);

    let token = AccessToken::new(record.access_token.clone(), record.token_type.clone(), record.expiry);
    print_account(session, &token).await;
    Ok(())
}

async fn print_account(session: &Session, token: &AccessToken) {
    match fetch_profile(&session.http, GMAIL_API_BASE, token).await {
        Ok(profile) => println!("Connected to account: {}", profile.email_address),
        Err(e) => warn!("Could not verify the account: {}", e),
    }
}

pub async fn run_token(session: &Session, scopes: &[String]) -> Result<()> {
    let required = requested_scopes(scopes, ScopeSet::new())?;
    let token = session.manager.get_valid_token(&required).await?;
    println!("{}", token.secret());
    Ok(())
}

pub async fn run_me(session: &Session) -> Result<()> {
    let token = session.manager.get_valid_token(&ScopeSet::new()).await?;
    let profile = fetch_profile(&session.http, GMAIL_API_BASE, &token).await?;

    println!("Email:    {}", profile.email_address);
    println!("Messages: {}", profile.messages_total);
    println!("Threads:  {}", profile.threads_total);
    Ok(())
}

/// Render [`TokenHealth`] for humans
pub fn describe_health(health: &TokenHealth) -> Vec<String> {
    let scope_line = |scopes: &ScopeSet| {
        let names: Vec<&str> = scopes
            .iter()
            .map(|s| alias_of(s).unwrap_or(s))
            .collect();
        format!("Scopes: {}", names.join(", "))
    };

    match health {
        TokenHealth::Missing => vec![
            "Status: not authenticated".to_string(),
            "Run `gmail init` to authenticate.".to_string(),
        ],
        TokenHealth::Corrupted { reason } => vec![
            format!("Status: token file is corrupted ({})", reason),
            "Run `gmail init` to authenticate again.".to_string(),
        ],
        TokenHealth::Unreadable { reason } => vec![format!("Status: unreadable ({})", reason)],
        TokenHealth::Valid { expires_in, scopes } => vec![
            format!(
                "Status: valid, access token expires in {}m {}s",
                expires_in.num_minutes(),
                expires_in.num_seconds() % 60
            ),
            scope_line(scopes),
        ],
        TokenHealth::Expired { scopes } => vec![
            "Status: access token expired, it will be refreshed on next use".to_string(),
            scope_line(scopes),
        ],
    }
}

pub async fn run_status(cli: &Cli, config: &Config) -> Result<()> {
    let store = Session::store_for(cli, config)?;
    let health = crate::manager::status_of(&store, config.auth.safety_margin()).await;

    println!("Token file: {:?}", store.path());
    for line in describe_health(&health) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn run_revoke(session: &Session, force: bool) -> Result<()> {
    if !force {
        let confirmed = inquire::Confirm::new(
            "Revoke Gmail access and delete the stored token?",
        )
        .with_default(false)
        .prompt()
        .map_err(|e| AuthError::Cancelled(e.to_string()))?;

        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let outcome = session.manager.revoke().await?;
    if !outcome.had_record {
        println!("No stored token found.");
        return Ok(());
    }
    if outcome.remote_revoked {
        println!("Access revoked and local token deleted.");
    } else {
        println!("Local token deleted. Could not confirm revocation with Google;");
        println!("remove access manually at https://myaccount.google.com/permissions");
    }
    Ok(())
}

pub async fn run_init_config(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(AuthError::Config(format!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            output
        )));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Config::create_example(&output).await?;

    println!("Created example configuration file at: {:?}", output);
    println!("\nKey settings to review:");
    println!("  - auth.default_scopes: Scopes requested by `gmail init`");
    println!("  - auth.safety_margin_secs: Refresh this long before expiry");
    println!("  - storage.token_path: Where the token is stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scopes::{GMAIL_MODIFY, GMAIL_READONLY};
    use chrono::Duration;

    #[test]
    fn test_parse_init_flags() {
        let cli = Cli::try_parse_from([
            "gmail", "init", "--scope", "read", "--scope", "modify", "--no-browser",
        ])
        .unwrap();
        match cli.command {
            Commands::Init {
                scopes,
                force,
                no_browser,
            } => {
                assert_eq!(scopes, vec!["read", "modify"]);
                assert!(!force);
                assert!(no_browser);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gmail",
            "status",
            "--token-path",
            "/tmp/token.json",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.token_path, Some(PathBuf::from("/tmp/token.json")));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_requested_scopes() {
        let scopes = requested_scopes(&[], ScopeSet::default_scopes()).unwrap();
        assert_eq!(scopes, ScopeSet::default_scopes());

        let scopes = requested_scopes(&["read".to_string()], ScopeSet::default_scopes()).unwrap();
        assert_eq!(scopes.len(), 1);
        assert!(scopes.contains(GMAIL_READONLY));

        assert!(requested_scopes(&["everything".to_string()], ScopeSet::new()).is_err());
    }

    #[tokio::test]
    async fn test_revoke_without_credentials_file() {
        use crate::record::{CredentialRecord, TokenGrant};

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        let missing_credentials = dir.path().join("credentials.json");
        let args: Vec<std::ffi::OsString> = vec![
            "gmail".into(),
            "revoke".into(),
            "--force".into(),
            "--token-path".into(),
            token_path.clone().into_os_string(),
            "--credentials".into(),
            missing_credentials.into_os_string(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();

        let grant = TokenGrant {
            access_token: "ya29.a".to_string(),
            expires_in: Duration::seconds(3600),
            refresh_token: Some("1//r".to_string()),
            scopes: None,
            token_type: None,
        };
        let record = CredentialRecord::from_grant(
            grant,
            &ScopeSet::default_scopes(),
            "cid",
            chrono::Utc::now(),
        )
        .unwrap();
        let store = CredentialStore::new(&token_path);
        let lock = store.lock().await.unwrap();
        store.save(&record, &lock).await.unwrap();
        drop(lock);

        assert!(Session::open(&cli, Config::default()).await.is_err());

        let session = Session::open_for_revoke(&cli, Config::default()).await.unwrap();
        run_revoke(&session, true).await.unwrap();
        assert!(!token_path.exists());
    }

    #[test]
    fn test_describe_health() {
        let lines = describe_health(&TokenHealth::Missing);
        assert!(lines[1].contains("gmail init"));

        let scopes: ScopeSet = [GMAIL_READONLY, GMAIL_MODIFY].into_iter().collect();
        let lines = describe_health(&TokenHealth::Valid {
            expires_in: Duration::seconds(125),
            scopes,
        });
        assert!(lines[0].contains("2m 5s"));
        assert!(lines[1].contains("read"));
        assert!(lines[1].contains("modify"));
    }
}
