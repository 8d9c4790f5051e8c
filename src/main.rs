use anyhow::Result;
use clap::Parser;
use gmail_cli::cli::{self, Cli, Commands, Session};
use gmail_cli::config::{default_config_path, Config};
use gmail_cli::error::AuthError;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // reqwest and yup-oauth2 pull in different rustls crypto backends, so pick one
    // explicitly: aws-lc-rs everywhere except Windows, where ring avoids NASM/CMake
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_cli=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_cli=info,warn,error"))
    };

    // stderr keeps `gmail token` output clean for scripts
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::InitConfig { output, force } => {
            let output = output.clone().unwrap_or_else(default_config_path);
            cli::run_init_config(output, *force).await?;
        }
        Commands::Status => {
            let config = Config::load(&cli.config_path()).await?;
            cli::run_status(&cli, &config).await?;
        }
        Commands::Init {
            scopes,
            force,
            no_browser,
        } => {
            let session = open_session(&cli).await?;
            cli::run_init(&session, scopes, *force, *no_browser).await?;
        }
        Commands::Token { scopes } => {
            let session = open_session(&cli).await?;
            cli::run_token(&session, scopes).await?;
        }
        Commands::Me => {
            let session = open_session(&cli).await?;
            cli::run_me(&session).await?;
        }
        Commands::Revoke { force } => {
            let config = Config::load(&cli.config_path()).await?;
            let session = Session::open_for_revoke(&cli, config).await?;
            cli::run_revoke(&session, *force).await?;
        }
    }

    Ok(())
}

async fn open_session(cli: &Cli) -> Result<Session> {
    let config = Config::load(&cli.config_path()).await?;
    Ok(Session::open(cli, config).await?)
}

fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    // Display error chain
    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(hint) = error.downcast_ref::<AuthError>().and_then(AuthError::hint) {
        eprintln!("\nHint: {}", hint);
    }
}
