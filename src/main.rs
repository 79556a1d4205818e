use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, info_span, warn};

use kiwoomctl::{logging, HttpTransport, Settings, TokenManager, TokenState, TokenStorage};

#[derive(Parser)]
#[command(name = "kiwoomctl", version, about = "Manage the Kiwoom REST access token")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Reuse the saved token if it is still valid, otherwise issue one (default)
    Ensure,
    /// Issue a new token unconditionally
    Issue,
    /// Print the held token and whether it is valid
    Info,
    /// Revoke a token; defaults to the held one
    Revoke {
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load configuration")?;
    logging::init(&settings.log_level);

    let span = info_span!("kiwoomctl", mode = %settings.mode);
    let transport = HttpTransport::new().context("failed to build HTTP client")?;
    let manager = TokenManager::new(settings.credentials.clone(), Arc::new(transport))
        .with_span(span.clone());

    let storage = match TokenStorage::for_mode(settings.mode) {
        Ok(storage) => Some(storage),
        Err(err) => {
            warn!(parent: &span, error = %err, "keyring unavailable; token will not be persisted");
            None
        }
    };

    if let Some(saved) = restore(storage.as_ref(), &settings) {
        manager.load_token(saved).await;
    }

    match cli.command.unwrap_or(Command::Ensure) {
        Command::Ensure => {
            let before = manager.get_token();
            let token = manager.ensure_token().await?;
            if token != before {
                persist(storage.as_ref(), &manager.token_handle().snapshot());
            }
            print_info(&manager)?;
        }
        Command::Issue => {
            let issued = manager.issue_token().await?;
            persist(storage.as_ref(), &issued);
            print_info(&manager)?;
        }
        Command::Info => print_info(&manager)?,
        Command::Revoke { token } => {
            let held = manager.get_token();
            let revoked = manager.revoke_token(token.as_deref()).await?;
            if !revoked {
                info!(parent: &span, "no token to revoke");
            } else if manager.get_token().is_empty() && !held.is_empty() {
                if let Some(storage) = &storage {
                    if let Err(err) = storage.clear() {
                        warn!(parent: &span, error = %err, "could not clear saved token");
                    }
                }
            }
            println!("{}", serde_json::json!({ "revoked": revoked }));
        }
    }

    Ok(())
}

/// The keyring copy wins over a token from the environment.
fn restore(storage: Option<&TokenStorage>, settings: &Settings) -> Option<TokenState> {
    let saved = storage.and_then(|storage| {
        storage
            .load()
            .inspect_err(|err| warn!(error = %err, "could not read saved token"))
            .ok()
            .flatten()
    });

    saved.or_else(|| {
        settings
            .token
            .as_deref()
            .map(|token| TokenState::issued(token, "", None))
    })
}

fn persist(storage: Option<&TokenStorage>, state: &TokenState) {
    let Some(storage) = storage else {
        return;
    };
    if let Err(err) = storage.save(state) {
        warn!(error = %err, "could not save token");
    }
}

fn print_info(manager: &TokenManager) -> anyhow::Result<()> {
    let info = manager.get_token_info();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
