/// pinauth: sign in to Pinterest and read boards, pins and images
///
/// Setup:
/// 1. Register an app at https://developers.pinterest.com/apps/
/// 2. export PINAUTH_CLIENT_ID=... PINAUTH_CLIENT_SECRET=... PINAUTH_REDIRECT_URI=...
///
/// Run:
/// pinauth login --listen 127.0.0.1:8085
/// pinauth first-board
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pinauth::error::{OAuthError, TransportError};
use pinauth::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageKind {
    /// JSON file under the user's data directory
    File,
    /// OS keychain / credential manager
    Keyring,
}

#[derive(Debug, Parser)]
#[command(name = "pinauth", version, about = "OAuth 2.0 sign-in and API reads for Pinterest")]
struct Cli {
    /// Where the access token is kept
    #[arg(long, value_enum, env = "PINAUTH_STORAGE", default_value = "file")]
    storage: StorageKind,

    /// Application name used for the storage location
    #[arg(long, env = "PINAUTH_APP", default_value = "pinauth")]
    app: String,

    /// Account the token is stored under
    #[arg(long, env = "PINAUTH_ACCOUNT", default_value = "default")]
    account: String,

    /// Base URL of the REST API
    #[arg(long, env = "PINAUTH_API_BASE", default_value = PINTEREST_API_BASE)]
    api_base: String,

    /// Timeout for each network call, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the authorization code flow and store the access token
    Login {
        /// Capture the redirect on this loopback address instead of reading it from stdin
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,

        /// How long to wait for the redirect, in seconds
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    /// List the signed-in user's boards
    Boards,
    /// Print the id of the first board
    FirstBoard,
    /// List pins on a board
    Pins { owner: String, board: String },
    /// Print the original image URL of a pin
    Image { pin_id: String },
    /// Show whether a token is stored
    Status,
    /// Delete the stored token
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pinauth=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.storage, &cli.app)?;
    let account = AccountId::new(cli.account.clone());
    let timeout = Duration::from_secs(cli.timeout_secs);
    let http = Arc::new(ReqwestHttpClient::with_timeout(timeout)?);

    let api = ResourceClient::new(&cli.api_base, http.clone(), store.clone())?
        .with_account(account.clone())
        .with_timeout(timeout);

    match cli.command {
        Command::Login {
            listen,
            no_browser,
            wait_secs,
        } => {
            let mut config = OAuthConfig::from_env().context("loading OAuth configuration")?;
            let listener = match listen {
                Some(addr) => {
                    let listener = RedirectListener::bind(addr, "/callback").await?;
                    config.redirect_uri = listener.redirect_uri();
                    Some(listener)
                }
                None => None,
            };

            let client = OAuthClient::new(config, http, store)
                .with_account(account)
                .with_timeout(timeout);
            watch_progress(&client);

            let wait = Duration::from_secs(wait_secs);
            let token = client
                .authorize(client.new_request()?, |url| async move {
                    present(&url, no_browser);
                    match &listener {
                        Some(listener) => listener
                            .wait_for_redirect(wait)
                            .await
                            .map_err(OAuthError::from),
                        None => read_redirect_from_stdin().await,
                    }
                })
                .await?;
            println!("Signed in as {} (token {})", client.account(), token.masked());
        }
        Command::Boards => {
            for board in api.fetch_boards().await? {
                println!("{}\t{}", board.id, board.name.unwrap_or_default());
            }
        }
        Command::FirstBoard => println!("{}", api.fetch_first_board_id().await?),
        Command::Pins { owner, board } => {
            for pin in api.fetch_pins(&owner, &board).await? {
                println!(
                    "{}\t{}\t{}",
                    pin.id,
                    pin.image_url.unwrap_or_default(),
                    pin.note.unwrap_or_default()
                );
            }
        }
        Command::Image { pin_id } => println!("{}", api.fetch_image_url(&pin_id).await?),
        Command::Status => match store.get(&account)? {
            Some(token) => println!("{}: signed in (token {})", account, token.masked()),
            None => println!("{}: not signed in", account),
        },
        Command::Logout => {
            store.delete(&account)?;
            println!("{}: token deleted", account);
        }
    }

    Ok(())
}

fn open_store(kind: StorageKind, app: &str) -> Result<Arc<dyn TokenStore>> {
    Ok(match kind {
        StorageKind::File => Arc::new(FileTokenStore::new(app)?),
        StorageKind::Keyring => Arc::new(KeyringTokenStore::new(app)),
    })
}

/// Log every state transition of the attempt
fn watch_progress<H: HttpClient, S: TokenStore + ?Sized>(client: &OAuthClient<H, S>) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while events.changed().await.is_ok() {
            let state = events.borrow_and_update().clone();
            match &state {
                AuthState::Failed(err) => warn!(error = %err, "authorization failed"),
                other => info!(state = other.name(), "authorization progress"),
            }
        }
    });
}

fn present(url: &url::Url, no_browser: bool) {
    println!("Open this URL to authorize:\n\n  {}\n", url);
    if no_browser {
        return;
    }
    if let Err(e) = webbrowser::open(url.as_str()) {
        warn!(error = %e, "could not open a browser");
    }
}

async fn read_redirect_from_stdin() -> Result<String, OAuthError> {
    println!("Paste the URL you were redirected to:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|e| TransportError::Other(format!("failed to read redirect URL: {}", e)))?;
    Ok(line.trim().to_string())
}
