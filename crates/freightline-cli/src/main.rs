//! Freightline CLI - sign in to the admin API and make authenticated calls.
//!
//! The session is kept between runs in the configured credential store, so
//! `login` once and every later command reuses (and refreshes) it.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use freightline_core::{ApiClient, ApiVersion, Config, SessionManager, SessionStatus};

/// Log file name prefix inside `log_dir`
const LOG_FILE_PREFIX: &str = "freightline.log";

#[derive(Debug, Parser)]
#[command(name = "freightline", version, about = "Freightline admin API session tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Restore the stored session and show who is signed in
    Status,
    /// Ask the backend who the session belongs to
    Whoami,
    /// Authenticated GET, printed as JSON
    Get {
        /// Path relative to the API base URL, e.g. /trips
        path: String,
        /// Use the v2 API
        #[arg(long)]
        v2: bool,
    },
    /// Sign out and forget the stored session
    Logout,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and additionally to a daily file when `log_dir` is
/// configured. The returned guard must live until exit to flush the file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    config.apply_env()?;

    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(command = ?cli.command, "freightline starting");

    // The keyring account is chosen by username, so settle it first
    if let Command::Login { username } = &cli.command {
        let username = match username.clone().or_else(|| config.last_username.clone()) {
            Some(username) => username,
            None => prompt("Username: ")?,
        };
        config.last_username = Some(username);
    }

    let session = SessionManager::from_config(&config)?
        .on_logout(|| {
            eprintln!("Your session has expired. Run `freightline login` to sign in again.");
        })
        .build();

    match cli.command {
        Command::Login { .. } => login(&session, &config).await,
        Command::Status => status(&session).await,
        Command::Whoami => whoami(&session).await,
        Command::Get { path, v2 } => {
            let version = if v2 { ApiVersion::V2 } else { ApiVersion::V1 };
            get(session, &config, &path, version).await
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out.");
            Ok(())
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} is required", label.trim_end_matches([':', ' ']));
    }
    Ok(value)
}

async fn login(session: &SessionManager, config: &Config) -> Result<()> {
    let username = config
        .last_username
        .as_deref()
        .context("No username given")?;
    let password = rpassword::prompt_password("Password: ")?;

    let user = session
        .login(username, &password)
        .await
        .context("Login failed")?;
    config.save()?;

    println!("Logged in as {}", user.display_name());
    Ok(())
}

async fn status(session: &SessionManager) -> Result<()> {
    match session.bootstrap().await {
        SessionStatus::Authenticated(user) => {
            println!("Logged in as {}", user.display_name());
            if let Some(minutes) = session
                .credentials()
                .and_then(|c| c.minutes_until_expiry())
            {
                println!("Access token expires in {} min", minutes);
            }
            println!("Credentials stored in: {}", session.store().name());
        }
        _ => println!("Not logged in."),
    }
    Ok(())
}

async fn whoami(session: &SessionManager) -> Result<()> {
    if !session.bootstrap().await.is_authenticated() {
        bail!("Not logged in. Run `freightline login` first.");
    }
    match session.current_user().await? {
        Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
        None => bail!("The backend no longer recognizes this session"),
    }
    Ok(())
}

async fn get(
    session: SessionManager,
    config: &Config,
    path: &str,
    version: ApiVersion,
) -> Result<()> {
    if !session.bootstrap().await.is_authenticated() {
        bail!("Not logged in. Run `freightline login` first.");
    }
    let client = ApiClient::for_version(session, config, version);
    let value: serde_json::Value = client
        .get(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
