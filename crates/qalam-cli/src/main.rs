//! Qalam CLI - a command-line client for the Qalam content platform.
//!
//! Signs in, keeps the session's tokens between runs, and issues raw API
//! calls with the same automatic token refresh the web front-end uses.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use qalam_core::auth::AuthNavigator;
use qalam_core::{
    error_message, ApiClient, Config, FileTokenStore, KeyringTokenStore, Locale, TokenBackend,
    TokenStore,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for optional log files, rotated daily.
const ENV_LOG_DIR: &str = "QALAM_LOG_DIR";

const USAGE: &str = "\
Usage: qalam <command>

Commands:
  login [email]        Sign in and store the session
  logout               Sign out and forget the session
  whoami               Show the signed-in user
  status               Show where the session is stored and its age
  get <path>           GET an API path and print the JSON reply
  post <path> <json>   POST a JSON body to an API path";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "qalam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Tells the terminal user to sign in again.
struct TerminalNavigator {
    locale: Locale,
}

impl AuthNavigator for TerminalNavigator {
    fn navigate(&self, target: &str) {
        info!(target_path = target, "Redirecting to sign-in");
        eprintln!("{}", self.locale.session_expired());
        eprintln!("Run `qalam login` to start a new session.");
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.token_backend {
        TokenBackend::File => Arc::new(FileTokenStore::open(config.cache_dir()?)?),
        TokenBackend::Keyring => Arc::new(KeyringTokenStore::open()?),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load().context("Failed to load config")?;
    let locale = config.locale;
    let store = open_store(&config)?;
    let client = ApiClient::new(config.client_config(), store.clone())?
        .with_navigator(Arc::new(TerminalNavigator { locale }));

    let result = match command.as_str() {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "logout" => logout(&client).await,
        "whoami" => whoami(&client).await,
        "status" => status(&config, store.as_ref()),
        "get" => match args.get(1) {
            Some(path) => get(&client, path).await,
            None => Err(anyhow::anyhow!("get needs a path")),
        },
        "post" => match (args.get(1), args.get(2)) {
            (Some(path), Some(body)) => post(&client, path, body).await,
            _ => Err(anyhow::anyhow!("post needs a path and a JSON body")),
        },
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("unknown command: {}\n\n{}", other, USAGE)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", error_message(&e, locale));
        tracing::debug!(error = ?e, "Command failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    let user = client.login(&email, &password).await?;

    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    match user {
        Some(user) => println!("Signed in as {}.", user.display_name()),
        None => println!("Signed in as {}.", email),
    }
    Ok(())
}

async fn logout(client: &ApiClient) -> Result<()> {
    client.logout().await?;
    println!("Signed out.");
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    let user = client.profile().await?;
    println!("{} <{}>", user.display_name(), user.email);
    if let Some(credits) = user.credits {
        println!("Credits: {}", credits);
    }
    if user.is_admin() {
        println!("Role: admin");
    }
    Ok(())
}

fn status(config: &Config, store: &dyn TokenStore) -> Result<()> {
    println!("API:     {}", config.api_base_url);
    match config.token_backend {
        TokenBackend::File => {
            let file_store = FileTokenStore::open(config.cache_dir()?)?;
            println!("Storage: {}", file_store.path().display());
            match file_store.session() {
                Some(session) => println!("Session: signed in, saved {}", session.age_display()),
                None => println!("Session: signed out"),
            }
        }
        TokenBackend::Keyring => {
            println!("Storage: OS keychain");
            let state = if store.is_logged_in() { "signed in" } else { "signed out" };
            println!("Session: {}", state);
        }
    }
    Ok(())
}

async fn get(client: &ApiClient, path: &str) -> Result<()> {
    let value: serde_json::Value = client.get(path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn post(client: &ApiClient, path: &str, body: &str) -> Result<()> {
    let body: serde_json::Value = serde_json::from_str(body).context("Body is not valid JSON")?;
    let value: serde_json::Value = client.post(path, &body).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("No input given");
    }
    Ok(value)
}
