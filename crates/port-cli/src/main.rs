use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use port_store::Store;
use port_sync::{SyncClient, SyncConfig};
use port_trigger::{TriggerBus, TriggerEvent};
use port_vault::keyring::{DEFAULT_ACCOUNT, DEFAULT_SERVICE};
use port_vault::{EncryptedFileStorage, SecureVault};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_QUALIFIER: &str = "tech";
const APP_ORG: &str = "numberless";
const APP_NAME: &str = "port";

const DB_FILE: &str = "port.db";
const VAULT_FILE: &str = "vault.bin";

#[derive(Parser)]
#[command(name = "port")]
#[command(about = "Port local data layer: store, vault and server sync", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Sync settings file (JSON); falls back to PORT_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seal the vault with a master key kept in the OS keyring instead of a password
    #[arg(long, global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the local database up to the latest schema
    Migrate,

    /// Show schema version and migration history
    Status,

    /// Manage the stored auth token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Fetch the pending message queue and print it as JSON
    Fetch,

    /// Upload a media file and print its media id
    Upload {
        /// File to upload
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a new token (read from the terminal)
    Set,
    /// Report whether a token is stored
    Status,
    /// Remove the stored token
    Clear,
}

fn data_dir(cli: &Cli) -> Result<PathBuf> {
    let dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or_else(|| anyhow!("cannot determine data directory"))?
            .data_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data directory {}", dir.display()))?;
    Ok(dir)
}

fn open_vault(cli: &Cli, dir: &Path) -> Result<SecureVault> {
    let path = dir.join(VAULT_FILE);
    let storage = if cli.keyring {
        EncryptedFileStorage::open_with_keyring(&path, DEFAULT_SERVICE, DEFAULT_ACCOUNT)?
    } else {
        let password = match std::env::var("PORT_VAULT_PASSWORD") {
            Ok(password) => password,
            Err(_) => rpassword::prompt_password("Vault password: ")?,
        };
        if password.is_empty() {
            return Err(anyhow!("vault password must not be empty"));
        }
        EncryptedFileStorage::open_with_password(&path, &password)?
    };
    Ok(SecureVault::new(storage))
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "port=info,port_store=info,port_sync=info,port_vault=info,port_trigger=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = data_dir(&cli)?;

    match &cli.command {
        Commands::Migrate => {
            let store = Store::open(&dir.join(DB_FILE)).await?;
            println!("schema version {}", store.schema_version());
            store.close().await;
        }
        Commands::Status => {
            let store = Store::open(&dir.join(DB_FILE)).await?;
            println!("schema version {}", store.schema_version());
            for applied in store.migration_history().await? {
                println!(
                    "  v{:<3} {}  {}",
                    applied.version,
                    applied.applied_at.to_rfc3339(),
                    applied.description
                );
            }
            store.close().await;
        }
        Commands::Token { action } => {
            let vault = open_vault(&cli, &dir)?;
            match action {
                TokenAction::Set => {
                    let token = rpassword::prompt_password("Auth token: ")?;
                    if token.trim().is_empty() {
                        return Err(anyhow!("token must not be empty"));
                    }
                    vault.save_token(token.trim())?;
                    println!("token stored");
                }
                TokenAction::Status => match vault.load_token()? {
                    Some(stored) => match stored.saved_at {
                        Some(at) => println!("token present (saved {})", at.to_rfc3339()),
                        None => println!("token present"),
                    },
                    None => println!("no token stored"),
                },
                TokenAction::Clear => {
                    vault.clear_token()?;
                    println!("token cleared");
                }
            }
        }
        Commands::Fetch => {
            // Nothing reaches the network before the schema is current.
            let store = Store::open(&dir.join(DB_FILE)).await?;
            let vault = open_vault(&cli, &dir)?;
            let triggers = TriggerBus::new();
            let new_messages = triggers.subscribe(TriggerEvent::NewMessage);
            let client = SyncClient::new(load_config(&cli)?, vault, triggers)?;

            let messages = client.get_messages().await?;
            if new_messages.has_changed() {
                info!(count = messages.len(), "new messages available");
            }
            println!("{}", serde_json::to_string_pretty(&messages)?);
            store.close().await;
        }
        Commands::Upload { path } => {
            let store = Store::open(&dir.join(DB_FILE)).await?;
            let vault = open_vault(&cli, &dir)?;
            let client = SyncClient::new(load_config(&cli)?, vault, TriggerBus::new())?;

            match client.upload_file(path).await {
                Ok(media_id) => println!("{media_id}"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "upload failed");
                    store.close().await;
                    return Err(e.into());
                }
            }
            store.close().await;
        }
    }

    Ok(())
}
