//! postbox command line
//!
//! ```bash
//! # Run the queue sweeper until interrupted
//! postbox --config postbox.toml serve
//!
//! # Manage accounts
//! postbox user add alice@example.com secret
//! postbox user passwd alice@example.com new-secret new-secret
//! postbox user list
//!
//! # Inspect or flush the retry queue
//! postbox queue list
//! postbox queue sweep
//!
//! # Print the DKIM and SPF TXT records to publish
//! postbox dns
//!
//! # Show the effective configuration
//! postbox config show
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use postbox_rs::delivery::{self, RetryWorker};
use postbox_rs::identity::Login;
use postbox_rs::{dkim, logging, Config, Postbox, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG: &str = "postbox.toml";

#[derive(Parser)]
#[command(name = "postbox")]
#[command(about = "Self-hosted mail transfer and storage", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./postbox.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background queue sweep until interrupted
    Serve,
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Inspect the retry queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Print the DNS TXT records to publish for the domain
    Dns,
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user with the default mailboxes
    Add {
        identity: String,
        password: String,
        #[arg(long)]
        admin: bool,
    },
    /// Delete a user and everything it owns
    Delete { identity: String },
    /// List all users
    List,
    /// Change a user's password
    Passwd {
        identity: String,
        password: String,
        confirmation: String,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show queued deliveries
    List,
    /// Run one sweep now
    Sweep,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration, defaults included
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::User { command } => user(config, command).await,
        Commands::Queue { command } => queue(config, command).await,
        Commands::Dns => dns(config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Config::from_file(DEFAULT_CONFIG).with_context(|| format!("loading {}", DEFAULT_CONFIG))
        }
        None => Ok(Config::default()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting postbox for {}", config.server.domain);
    info!("  Database: {}", config.storage.database_url);
    info!("  Retry schedule: {}", config.delivery.retry_schedule);

    let postbox = Postbox::open(config).await?;
    let sweeper = postbox.start_retries()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    sweeper.shutdown().await;
    Ok(())
}

async fn dns(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.database_url).await?;
    let pem = dkim::load_or_generate_key(&store, config.dkim.key_bits).await?;

    println!(
        "{}._domainkey.{} IN TXT \"{}\"",
        config.dkim.selector,
        config.server.domain,
        dkim::dns_record(&pem)?
    );
    println!(
        "{} IN TXT \"{}\"",
        config.server.domain,
        delivery::spf_record(&config.server.hostname)
    );
    Ok(())
}

async fn user(config: Config, command: UserCommands) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.database_url).await?;
    let login = Login::new(store.clone(), config.accounts.default_mailboxes.clone());

    match command {
        UserCommands::Add {
            identity,
            password,
            admin,
        } => {
            let user = login.new_user(&identity, &password, admin).await?;
            println!("✓ User {} added (id {})", user.identity, user.id);
        }
        UserCommands::Delete { identity } => {
            store.delete_user(&identity).await?;
            println!("✓ User {} deleted", identity);
        }
        UserCommands::List => {
            let users = store.get_users().await?;
            if users.is_empty() {
                println!("No users found");
            }
            for user in users {
                let role = if user.admin { " (admin)" } else { "" };
                println!("{}{}", user.identity, role);
            }
        }
        UserCommands::Passwd {
            identity,
            password,
            confirmation,
        } => {
            login.change_password(&identity, &password, &confirmation).await?;
            println!("✓ Password changed for {}", identity);
        }
    }
    Ok(())
}

async fn queue(config: Config, command: QueueCommands) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.database_url).await?;

    match command {
        QueueCommands::List => {
            let queue = store.get_queue().await?;
            if queue.is_empty() {
                println!("Queue is empty");
            }
            for entry in queue {
                println!(
                    "{}\t{}\t{} -> {}\tretries={}\t{} bytes",
                    entry.id,
                    entry.timestamp.to_rfc3339(),
                    entry.from,
                    entry.to,
                    entry.retries,
                    entry.content.len()
                );
            }
        }
        QueueCommands::Sweep => {
            let relay = Arc::new(delivery::remote_relay(&config.server, &config.delivery));
            let worker = RetryWorker::new(
                store,
                relay,
                config.delivery.max_retries,
                config.server.hostname.clone(),
            );
            let report = worker.sweep().await?;
            println!(
                "delivered={} retried={} bounced={} errors={}",
                report.delivered, report.retried, report.bounced, report.errors
            );
        }
    }
    Ok(())
}
