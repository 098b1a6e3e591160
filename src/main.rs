//! # page-relay CLI (`pagerelay`)
//!
//! Drives the same request handling a chat transport would, from the
//! command line. Replies go to stdout; logs go to stderr.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagerelay publish --user <id> <file>` | Publish a `.html` file or `.zip` site |
//! | `pagerelay delete --user <id>` | Remove a user's site |
//! | `pagerelay stats` | Count published sites |
//! | `pagerelay check --user <id>` | Show whether the access policy admits a user |
//!
//! ## Examples
//!
//! ```bash
//! # Publish a ZIP site for user 42
//! GITHUB_TOKEN=... pagerelay --config ./config/relay.toml publish --user 42 site.zip
//!
//! # See what would be uploaded without touching GitHub
//! pagerelay publish --user 42 site.zip --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use page_relay::config;
use page_relay::relay::{InboundUpload, Relay};
use page_relay::store::github::GithubStore;
use page_relay::store::memory::MemoryStore;
use page_relay::store::ContentStore;

/// page-relay: publish HTML files and ZIP sites to GitHub Pages.
#[derive(Parser)]
#[command(
    name = "pagerelay",
    about = "page-relay: publish HTML files and ZIP sites to GitHub Pages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a `.html` document or `.zip` site for a user.
    ///
    /// The site lands in the `user_<id>` folder of the configured
    /// repository and the public URL is printed.
    Publish {
        /// Requesting user's chat identity.
        #[arg(long)]
        user: i64,

        /// File to publish.
        file: PathBuf,

        /// Publish into an in-memory store instead of GitHub.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete a user's site.
    ///
    /// Only `index.html` is removed; other files from a ZIP upload remain
    /// in the repository.
    Delete {
        #[arg(long)]
        user: i64,
    },

    /// Count users with a published site.
    Stats {
        /// Identity to check against the access policy.
        #[arg(long, default_value_t = 0)]
        user: i64,
    },

    /// Show whether the access policy admits a user.
    Check {
        #[arg(long)]
        user: i64,
    },
}

fn init_tracing(level: &str) {
    let level: tracing::Level = level.parse().unwrap_or(tracing::Level::WARN);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    let dry_run = matches!(cli.command, Commands::Publish { dry_run: true, .. });
    let store: Arc<dyn ContentStore> = if dry_run || matches!(cli.command, Commands::Check { .. }) {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(GithubStore::from_env(&cfg)?)
    };
    let relay = Relay::new(&cfg, store);

    match cli.command {
        Commands::Publish { user, file, dry_run } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, finishing in-flight uploads");
                    on_signal.cancel();
                }
            });

            let reply = relay
                .handle_upload_with_cancel(
                    InboundUpload {
                        requester: user,
                        file_name,
                        bytes,
                    },
                    cancel,
                )
                .await;
            println!("{}", reply);
            if dry_run {
                eprintln!("(dry run: nothing was sent to GitHub)");
            }
        }
        Commands::Delete { user } => {
            println!("{}", relay.handle_delete(user).await);
        }
        Commands::Stats { user } => {
            println!("{}", relay.handle_stats(user).await);
        }
        Commands::Check { user } => {
            if relay.access().is_allowed(user) {
                println!("allowed");
            } else {
                println!("denied");
            }
        }
    }

    Ok(())
}
