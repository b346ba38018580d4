//! # pushcov CLI
//!
//! Prints the most recent pushes of a repository with the coverage summary
//! of each changeset, keeping a local cache and polling while coverage is
//! still being computed.
//!
//! ## Usage
//!
//! ```bash
//! pushcov --config ./config/pushcov.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pushcov init` | Create the SQLite cache database |
//! | `pushcov show` | Print the current view (cached when fresh) |
//! | `pushcov watch` | Print, then poll and reprint until nothing is pending |
//! | `pushcov serve` | Serve the view model over HTTP |
//! | `pushcov cache status` | Show cache age and contents |
//! | `pushcov cache clear` | Drop the cached snapshot |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `pushcov=info`).

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pushcov::cache::{self, SqliteCache};
use pushcov::config::{self, Config};
use pushcov::controller::{ControllerSettings, RefreshController};
use pushcov::coverage::CoverageBackend;
use pushcov::hg::HgPushlog;
use pushcov::models::ViewModel;
use pushcov::{migrate, server, view};

/// pushcov: coverage summaries for the latest pushes of a repository.
#[derive(Parser)]
#[command(name = "pushcov", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/pushcov.toml")]
    config: PathBuf,

    /// Override `[repo].name` from the config file.
    #[arg(long, global = true)]
    repo: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache database schema. Safe to run repeatedly.
    Init,

    /// Print the changesets of the latest pushes.
    ///
    /// Uses the cached snapshot when it is younger than `[cache].ttl_secs`,
    /// otherwise fetches pushes and coverage live.
    Show {
        /// Print the view model as JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Ignore the cache and fetch live.
        #[arg(long)]
        refresh: bool,
    },

    /// Like `show`, then poll pending changesets every
    /// `[polling].interval_ms` and reprint until none is pending.
    Watch {
        #[arg(long)]
        json: bool,
    },

    /// Serve the view model on `[server].bind`.
    Serve,

    /// Inspect or drop the cached snapshot.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show when the snapshot was taken and what it holds.
    Status,
    /// Remove the cached snapshot.
    Clear,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pushcov=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn build_controller(cfg: &Config) -> Result<RefreshController> {
    let cache = SqliteCache::open(cfg).await?;
    Ok(RefreshController::new(
        ControllerSettings::from_config(cfg),
        Arc::new(HgPushlog::new(cfg)?),
        Arc::new(CoverageBackend::new(cfg)?),
        Arc::new(cache),
    ))
}

fn print_view(view_model: &ViewModel, json: bool) -> Result<()> {
    if json {
        println!("{}", view::render_json(view_model)?);
    } else {
        print!("{}", view::render_table(view_model));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(repo) = cli.repo {
        cfg.repo.name = repo;
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache database initialized at {}.", cfg.cache.path.display());
        }
        Commands::Show { json, refresh } => {
            let mut controller = build_controller(&cfg).await?;
            let outcome = if refresh {
                controller.fetch_pushes().await.map(|_| ())
            } else {
                controller.activate().await
            };
            print_view(&controller.view(), json)?;
            outcome?;
        }
        Commands::Watch { json } => {
            let mut controller = build_controller(&cfg).await?;
            let outcome = controller.activate().await;
            print_view(&controller.view(), json)?;
            outcome?;
            let mut printed = Ok(());
            controller
                .run_polling(|view_model| {
                    printed = print_view(view_model, json);
                    if printed.is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })
                .await;
            printed?;
        }
        Commands::Serve => {
            let controller = build_controller(&cfg).await?;
            server::run_server(&cfg.server.bind, controller).await?;
        }
        Commands::Cache { action } => {
            let store = SqliteCache::open(&cfg).await?;
            match action {
                CacheAction::Status => {
                    match cache::read_cached_time(&store).await? {
                        Some(cached_time) => {
                            let age = cache::epoch_secs(Utc::now()) - cached_time;
                            let fresh = cache::is_fresh(cached_time, Utc::now(), cfg.cache.ttl());
                            let count = cache::read_changesets(&store)
                                .await?
                                .map(|c| c.len())
                                .unwrap_or(0);
                            println!("  cached at:   {:.0}", cached_time);
                            println!("  age:         {:.0}s", age);
                            println!("  fresh:       {}", fresh);
                            println!("  changesets:  {}", count);
                        }
                        None => println!("  cache is empty"),
                    }
                }
                CacheAction::Clear => {
                    cache::clear(&store).await?;
                    println!("Cache cleared.");
                }
            }
            store.close().await;
        }
    }

    Ok(())
}
