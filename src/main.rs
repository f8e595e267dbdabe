mod app;
mod cache;
mod config;
mod content;
mod event;
mod logging;
mod prefetch;
mod trigger;
mod ui;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cache::{devtools, GateOutcome, QueryCache, SnapshotStore, VersionGate};
use content::{ContentClient, ContentSource, Page};

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "A terminal viewer for the studio's portfolio content")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/folio/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Page to open
  #[arg(short, long, value_enum)]
  page: Option<Page>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Inspect or clear the persisted query cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Show snapshot size and age
  Stats,
  /// List cached query keys
  Keys,
  /// Write the snapshot to a JSON file
  Export { path: PathBuf },
  /// Delete the snapshot
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override start page if specified on command line
  let config = if let Some(page) = args.page {
    config::Config {
      default_page: Some(page),
      ..config
    }
  } else {
    config
  };

  let data_dir = cache::data_dir()?;
  let _log_guard = logging::init(&data_dir)?;

  let storage = open_storage();
  let settings = config.cache_settings();

  // Purge other builds' snapshots before anything reads the cache
  let gate = VersionGate::new(Arc::clone(&storage), settings.prefix.clone());
  let outcome = gate.reconcile(&settings.version);
  if let GateOutcome::Reconciled { purged } = &outcome {
    if !purged.is_empty() {
      info!(count = purged.len(), "Dropped cache snapshots from other versions");
    }
  }

  let cache = QueryCache::new(Arc::clone(&storage), settings);

  if let Some(Command::Cache(command)) = args.command {
    return run_cache_command(command, storage.as_ref(), &cache);
  }

  if outcome.can_restore() {
    cache.restore();
  }

  // Initialize and run the app
  let source: Arc<dyn ContentSource> = Arc::new(ContentClient::new(&config)?);
  let mut app = app::App::new(config, cache, source)?;
  app.run().await?;

  Ok(())
}

/// Durable storage, or a no-op store when it can't be opened.
fn open_storage() -> Arc<dyn SnapshotStore> {
  match cache::SqliteStorage::open() {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!(error = %e, "Cache storage unavailable, running without persistence");
      Arc::new(cache::NoopStorage)
    }
  }
}

fn run_cache_command(
  command: CacheCommand,
  storage: &dyn SnapshotStore,
  cache: &QueryCache,
) -> Result<()> {
  let key = cache.storage_key();

  match command {
    CacheCommand::Stats => {
      let stats = devtools::stats(storage, key)?;
      println!("key:      {}", stats.storage_key);
      println!("queries:  {}", stats.queries);
      println!("size:     {} bytes", stats.bytes);
      match stats.written_at {
        Some(at) => println!("written:  {}", at.to_rfc3339()),
        None => println!("written:  never"),
      }
    }
    CacheCommand::Keys => {
      for query_key in devtools::list_keys(storage, key)? {
        println!("{}", query_key.query_hash());
      }
    }
    CacheCommand::Export { path } => {
      let count = devtools::export(storage, key, &path)?;
      println!("Exported {} queries to {}", count, path.display());
    }
    CacheCommand::Clear => {
      cache.clear();
      println!("Cleared {}", key);
    }
  }

  Ok(())
}
