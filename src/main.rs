use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

use statesync::cache::{EntryId, EntryStore, MemoryStore, SqliteStore, DEFAULT_SUB_KEY};
use statesync::config::Config;
use statesync::lifecycle::{Lifecycle, LifecycleHandler};
use statesync::logging;
use statesync::remote::{Credential, HttpTransport};
use statesync::sync::{PushOutcome, SyncOptions, SyncService};

#[derive(Parser, Debug)]
#[command(name = "statesync")]
#[command(about = "Local-first cache for per-feature application state")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/statesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory instead of the state database
  #[arg(long)]
  ephemeral: bool,

  /// Also log to stderr at debug level
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print an entry's cached state
  Get {
    feature: String,
    #[arg(short, long, default_value = DEFAULT_SUB_KEY)]
    key: String,
  },
  /// Write an entry and push it before exiting
  Set {
    feature: String,
    /// New state as JSON
    json: String,
    #[arg(short, long, default_value = DEFAULT_SUB_KEY)]
    key: String,
  },
  /// Hydrate an empty cache from the server, or reconcile a populated one
  Login,
  /// Push dirty entries, then pull remote changes
  Sync,
  /// List entries with their sync state
  Status,
  /// Keep polling for remote changes until interrupted
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&logging::default_log_dir()?, args.verbose)?;

  if args.ephemeral {
    run(MemoryStore::new(), &config, args.command).await
  } else {
    let storage = match &config.storage.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_default()?,
    };
    run(storage, &config, args.command).await
  }
}

async fn run<S: EntryStore>(storage: S, config: &Config, command: Command) -> Result<()> {
  let transport = HttpTransport::new(config)?;
  let service = SyncService::new(storage, transport, SyncOptions::from(&config.sync));

  match command {
    Command::Get { feature, key } => {
      let id = EntryId::new(feature, key);
      let entry = service
        .entry(&id)
        .ok_or_else(|| eyre!("No cached state for {}", id))?;
      println!("{}", serde_json::to_string_pretty(&entry.state)?);
    }

    Command::Set { feature, json, key } => {
      let id = EntryId::new(feature, key);
      let state: Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON state: {}", e))?;
      let credential = credential()?;

      service.write(&id, &state, Some(&credential))?;
      // The process exits right away, so treat it as an unload
      for (id, outcome) in service.on_lifecycle(Lifecycle::Unload).await {
        report(&id, &outcome);
      }
    }

    Command::Login => {
      let outcome = service.on_login(&credential()?).await;
      println!("{:?}", outcome);
    }

    Command::Sync => {
      let credential = credential()?;
      for (id, outcome) in service.push_dirty(&credential).await {
        report(&id, &outcome);
      }
      service.invalidate_freshness();
      println!("{:?}", service.reconcile(&credential).await);
    }

    Command::Status => {
      for status in service.status() {
        println!(
          "{:<32} {:<6} modified {}  synced {}",
          status.id.to_string(),
          if status.dirty { "dirty" } else { "clean" },
          status.last_modified_at,
          status.last_synced_at,
        );
      }
    }

    Command::Watch => watch(&service, credential()?).await,
  }

  Ok(())
}

async fn watch<S: EntryStore>(service: &SyncService<S, HttpTransport>, credential: Credential) {
  let mut lifecycle = LifecycleHandler::new();
  let poller = service.spawn_poller(credential);
  info!("Watching for remote changes");

  while let Some(event) = lifecycle.next().await {
    for (id, outcome) in service.on_lifecycle(event).await {
      report(&id, &outcome);
    }
    if event == Lifecycle::Unload {
      break;
    }
  }

  poller.abort();
}

fn credential() -> Result<Credential> {
  Config::get_api_token().map(Credential::new)
}

fn report(id: &EntryId, outcome: &PushOutcome) {
  match outcome {
    PushOutcome::Synced(ts) => println!("{}: synced at {}", id, ts),
    PushOutcome::Skipped => println!("{}: nothing to push", id),
    PushOutcome::Superseded(_) => println!("{}: changed during push, still dirty", id),
    PushOutcome::Failed => println!("{}: push failed, still dirty", id),
  }
}
