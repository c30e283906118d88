use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use omnix_edge::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use omnix_edge::config::{Config, StorageKind};
use omnix_edge::gateway::{ControlOutcome, Gateway, MemorySyncQueue, SyncQueue, SYNC_TAG};
use omnix_edge::http::{ApiClient, HttpNetwork, Method, Network, Request, Session, TokenRefresher};
use omnix_edge::logging;
use omnix_edge::realtime::{ChannelManager, RealtimeEvent, TungsteniteTransport};

#[derive(Parser, Debug)]
#[command(name = "omnix")]
#[command(about = "Offline cache gateway and realtime client for the OMNIX AI dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/omnix/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a URL through the cache gateway
  Fetch {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: Method,
  },
  /// Precache the app shell
  Install,
  /// Delete stale cache buckets
  Activate,
  /// Store URLs in the dynamic cache
  Prefetch {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Replay requests queued while offline
  Sync,
  /// Render a push payload as a notification
  Push { payload: Option<String> },
  /// Call the backend API with retries and re-authentication
  Api {
    method: Method,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Print realtime messages for the given channels
  Watch {
    #[arg(required = true)]
    channels: Vec<String>,
  },
}

struct Edge {
  gateway: Gateway,
  sync_queue: Arc<dyn SyncQueue>,
}

impl Edge {
  fn build(config: &Config) -> Result<Self> {
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(config.cache.fetch_timeout()));

    let (storage, sync_queue): (Arc<dyn CacheStorage>, Arc<dyn SyncQueue>) =
      match config.cache.storage {
        StorageKind::Memory => {
          let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
          let queue: Arc<dyn SyncQueue> = Arc::new(MemorySyncQueue::default());
          (storage, queue)
        }
        StorageKind::Sqlite => {
          let db = Arc::new(match &config.cache.path {
            Some(path) => SqliteStorage::open_at(path)?,
            None => SqliteStorage::open()?,
          });
          let storage: Arc<dyn CacheStorage> = db.clone();
          let queue: Arc<dyn SyncQueue> = db;
          (storage, queue)
        }
      };

    let gateway = Gateway::new(&config.cache, storage, network)
      .with_sync_queue(Arc::clone(&sync_queue));

    Ok(Self {
      gateway,
      sync_queue,
    })
  }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn parse_json(text: &str) -> Result<Value> {
  serde_json::from_str(text).map_err(|e| eyre!("Invalid JSON: {}", e))
}

async fn fetch(edge: &Edge, url: &str, method: Method) -> Result<()> {
  let request = Request::new(method, edge.gateway.resolve(url)?);
  let response = edge
    .gateway
    .fetch(request)
    .await
    .map_err(|e| eyre!("Fetch failed: {}", e))?;

  println!("{} ({:?})", response.status, response.source);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.body_text());
  Ok(())
}

async fn api(config: &Config, edge: &Edge, method: Method, path: &str, body: Option<&str>) -> Result<()> {
  let body = body.map(parse_json).transpose()?;
  let session = Arc::new(Session::new(Config::credentials()));
  let policy = config.api.retry_policy();
  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(policy.timeout));
  let refresher = TokenRefresher::new(Arc::clone(&network), &config.api.base_url)
    .map_err(|e| eyre!("Invalid API base URL: {}", e))?;

  let client = ApiClient::new(network, config.api.base_url.clone(), session)
    .with_retry_policy(policy)
    .with_refresher(Arc::new(refresher))
    .with_sync_queue(Arc::clone(&edge.sync_queue));

  match client.request(method, path, body.as_ref()).await {
    Ok(value) => print_json(&value),
    Err(e) => {
      if let Some(detail) = &e.detail {
        warn!(%detail, "API error detail");
      }
      Err(eyre!("{} ({}): {}", e.code.as_str(), e.status, e.message))
    }
  }
}

async fn watch(config: &Config, channels: &[String]) -> Result<()> {
  let manager = ChannelManager::new(&config.realtime, Arc::new(TungsteniteTransport));
  let mut events = manager.events();

  for channel in channels {
    let name = channel.clone();
    manager.subscribe(channel, move |payload| println!("{}: {}", name, payload));
  }

  if let Err(e) = manager.connect().await {
    warn!(error = %e, "initial connection failed, retrying in background");
  }

  let result = loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break Ok(()),
      event = events.recv() => match event {
        Ok(RealtimeEvent::StateChange { from, to }) => info!(%from, %to, "connection state"),
        Ok(RealtimeEvent::ReconnectFailed { attempts }) => {
          break Err(eyre!("Gave up after {} reconnect attempts", attempts));
        }
        Ok(_) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => break Ok(()),
      },
    }
  };

  manager.dispose();
  result
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Watch { channels } => watch(&config, &channels).await,
    command => {
      let edge = Edge::build(&config)?;
      match command {
        Command::Fetch { url, method } => fetch(&edge, &url, method).await,
        Command::Install => {
          let report = edge.gateway.on_install().await?;
          println!("cached {}, failed {}", report.cached.len(), report.failed.len());
          for path in &report.failed {
            println!("  failed: {}", path);
          }
          Ok(())
        }
        Command::Activate => {
          let report = edge.gateway.on_activate().await?;
          for name in &report.deleted {
            println!("deleted {}", name);
          }
          println!("kept {}", report.kept.join(", "));
          Ok(())
        }
        Command::Prefetch { urls } => match edge.gateway.cache_urls(&urls).await {
          ControlOutcome::Cached { stored, failed } => {
            println!("stored {}, failed {}", stored, failed);
            Ok(())
          }
          other => Err(eyre!("Unexpected prefetch outcome: {:?}", other)),
        },
        Command::Sync => {
          match edge.gateway.on_sync(SYNC_TAG).await? {
            Some(report) => println!(
              "replayed {}: {} succeeded, {} failed, {} unreadable dropped",
              report.attempted, report.succeeded, report.failed, report.discarded
            ),
            None => println!("nothing to sync"),
          }
          Ok(())
        }
        Command::Push { payload } => {
          let notification = edge.gateway.on_push(payload.as_deref().map(str::as_bytes));
          print_json(&notification)
        }
        Command::Api { method, path, body } => {
          api(&config, &edge, method, &path, body.as_deref()).await
        }
        Command::Watch { .. } => Ok(()),
      }
    }
  }
}
