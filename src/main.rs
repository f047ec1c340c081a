mod cache;
mod config;
mod connectivity;
mod db;
mod pos;
mod queue;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{BusinessId, CacheLayer, ListParams, SortOrder, SqliteStorage};
use connectivity::{Connectivity, ConnectivityState, NetworkMonitor};
use pos::client::PosClient;
use pos::service::OfflineService;
use queue::TransactionQueue;

#[derive(Parser, Debug)]
#[command(name = "pos-offline")]
#[command(about = "Offline-first product, category and customer cache for POS terminals")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pos-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Business to act on (default: default_business_id from the config)
  #[arg(short, long, global = true)]
  business: Option<BusinessId>,

  /// Skip the connectivity probe and serve everything from the local store
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch products, categories and customers into the local store
  Preload,
  /// Drop every cached record of the business
  Clear,
  /// List products
  Products(ListArgs),
  /// List categories
  Categories,
  /// List customers
  Customers(ListArgs),
  /// Search products (or customers), local store first
  Search {
    term: String,
    #[arg(long)]
    customers: bool,
  },
  /// Show one cached product
  Product { id: i64 },
  /// Show when each entity type was last refreshed
  Status,
  /// Manage orders waiting to be submitted
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// Queue an order given as JSON
  Add { order: String },
  /// Orders waiting to be submitted
  List,
  /// Orders whose submission failed
  Failed,
  /// Move a failed order back to pending
  Retry { id: i64 },
  /// Submit every pending order now
  Sync,
  /// Delete old synced orders
  Prune,
  /// Count orders by status
  Status,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
  #[arg(long)]
  search: Option<String>,
  /// Category id, or "all"
  #[arg(long)]
  category: Option<String>,
  #[arg(long)]
  sort_by: Option<String>,
  #[arg(long, value_enum)]
  sort_order: Option<SortOrderArg>,
  #[arg(long)]
  page: Option<u32>,
  #[arg(long)]
  per_page: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortOrderArg {
  Asc,
  Desc,
}

impl From<ListArgs> for ListParams {
  fn from(args: ListArgs) -> Self {
    ListParams {
      search: args.search,
      category: args.category,
      sort_by: args.sort_by,
      sort_order: args.sort_order.map(|order| match order {
        SortOrderArg::Asc => SortOrder::Asc,
        SortOrderArg::Desc => SortOrder::Desc,
      }),
      page: args.page,
      per_page: args.per_page,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let business = args.business.or(config.default_business_id);

  let db = db::Database::open(config.cache.path.as_deref())?;

  let monitor = Arc::new(NetworkMonitor::new(
    Some(config.health_url()?),
    config.request_timeout(),
  )?);
  if args.offline {
    monitor.set_state(ConnectivityState::Offline);
  } else {
    monitor.probe().await;
  }
  let connectivity: Arc<dyn Connectivity> = monitor.clone();

  let client = PosClient::new(&config)?;
  let cache = CacheLayer::new(SqliteStorage::new(&db), connectivity)
    .with_request_timeout(config.request_timeout())
    .with_staleness(config.staleness_policy());
  let service = OfflineService::with_client(cache, client.clone());
  let queue = TransactionQueue::new(&db);

  match args.command {
    Command::Preload => print_json(&service.preload_data(require_business(business)?).await),
    Command::Clear => print_json(&service.clear_cache(require_business(business)?)),
    Command::Products(list) => {
      let params = ListParams::from(list);
      print_json(&service.get_products(require_business(business)?, &params).await)
    }
    Command::Categories => print_json(&service.get_categories(require_business(business)?).await),
    Command::Customers(list) => {
      let params = ListParams::from(list);
      print_json(&service.get_customers(require_business(business)?, &params).await)
    }
    Command::Search { term, customers } => {
      let business_id = require_business(business)?;
      if customers {
        print_json(&service.search_customers(business_id, &term).await)
      } else {
        print_json(&service.search_products(business_id, &term).await)
      }
    }
    Command::Product { id } => print_json(&service.get_product(require_business(business)?, id)),
    Command::Status => print_json(&service.sync_status(require_business(business)?)),
    Command::Queue { action } => {
      run_queue(action, &queue, monitor.as_ref(), &client, &config, business).await
    }
  }
}

async fn run_queue(
  action: QueueAction,
  queue: &TransactionQueue,
  monitor: &NetworkMonitor,
  client: &PosClient,
  config: &config::Config,
  business: Option<BusinessId>,
) -> Result<()> {
  match action {
    QueueAction::Add { order } => {
      let order: serde_json::Value =
        serde_json::from_str(&order).map_err(|e| eyre!("Order is not valid JSON: {}", e))?;
      let id = queue.enqueue(require_business(business)?, &order)?;
      print_json(&json!({ "id": id }))
    }
    QueueAction::List => print_json(&queue.pending()?),
    QueueAction::Failed => print_json(&queue.failed()?),
    QueueAction::Retry { id } => {
      if !queue.retry(id)? {
        return Err(eyre!("Transaction {} is not in the failed state", id));
      }
      print_json(&queue.get(id)?)
    }
    QueueAction::Sync => print_json(&queue.sync_pending(monitor, client).await?),
    QueueAction::Prune => {
      let pruned = queue.prune_synced(config.prune_after())?;
      print_json(&json!({ "pruned": pruned }))
    }
    QueueAction::Status => print_json(&json!({
      "total": queue.count()?,
      "by_status": queue.count_by_status()?,
    })),
  }
}

fn require_business(business: Option<BusinessId>) -> Result<BusinessId> {
  business.ok_or_else(|| {
    eyre!("No business selected. Pass --business or set default_business_id in the config.")
  })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value)
    .map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", out);
  Ok(())
}

/// Log to a daily file in the data directory; stdout carries command output.
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "pos-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(guard)
}
