use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use craftq::config::Config;
use craftq::inventory::types::{GoalProgress, GoalStatus, GoalUpdate, InventoryAdjustment};
use craftq::inventory::{InventoryClient, InventoryQuery};
use craftq::ExecutedState;

#[derive(Parser, Debug)]
#[command(name = "craftq")]
#[command(about = "Cached command-line client for the inventory and crafting service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/craftq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server URL, overrides the config file
  #[arg(short, long)]
  server: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List items
  Items {
    #[arg(long)]
    skip: Option<u64>,
    #[arg(long)]
    limit: Option<u64>,
    #[arg(long)]
    search: Option<String>,
  },
  /// Show one goal
  Goal { id: String },
  /// Show goal progress
  Progress {
    id: String,
    /// Keep printing updates while the goal is running
    #[arg(long)]
    watch: bool,
  },
  /// Find where to get an item from
  Sources {
    #[arg(long)]
    item: String,
    #[arg(long)]
    quantity: i64,
  },
  /// Change a goal's status
  UpdateGoal {
    id: String,
    #[arg(long)]
    status: GoalStatus,
  },
  /// Add to or take from the stock of an item
  Adjust {
    #[arg(long)]
    item: String,
    #[arg(long, allow_hyphen_values = true)]
    delta: i64,
  },
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("craftq=info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

      tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_progress(progress: &GoalProgress) {
  let mut line = format!("{:>5.1}%  {}", progress.progress * 100.0, progress.status);
  if let Some(message) = &progress.message {
    line.push_str("  ");
    line.push_str(message);
  }
  println!("{}", line);
}

async fn watch_progress(client: &InventoryClient, id: &str) -> Result<()> {
  let mut handle = client.watch(&InventoryQuery::GoalProgress {
    goal_id: id.to_string(),
  })?;

  let mut last_update = None;
  loop {
    let snapshot = handle.settled().await;
    match snapshot.executed {
      ExecutedState::Error => {
        let error = snapshot.error.ok_or_else(|| eyre!("progress query failed"))?;
        return Err(error.into());
      }
      ExecutedState::Success if snapshot.updated_at != last_update => {
        last_update = snapshot.updated_at;
        if let Some(progress) = snapshot.parse::<GoalProgress>()? {
          print_progress(&progress);
          // polling stops with the same rule, so nothing further will arrive
          if !progress.status.is_running() {
            return Ok(());
          }
        }
      }
      _ => {}
    }
    handle.changed().await;
  }
}

async fn run(client: &InventoryClient, command: Command) -> Result<()> {
  match command {
    Command::Items {
      skip,
      limit,
      search,
    } => {
      let items = client.items(skip, limit, search.as_deref()).await?;
      for item in items {
        println!("{:<12} {:<30} {:>6}", item.id, item.name, item.quantity);
      }
    }
    Command::Goal { id } => {
      let goal = client.goal(&id).await?;
      println!("{} {} [{}]", goal.id, goal.name, goal.status);
      if let (Some(item), Some(quantity)) = (&goal.item_id, goal.target_quantity) {
        println!("  target: {} x {}", quantity, item);
      }
    }
    Command::Progress { id, watch } => {
      if watch {
        watch_progress(client, &id).await?;
      } else {
        print_progress(&client.goal_progress(&id).await?);
      }
    }
    Command::Sources { item, quantity } => match client.find_sources(Some(&item), quantity).await? {
      Some(sources) => print_json(&sources)?,
      None => println!("Nothing to look up: quantity must be positive"),
    },
    Command::UpdateGoal { id, status } => {
      let goal = client
        .update_goal(&GoalUpdate {
          id,
          name: None,
          status: Some(status),
          target_quantity: None,
        })
        .await?;
      println!("{} is now {}", goal.id, goal.status);
    }
    Command::Adjust { item, delta } => {
      let result = client
        .adjust_inventory(&InventoryAdjustment {
          item_id: item,
          delta,
          reason: None,
        })
        .await?;
      if !result.is_null() {
        print_json(&result)?;
      }
    }
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load_or_server(args.config.as_deref(), args.server.as_deref())?;
  info!(server = %config.server.url, "starting");

  let client = InventoryClient::new(&config)?;
  if !client.query_client().session().is_authenticated() {
    info!("no API token set, requests are sent signed out");
  }

  run(&client, args.command).await
}
