mod app;
mod assistant;
mod cache;
mod commands;
mod config;
mod conversation;
mod db;
mod event;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::event::Event;

#[derive(Parser, Debug)]
#[command(name = "offline-assistant")]
#[command(about = "Offline-first resource cache and chat assistant for the Asotabsicon site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-assistant/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// User id to chat as (overrides identity.user_id)
  #[arg(short, long, global = true)]
  user: Option<String>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Fetch and store every manifest resource in the current generation
  Install,
  /// Purge superseded generations and start serving from cache
  Activate,
  /// Request a resource through the cache
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
  },
  /// Interactive chat (the default)
  Chat,
  /// Print the stored conversation
  History,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(user) = args.user {
    config.identity.user_id = Some(user);
  }

  let _guard = init_logging()?;

  let mut app = app::App::new(config).await?;

  let event = match args.command.unwrap_or(Cmd::Chat) {
    Cmd::Chat => return app.run_chat().await,
    Cmd::Install => Event::Install,
    Cmd::Activate => Event::Activate,
    Cmd::Fetch { url } => Event::Fetch(url),
    Cmd::History => Event::History,
  };

  if let Some(output) = app.handle_event(event).await {
    println!("{}", output);
  }

  Ok(())
}

/// Log to a daily file in the data directory so the terminal stays clean.
/// Filter with RUST_LOG, default `info`.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = config::Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offline-assistant.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
