mod api;
mod app;
mod cache;
mod config;
mod event;
mod ui;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quench")]
#[command(about = "A terminal client for browsing and editing posts through a keyed query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/quench/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the posts API
  #[arg(long)]
  api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override the API url if specified on the command line
  let config = if let Some(api_url) = args.api_url {
    config::Config { api_url, ..config }
  } else {
    config
  };

  // Log to a file; stdout belongs to the TUI
  let _log_guard = init_tracing(&config)?;

  // Initialize and run the app
  let mut app = app::App::new(config)?;
  app.run().await?;

  Ok(())
}

/// Install a file-backed tracing subscriber. The returned guard flushes the
/// log writer when dropped, so it must live until the app exits.
fn init_tracing(config: &config::Config) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .map(|dir| dir.join("quench"))
    .ok_or_else(|| eyre!("Could not determine data directory for logs"))?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file = tracing_appender::rolling::never(&log_dir, "quench.log");
  let (writer, guard) = tracing_appender::non_blocking(file);

  let filter =
    EnvFilter::try_from_env("QUENCH_LOG").unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
