mod app;
mod commands;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tablesync::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tablesync")]
#[command(about = "Cached access to a hosted backend's tables and auth")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./tablesync.yaml or $XDG_CONFIG_HOME/tablesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // URL and key come from the environment; a missing one stops us here
  let config = Config::load(args.config.as_deref())?;

  let _guard = init_logging(&config.log_level)?;

  let app = app::App::new(config).await?;
  app.run(args.command).await?;

  Ok(())
}

/// Log to a daily file in the data directory so stdout stays clean.
fn init_logging(default_level: &str) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("tablesync")
    .join("logs");

  let appender = tracing_appender::rolling::daily(log_dir, "tablesync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::registry()
    .with(env_filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false),
    )
    .init();

  Ok(guard)
}
