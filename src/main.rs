use clap::Parser;
use color_eyre::Result;
use issuedeck::app::App;
use issuedeck::config::{self, Config};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "issuedeck")]
#[command(about = "Browse, filter and bookmark issues from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/issuedeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Difficulty to filter by when the saved filter names none
  #[arg(short, long)]
  difficulty: Option<String>,

  /// Don't restore or save the cache snapshot
  #[arg(long)]
  no_persist: bool,
}

/// Log to a file in the data directory; stdout belongs to the TUI.
fn init_logging() -> Option<WorkerGuard> {
  let dir = config::data_dir()?;
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::never(&dir, "issuedeck.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("ISSUEDECK_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(difficulty) = args.difficulty {
    config.default_difficulty = Some(difficulty.to_lowercase());
  }
  tracing::info!(api = %config.api.url, "Starting issuedeck");

  // Initialize and run the app
  let mut app = App::new(config, !args.no_persist)?;
  app.run().await?;

  Ok(())
}
