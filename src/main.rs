use boardcache::board::{BoardStore, HttpBoardApi, StoreOptions};
use boardcache::commands::{self, Command};
use boardcache::config::Config;
use boardcache::logging;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "boardcache")]
#[command(about = "Cached, optimistic command-line client for a kanban board API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/boardcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base url, overrides the config file
  #[arg(long)]
  base_url: Option<String>,

  /// Board to operate on (default: default_board from the config)
  #[arg(short, long)]
  board: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // A base url on the command line makes the config file optional
  let config = match (Config::locate(args.config.as_deref())?, args.base_url.clone()) {
    (Some(path), base_url) => {
      let mut config = Config::load_from_path(&path)?;
      if let Some(base_url) = base_url {
        config.api.base_url = base_url;
      }
      config
    }
    (None, Some(base_url)) => Config::with_base_url(base_url),
    (None, None) => Config::load(None)?,
  };

  let _guard = logging::init(&config.logging)?;

  let board_id = args
    .board
    .or_else(|| config.default_board.clone())
    .ok_or_else(|| eyre!("No board given. Pass --board or set default_board in the config."))?;

  let api = HttpBoardApi::from_config(&config)?;
  let store = BoardStore::with_options(
    Arc::new(api),
    config.cache.build(),
    StoreOptions {
      ttl: config.cache.ttl(),
      user_id: config.user_id.clone(),
    },
  );

  let output = commands::run(&store, &board_id, args.command).await?;
  print!("{}", output);

  Ok(())
}
