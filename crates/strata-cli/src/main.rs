mod cli;
mod commands;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands, HashCommands};
use output::print_error;
use strata_cache::config::loader;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(cli.log_level.as_deref().unwrap_or("warn"));

    let mut config = loader::load_config(cli.config.as_deref()).context("loading configuration")?;
    if cli.log_level.is_none() && std::env::var("RUST_LOG").is_err() {
        observability::apply_logging_level(&config.logging.level);
    }
    if let Some(url) = &cli.url {
        config.redis.url = url.clone();
    }

    let format = cli.format.unwrap_or_default();
    let store = commands::connect(&config.redis).await?;

    match &cli.command {
        Commands::Ping => commands::keys::ping(&store, &config.redis.url).await?,
        Commands::Get(args) => commands::keys::get(&store, &args.key).await?,
        Commands::Set(args) => commands::keys::set(&store, args).await?,
        Commands::Delete(args) => commands::keys::delete(&store, &args.key).await?,
        Commands::Exists(args) => commands::keys::exists(&store, &args.key).await?,
        Commands::Invalidate(args) => commands::keys::invalidate(&store, &args.pattern).await?,
        Commands::Unlock(args) => commands::keys::unlock(store, &args.key).await?,
        Commands::Hash(args) => match &args.command {
            HashCommands::Set(set_args) => commands::hash::set(&store, set_args).await?,
            HashCommands::Get(get_args) => {
                commands::hash::get(&store, &get_args.key, &get_args.field).await?
            }
            HashCommands::All(key_args) => {
                commands::hash::all(&store, &key_args.key, format).await?
            }
        },
    }

    Ok(())
}
