//! sdrpick - Deadlock Server Picker
//!
//! Blocks game relay servers at the firewall so matchmaking only lands on
//! the regions you choose.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use sdrpick::cli::{Cli, Commands};
use sdrpick::commands::{self, Context};
use sdrpick::config::{default_config_dir, ConfigManager};
use sdrpick::history::LatencyHistory;
use sdrpick::signal::{is_shutdown_requested, ShutdownGuard, INTERRUPTED_EXIT_CODE};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let _shutdown = ShutdownGuard::new();

    let result = dispatch(cli).await;

    if is_shutdown_requested() {
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        config_dir,
        dry_run,
        no_sudo,
        clustered,
        ..
    } = cli;
    let config_dir = match config_dir {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    let mut manager = ConfigManager::new(config_dir.clone());

    // Global flags merged over the config file, for commands that touch the firewall
    let context = |manager: &mut ConfigManager| {
        let config = manager.load().clone();
        Context {
            clustered: clustered || config.clustered,
            use_sudo: config.use_sudo && !no_sudo,
            dry_run,
            config_dir: config_dir.clone(),
            config,
        }
    };

    match command {
        Commands::Version => {
            println!("sdrpick {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Regions => {
            commands::region::regions();
            Ok(())
        }
        Commands::Config { action } => commands::config::run(&mut manager, action),
        Commands::History { action } => {
            let mut history = LatencyHistory::open(&config_dir);
            commands::history::run(&mut history, action)
        }
        Commands::List { ping, blocked } => {
            commands::list::run(&context(&mut manager), ping, blocked).await
        }
        Commands::Block { servers } => {
            commands::block::run_block(&context(&mut manager), &servers).await
        }
        Commands::Unblock { servers, all } => {
            commands::block::run_unblock(&context(&mut manager), &servers, all).await
        }
        Commands::BlockAll => commands::block::run_block_all(&context(&mut manager)).await,
        Commands::BlockExcept { servers } => {
            commands::block::run_block_except(&context(&mut manager), &servers).await
        }
        Commands::Ping { servers } => commands::ping::run(&context(&mut manager), &servers).await,
        Commands::Preset { action } => commands::preset::run(&context(&mut manager), action).await,
        Commands::Status => commands::status::run_status(&context(&mut manager)).await,
        Commands::Reset => commands::status::run_reset(&context(&mut manager)).await,
        Commands::Apply => commands::apply::run(&context(&mut manager)).await,
        Commands::ListRegion { region, ping } => {
            commands::region::run_list_region(&context(&mut manager), &region, ping).await
        }
        Commands::AllowRegion { region } => {
            commands::region::run_allow_region(&context(&mut manager), region.as_deref()).await
        }
        Commands::BlockRegion { region } => {
            commands::region::run_block_region(&context(&mut manager), &region).await
        }
        Commands::UnblockRegion { region } => {
            commands::region::run_unblock_region(&context(&mut manager), &region).await
        }
        Commands::SaveRules => commands::status::run_save_rules(&context(&mut manager)),
    }
}
