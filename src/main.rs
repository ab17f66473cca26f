//! golem - CLI Entry Point

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use golem::{run, Config, RunOptions, Shutdown};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "golem",
    about = "Configurable HTTP stub server - declarative routes, response templates and request stats",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the routes of a configuration file
    Run(RunArgs),
    /// Validate a configuration file and exit
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "golem.yaml")]
        config: PathBuf,
    },
    /// Print an example configuration and exit
    PrintConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "golem.yaml")]
    config: PathBuf,

    /// Collect traffic stats
    #[arg(long)]
    stats: bool,

    /// Collected traffic destination
    #[arg(long, default_value = "./stats.log")]
    stats_dest: String,

    /// Collected traffic driver (fs, stdout)
    #[arg(long, default_value = "fs")]
    stats_driver: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::PrintConfig => {
            print!("{}", include_str!("../config/default-config.yaml"));
            Ok(())
        }
        Command::Validate { config } => {
            let config = Config::from_file(&config)?;
            println!(
                "Configuration is valid ({} services, {} routes defined)",
                config.services.len(),
                config.route_count()
            );
            Ok(())
        }
        Command::Run(args) => {
            let opts = RunOptions {
                config_file: args.config,
                collect_stats: args.stats,
                stats_destination: args.stats_dest,
                stats_driver: args.stats_driver,
            };

            let shutdown = Shutdown::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown signal received");
                        shutdown.trigger();
                    }
                }
            });

            run(opts, shutdown).await
        }
    }
}
