// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use tunerd::config::Config;
use tunerd::ctl::CtlArgs;
use tunerd::pidfile::PidLockHeld;

#[derive(Parser)]
#[command(name = "tunerd", version, about = "Auto-tuning agent for cluster nodes.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the status of the local agent.
    ClientStatus(CtlArgs),
    /// Show the status of the whole cluster.
    ClusterStatus(CtlArgs),
    /// Ask the gateway to start tuning once enough nodes are online.
    StartTuning {
        #[command(flatten)]
        args: CtlArgs,
        /// Number of nodes that must be online.
        desired_node_count: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.subcommand {
        Some(Commands::ClientStatus(args)) => {
            if let Err(e) = tunerd::ctl::client_status(&args).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::ClusterStatus(args)) => {
            if let Err(e) = tunerd::ctl::cluster_status(&args).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::StartTuning { args, desired_node_count }) => {
            if let Err(e) = tunerd::ctl::start_tuning(&args, desired_node_count).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        None => {
            let config = match cli.config.resolve() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            };
            if let Err(e) = config.validate() {
                eprintln!("error: {e}");
                std::process::exit(2);
            }

            if let Err(e) = tunerd::supervisor::run(config).await {
                if e.downcast_ref::<PidLockHeld>().is_some() {
                    eprintln!("error: {e}");
                    std::process::exit(255);
                }
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}
