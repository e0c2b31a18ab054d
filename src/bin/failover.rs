//! Failover coordinator binary

use clap::{Parser, Subcommand};
use redis_failover::common::ClusterState;
use redis_failover::{App, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "redis-failover")]
#[command(about = "Raft-backed failover coordinator for Redis master/replica groups")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coordinator node
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for the admin HTTP API
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Masters to supervise (comma-separated)
        #[arg(long, value_delimiter = ',')]
        masters: Vec<String>,

        /// Health check interval in milliseconds
        #[arg(long)]
        check_interval: Option<u64>,

        /// Raft transport address of this node
        #[arg(long)]
        raft_addr: Option<String>,

        /// Raft hard state directory
        #[arg(long)]
        raft_data_dir: Option<PathBuf>,

        /// Raft log directory
        #[arg(long)]
        raft_log_dir: Option<PathBuf>,

        /// Raft addresses of every cluster member (comma-separated)
        #[arg(long, value_delimiter = ',')]
        raft_cluster: Vec<String>,

        /// `new` to bootstrap, `existing` to rejoin with persisted state
        #[arg(long, value_parser = parse_cluster_state)]
        raft_cluster_state: Option<ClusterState>,
    },
}

fn parse_cluster_state(s: &str) -> Result<ClusterState, String> {
    match s {
        "new" => Ok(ClusterState::New),
        "existing" => Ok(ClusterState::Existing),
        other => Err(format!("expected new or existing, got {}", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            addr,
            masters,
            check_interval,
            raft_addr,
            raft_data_dir,
            raft_log_dir,
            raft_cluster,
            raft_cluster_state,
        } => {
            // File and environment first, CLI flags win
            let mut conf = Config::load(config.as_deref())?;
            if let Some(addr) = addr {
                conf.addr = addr;
            }
            if !masters.is_empty() {
                conf.masters = masters;
            }
            if let Some(ms) = check_interval {
                conf.check_interval_ms = ms;
            }
            if let Some(raft_addr) = raft_addr {
                conf.raft.addr = raft_addr;
            }
            if let Some(dir) = raft_data_dir {
                conf.raft.data_dir = dir;
            }
            if let Some(dir) = raft_log_dir {
                conf.raft.log_dir = dir;
            }
            if !raft_cluster.is_empty() {
                conf.raft.cluster = raft_cluster;
            }
            if let Some(state) = raft_cluster_state {
                conf.raft.cluster_state = state;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| conf.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::info!(version = redis_failover::VERSION, "Starting redis-failover");
            let app = App::new(conf).await?;
            app.start().await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            app.close().await;
        }
    }

    Ok(())
}
