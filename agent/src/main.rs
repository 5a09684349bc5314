use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use host_stats::{
    collectors::run_collect_loop,
    config::load_config_with_precedence,
    logging::init_tracing,
    MetricsCollector,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "host-stats", version, about = "Host resource sampler over mounted /proc and root views")]
struct Cli {
    #[arg(short, long, env = "HOST_STATS_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    status_port: Option<u16>,
    #[arg(long)]
    proc_root: Option<PathBuf>,
    #[arg(long)]
    host_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the status API (when a port is set) and log a snapshot every interval
    Run,
    /// Collect one snapshot and print it as JSON
    Snapshot {
        #[arg(long, action = ArgAction::SetTrue)]
        compact: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config_with_precedence(cli.config.as_ref())?;
    if let Some(p) = cli.status_port {
        cfg.status.port = Some(p);
    }
    if let Some(p) = cli.proc_root {
        cfg.sources.proc_root = p;
    }
    if let Some(p) = cli.host_root {
        cfg.sources.host_root = p;
    }
    let command = cli.command.unwrap_or(Commands::Run);
    // stdout carries the snapshot itself
    if matches!(command, Commands::Snapshot { .. }) && cfg.output.mode == "stdout" {
        cfg.output.mode = "stderr".into();
    }
    cfg.validate().context("invalid configuration")?;
    let _guard = init_tracing(&cfg)?;

    match command {
        Commands::Run => {
            #[cfg(feature = "status")]
            if let Some(port) = cfg.status.port {
                host_stats::status::spawn_status_server(
                    std::net::SocketAddr::new(cfg.status.bind, port),
                    MetricsCollector::new(cfg.sources.clone()),
                    std::time::Duration::from_millis(cfg.status.collect_timeout_ms),
                )
                .await?;
            }
            run_collect_loop(cfg).await?;
        }
        Commands::Snapshot { compact } => {
            let collector = MetricsCollector::new(cfg.sources);
            let snap = collector.collect_concurrent().await;
            let out = if compact {
                serde_json::to_string(&snap)
            } else {
                serde_json::to_string_pretty(&snap)
            }
            .context("serializing snapshot")?;
            println!("{out}");
        }
    }
    Ok(())
}
