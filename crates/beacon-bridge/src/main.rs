//! beacon-bridge - device beacon metrics bridge
//!
//! Reads decoded beacon events as JSON lines on stdin, keeps them as
//! metrics, serves an OpenMetrics scrape endpoint and pushes changed values
//! as `topic<TAB>json` lines on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use beacon_bridge::{
    BridgeConfig, LineSource, LineTransport, push_exporter, register_process_metrics, server,
};
use beacon_metrics::{Ingestor, Path, Registry};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "beacon-bridge")]
#[command(about = "Device beacon metrics bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run {
        /// Path to config file; defaults apply when omitted
        #[arg(short, long, env = "BEACON_BRIDGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Generate a config file with default values
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "beacon-bridge.toml")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries published lines.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beacon_bridge=info,beacon_metrics=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = match config {
                Some(path) => {
                    info!(config = %path.display(), "loading config");
                    BridgeConfig::from_file(&path)?
                }
                None => BridgeConfig::default(),
            };

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(run_bridge(config));
            // A pending stdin read cannot be cancelled; don't wait for it.
            runtime.shutdown_background();
            result?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

async fn run_bridge(config: BridgeConfig) -> anyhow::Result<()> {
    let registry = Registry::new();
    let root = registry.reporter(Path::root());
    register_process_metrics(&root)?;

    let diagnostics = root.scoped(["bridge"])?;
    let devices = registry.reporter(config.metric_root()?);
    let ingestor = Ingestor::new(devices, &diagnostics, config.ingest.policy())?
        .with_signal_histogram(&diagnostics, config.histogram.to_config())?;
    let source = LineSource::new(ingestor, &diagnostics)?;

    info!(
        metric_path = %config.metric_root()?,
        scrape = config.scrape.enabled,
        push = config.push.enabled,
        "starting beacon-bridge"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.scrape.enabled {
        let registry = registry.clone();
        let addr = config.scrape.bind_addr;
        let path = config.scrape.path.clone();
        let mut rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server::serve_with_shutdown(registry, addr, &path, shutdown).await {
                error!(error = %e, "scrape server failed");
            }
        }));
    }

    if config.push.enabled {
        let exporter = Arc::new(push_exporter(
            &config,
            registry.clone(),
            LineTransport::stdout(),
            &diagnostics,
        )?);
        let interval = config.push.interval();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            exporter.run(interval, rx).await;
        }));
    }

    let source_rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = source.run(stdin, source_rx).await {
            error!(error = %e, "event source failed");
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "task panicked");
        }
    }

    info!("beacon-bridge stopped");
    Ok(())
}

fn init_config(output: &std::path::Path) -> anyhow::Result<()> {
    let rendered = BridgeConfig::default().to_toml()?;
    std::fs::write(output, rendered)?;
    info!(path = %output.display(), "wrote default config");
    Ok(())
}
