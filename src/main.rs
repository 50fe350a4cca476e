use anyhow::Context as _;
use challenge_orchestrator::{
    backend::DisabledVmBackend,
    config::OrchestratorConfig,
    record::NoopRecordSink,
    telemetry::{self, Metrics},
    types::InstanceRequest,
    BackendRouter, InstanceOrchestrator,
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::atomic::Ordering, sync::Arc};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "challenge-orchestrator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one instance request and print the result as JSON
    Dispatch {
        /// File holding the request JSON, stdin when omitted
        #[arg(short, long, env = "ORCHESTRATOR_REQUEST")]
        request: Option<PathBuf>,

        #[arg(long)]
        pretty: bool,
    },
    /// Delete expired instances until interrupted
    Reap {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let config = OrchestratorConfig::load().context("loading configuration")?;
    info!("Configuration loaded");

    let metrics = Arc::new(Metrics::default());
    let orchestrator = Arc::new(
        InstanceOrchestrator::connect(config, Arc::new(NoopRecordSink), metrics.clone())
            .await
            .context("connecting to the cluster")?,
    );

    match cli.command {
        Command::Dispatch { request, pretty } => {
            let raw = match request {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut raw = String::new();
                    tokio::io::stdin().read_to_string(&mut raw).await?;
                    raw
                }
            };
            let request: InstanceRequest =
                serde_json::from_str(&raw).context("parsing instance request")?;

            let router = BackendRouter::new(orchestrator, Arc::new(DisabledVmBackend));
            let result = router.dispatch(request).await;

            let output = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{output}");
        }
        Command::Reap { once } => {
            if once {
                let count = orchestrator.reap_expired().await?;
                info!(count, "Reap pass finished");
            } else {
                let shutdown = CancellationToken::new();
                let signal = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested");
                    }
                    signal.cancel();
                });
                orchestrator.reap_until_cancelled(shutdown).await;
                info!(
                    reaped = metrics.instances_reaped.load(Ordering::Relaxed),
                    "Reaper exited"
                );
            }
        }
    }

    Ok(())
}
