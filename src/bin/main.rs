// checknet: one verification run over every registered device.

use anyhow::Context;
use checknet_consensus::{
    strategy_from_settings, JsonlProofLog, MemoryProofLog, ProofLog, RoundSettings, WallClockHeight,
};
use checknet_core::{CheckerConfig, CheckerIdentity};
use checknet_probe::{HttpDeviceDirectory, HttpProber, MetricsAggregator};
use checknet_scheduler::{Attestor, BatchScheduler};
use checknet_storage::{HttpObjectStore, ReputationStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CheckerConfig::load().context("loading checker configuration")?;

    let identity = match &config.identity.signing_key_hex {
        Some(seed) => CheckerIdentity::from_seed_hex(seed).context("decoding signing key")?,
        None => {
            warn!("No signing key configured, using an ephemeral identity");
            CheckerIdentity::generate()
        }
    };
    let identity = Arc::new(identity);
    info!(checker_id = identity.checker_id(), "Checker identity ready");

    let proof_log: Arc<dyn ProofLog> = match &config.identity.proof_log_path {
        Some(path) => Arc::new(JsonlProofLog::open(path).with_context(|| format!("opening proof log {}", path))?),
        None => {
            warn!("No proof log path configured, proof chain will not survive restarts");
            Arc::new(MemoryProofLog::new())
        }
    };

    let prober = HttpProber::new(&config.probe).context("building health prober")?;
    let collector = Arc::new(MetricsAggregator::from_settings(Arc::new(prober), &config.probe));
    let directory = HttpDeviceDirectory::new(&config.directory).context("building directory client")?;
    let backend = HttpObjectStore::new(&config.storage).context("building storage client")?;
    let store = Arc::new(ReputationStore::from_settings(Arc::new(backend), &config.storage));

    let attestor = Attestor::new(
        identity,
        strategy_from_settings(&config.consensus),
        proof_log,
        RoundSettings::from_config(&config.consensus, &config.storage),
        Arc::new(WallClockHeight),
    );
    let scheduler = BatchScheduler::new(collector, attestor, store, &config.scheduler);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight checks");
            on_signal.cancel();
        }
    });

    let summary = scheduler
        .run_from_directory(&directory, cancel)
        .await
        .context("device check run failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
