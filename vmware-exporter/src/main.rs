/**
 * VMWARE EXPORTER - Point d'entrée
 *
 * RÔLE : Bootstrap : config, source d'inventaire (vCenter ou fixture JSON),
 * registre Prometheus, scheduler de collecte, serveur HTTP.
 *
 * ARRÊT : Ctrl-C annule le token partagé ; le scheduler termine sa passe en
 * cours, le serveur HTTP se ferme proprement, la session vSphere est fermée.
 * Code de sortie non nul si la config est inutilisable, si la connexion
 * initiale à vCenter échoue ou si le port ne peut pas être ouvert.
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vmware_exporter::config::{load_config, ExporterConfig};
use vmware_exporter::health::HealthTracker;
use vmware_exporter::http::{build_router, AppState};
use vmware_exporter::inventory::{InventorySource, StaticInventory, VsphereClient};
use vmware_exporter::scheduler::PollScheduler;
use vmware_exporter::sink::{MetricsSink, SeriesPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmware_exporter=info")),
        )
        .init();

    let cfg = load_config().await.context("Unusable configuration")?;

    let policy = if cfg.metrics.evict_stale_series {
        SeriesPolicy::Evict
    } else {
        SeriesPolicy::Retain
    };
    let sink = Arc::new(MetricsSink::new(policy).context("Failed to build the metrics registry")?);
    let health = HealthTracker::new();
    let cancel = CancellationToken::new();

    // Ctrl-C => annulation du scheduler et du serveur
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    match cfg.fixture.clone() {
        Some(path) => {
            let source = StaticInventory::load(&path)
                .await
                .with_context(|| format!("Failed to load fixture {}", path.display()))?;
            serve(&cfg, Arc::new(source), sink, health, cancel).await?;
        }
        None => {
            let source = Arc::new(
                VsphereClient::connect(&cfg.vsphere)
                    .await
                    .with_context(|| format!("Failed to connect to vCenter {}", cfg.vsphere.hostname))?,
            );
            let served = serve(&cfg, source.clone(), sink, health, cancel).await;
            source.logout().await;
            served?;
        }
    }

    info!("Exporter stopped");
    Ok(())
}

async fn serve<S: InventorySource + 'static>(
    cfg: &ExporterConfig,
    source: Arc<S>,
    sink: Arc<MetricsSink>,
    health: HealthTracker,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.metrics.listen_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let scheduler = PollScheduler::new(
        source,
        sink.clone(),
        health.clone(),
        Duration::from_secs(cfg.polling.interval_secs),
    );
    let poller = tokio::spawn(scheduler.run(cancel.clone()));

    let app = build_router(AppState { sink, health });
    info!("Listening on http://{addr}/metrics");
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    // le serveur peut tomber seul : on arrête aussi le scheduler
    cancel.cancel();
    if let Err(e) = poller.await {
        error!("Poll scheduler task failed: {}", e);
    }
    server.context("HTTP server failed")
}
