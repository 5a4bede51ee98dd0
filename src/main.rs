use anyhow::{Context, Result};
use clap::Parser;
use room_recorder::{
    create_router, AppState, Config, DeliveryPipeline, MemoryRoomHub, ObjectStorageUploader,
    RecordingContext, SessionRegistry, SessionTimeouts, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DELIVERY_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "room-recorder")]
#[command(about = "Join real-time rooms and record each participant's audio")]
struct Args {
    /// Configuration file (TOML), layered under ROOM_RECORDER__* variables
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Recordings directory: {:?}", cfg.recording.recordings_path);

    let settings = cfg.recording.settings()?;

    let notifier = WebhookNotifier::from_config(&cfg.webhook)?.map(Arc::new);
    if notifier.is_none() {
        warn!("No webhook configured; recordings will be uploaded without notification");
    }
    let uploader = Arc::new(ObjectStorageUploader::new(cfg.storage.clone()));
    let (delivery, delivery_task) = DeliveryPipeline::spawn(uploader, notifier);

    let recording =
        RecordingContext::new(cfg.recording.recordings_path.clone(), settings).with_delivery(delivery);

    let hub = MemoryRoomHub::new();
    let registry = Arc::new(SessionRegistry::new(
        hub.client(),
        recording,
        SessionTimeouts::from(&cfg.session),
    ));

    let app = create_router(AppState::new(Arc::clone(&registry), cfg.platform.clone()));

    let bind_addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    registry.stop_all().await;

    // The registry holds the last pipeline handle; dropping it lets queued uploads drain.
    // Abandoned workers may still hold a handle, so the drain is bounded.
    drop(registry);
    match tokio::time::timeout(DELIVERY_DRAIN_TIMEOUT, delivery_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Delivery pipeline ended abnormally: {}", e),
        Err(_) => warn!("Pending uploads did not finish within {:?}", DELIVERY_DRAIN_TIMEOUT),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
