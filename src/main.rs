use anyhow::{Context, Result};
use futures::StreamExt;
use metabox::config::{self, MetaBoxConfig};
use metabox::scene::InMemoryScene;
use metabox::session::{SessionEngine, SessionEvent};
use metabox::trace;
use metabox::unlock::{HttpUnlocker, LogUnlocker, Unlocker};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Extra time on top of the device timeout before pending unlocks are abandoned.
const UNLOCK_FLUSH_MARGIN_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metabox=info".into()),
        )
        .init();

    info!("MetaBox replay host starting...");

    // Read configuration from environment
    let mut config = match std::env::var("METABOX_CONFIG") {
        Ok(path) => config::load_config(&path)?,
        Err(_) => MetaBoxConfig::default(),
    };
    config::apply_env_overrides(&mut config);

    let trace_path = std::env::var("METABOX_TRACE").unwrap_or_else(|_| "-".to_string());
    let dry_run = std::env::var("METABOX_DRY_RUN")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    info!(
        device_url = %config.device.url,
        tick_interval_ms = config.session.tick_interval_ms,
        trace = %trace_path,
        dry_run = dry_run,
        "Configuration loaded"
    );

    // Keep a clone of the HTTP unlocker so in-flight requests can be awaited on exit
    let http = if dry_run {
        None
    } else {
        Some(HttpUnlocker::new(&config.device).context("Failed to initialize unlocker")?)
    };
    let unlocker: Arc<dyn Unlocker> = match &http {
        Some(http) => Arc::new(http.clone()),
        None => Arc::new(LogUnlocker),
    };
    let scene = Arc::new(InMemoryScene::new());

    let session = SessionEngine::start(&config, scene.clone(), unlocker);
    let logger = tokio::spawn(log_events(session.subscribe()));

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if trace_path == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(&trace_path)
            .await
            .with_context(|| format!("Failed to open trace file: {}", trace_path))?;
        Box::new(BufReader::new(file))
    };

    let replay = async {
        let mut records = Box::pin(trace::records(reader));
        let mut count = 0usize;
        while let Some(record) = records.next().await {
            match record {
                Ok(record) => {
                    trace::replay(&session, record).await?;
                    count += 1;
                }
                Err(e) => warn!(error = %format!("{:#}", e), "Skipping trace record"),
            }
        }
        Ok::<_, anyhow::Error>(count)
    };

    tokio::select! {
        result = replay => match result {
            Ok(count) => info!(records = count, "Trace finished"),
            Err(e) => error!(error = %e, "Replay aborted"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    if let Err(e) = session.shutdown().await {
        warn!(error = %e, "Session already closed");
    }
    if let Some(http) = &http {
        let grace = Duration::from_millis(config.device.timeout_ms.saturating_add(UNLOCK_FLUSH_MARGIN_MS));
        let unfinished = http.flush(grace).await;
        if unfinished > 0 {
            warn!(unfinished, "Exiting with unlock requests still pending");
        }
    }
    info!(
        proxies_left = scene.len(),
        dropped_events = session.dropped_events(),
        "MetaBox replay host stopped"
    );
    logger.abort();

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ModuleActivated { module, .. }) => {
                info!(module = %module, "Event: module activated")
            }
            Ok(SessionEvent::ModuleDeactivated { module, .. }) => {
                info!(module = %module, "Event: module deactivated")
            }
            Ok(SessionEvent::StateChanged { state, .. }) => {
                info!(state = %state, "Event: state changed")
            }
            Ok(SessionEvent::UnlockRequested { requested_by, .. }) => {
                info!(requested_by = %requested_by, "Event: unlock requested")
            }
            Ok(SessionEvent::EventDropped { reason, .. }) => {
                info!(reason = %reason, "Event: dropped during switch")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Event logger lagged, skipped events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
