mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workfloor_core::{
    create_audit_system, load_config, notify::AlertCallback, validate_config, AuditEvent,
    AuditStore, Coordinator, NotificationPoller, NotificationRecord, SqliteAuditStore, Stores,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("WORKFLOOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("workfloor.toml"));

    // Load configuration; logging format depends on it
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(config.logging.json);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite audit store
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    // Create order, job and notification stores
    let stores = Stores::open(&config.database.path).context("Failed to open workflow stores")?;
    info!("Workflow stores initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), config.audit.buffer_size);

    // Spawn audit writer task
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        stores,
        Some(audit_handle.clone()),
    ));
    match serde_json::to_string(&coordinator.sanitized_config()) {
        Ok(json) => info!(config = %json, "Coordinator ready"),
        Err(e) => warn!(error = %e, "Failed to serialize sanitized config"),
    }

    match coordinator.reconcile_deliveries() {
        Ok(0) => {}
        Ok(opened) => warn!(opened, "Opened missing delivery jobs"),
        Err(e) => warn!(error = %e, "Failed to reconcile delivery jobs"),
    }

    match coordinator.status() {
        Ok(status) => info!(
            at_washing = status.at_washing,
            at_ironing = status.at_ironing,
            at_packing = status.at_packing,
            on_hold = status.on_hold,
            pending_bypasses = status.pending_bypasses,
            available_jobs = status.available_jobs,
            "Floor status"
        ),
        Err(e) => warn!(error = %e, "Failed to read floor status"),
    }

    // Start the notification poller if enabled
    let poller = if config.notifier.enabled {
        let alert: AlertCallback = Arc::new(|viewer_id: &str, record: &NotificationRecord| {
            info!(
                viewer_id = %viewer_id,
                order_number = %record.order_number,
                notification_id = %record.id,
                "New order at station"
            );
        });
        let poller = Arc::new(coordinator.notification_poller().with_alert_callback(alert));
        let handle = poller.start();
        Some((poller, handle))
    } else {
        info!("Notification poller disabled in config");
        None
    };

    let interval = Duration::from_millis(config.notifier.poll_interval_ms);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Repair completed orders whose delivery job failed to open
    let reconcile_handle = spawn_delivery_reconciler(
        Arc::clone(&coordinator),
        interval,
        shutdown_tx.subscribe(),
    );

    // Periodically export metrics for the textfile collector
    let metrics_handle = config.metrics.textfile_path.clone().map(|path| {
        spawn_metrics_exporter(
            path,
            Arc::clone(&coordinator),
            poller.as_ref().map(|(p, _)| Arc::clone(p)),
            interval,
            shutdown_tx.subscribe(),
        )
    });

    shutdown_signal().await;
    info!("Shutting down...");

    // Stop poller if running
    if let Some((poller, handle)) = poller {
        poller.stop();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Notification poller stopped");
    }

    let _ = shutdown_tx.send(());
    let _ = reconcile_handle.await;
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    // Emit ServiceStopped event
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Drop all holders of AuditHandle so the writer's channel closes.
    // The coordinator's components each hold a clone.
    drop(coordinator);
    drop(audit_handle);

    // Wait for writer to finish processing remaining events
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

fn spawn_delivery_reconciler(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; startup already reconciled
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            let coordinator = Arc::clone(&coordinator);
            match tokio::task::spawn_blocking(move || coordinator.reconcile_deliveries()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(opened)) => warn!(opened, "Opened missing delivery jobs"),
                Ok(Err(e)) => warn!(error = %e, "Failed to reconcile delivery jobs"),
                Err(e) => warn!("Reconcile task failed: {}", e),
            }
        }
    })
}

fn spawn_metrics_exporter(
    path: PathBuf,
    coordinator: Arc<Coordinator>,
    poller: Option<Arc<NotificationPoller>>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Writing metrics to {:?} every {:?}", path, interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            metrics::collect_dynamic_metrics(&coordinator, poller.as_deref());
            let path = path.clone();
            match tokio::task::spawn_blocking(move || metrics::write_textfile(&path)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to export metrics: {:#}", e),
                Err(e) => warn!("Metrics export task failed: {}", e),
            }
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
