//! Background polling of station feeds.
//!
//! Each tick reads the current feed of every watcher's station and hands it
//! to the [`Deduplicator`]. Watchers are polled concurrently, with the SQLite
//! work on the blocking pool; one failing feed does not stop the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::WorkflowError;
use crate::identity::{Principal, StationResolver};
use crate::metrics;
use crate::order::{OrderStore, Station};

use super::{Deduplicator, FeedEntry, NotificationRecord};

/// Supplies the orders currently active at a station.
#[async_trait]
pub trait FeedSupplier: Send + Sync {
    async fn current_feed(&self, station: Station) -> Result<Vec<FeedEntry>, WorkflowError>;
}

/// Feed read straight from the order store's station board.
pub struct StationFeed {
    orders: Arc<dyn OrderStore>,
}

impl StationFeed {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl FeedSupplier for StationFeed {
    async fn current_feed(&self, station: Station) -> Result<Vec<FeedEntry>, WorkflowError> {
        let orders = Arc::clone(&self.orders);
        let entries = tokio::task::spawn_blocking(move || orders.station_feed(station))
            .await
            .map_err(|e| WorkflowError::Database(format!("feed task failed: {}", e)))??;
        Ok(entries.iter().map(FeedEntry::from).collect())
    }
}

/// A viewer and the station whose feed they watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watcher {
    pub viewer_id: String,
    pub station: Station,
}

impl Watcher {
    pub fn new(viewer_id: impl Into<String>, station: Station) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            station,
        }
    }

    /// Resolve configured watchers to stations. Watchers without a station are
    /// skipped.
    pub fn resolve_all(configs: &[WatcherConfig], resolver: &dyn StationResolver) -> Vec<Watcher> {
        configs
            .iter()
            .filter_map(|config| {
                let principal = Principal::new(config.viewer_id.clone(), config.role);
                match resolver.station_for(&principal) {
                    Some(station) => Some(Watcher::new(config.viewer_id.clone(), station)),
                    None => {
                        warn!(
                            viewer_id = %config.viewer_id,
                            role = config.role.as_str(),
                            "Watcher has no station, skipping"
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

/// Called with the viewer id and the notification to surface as an alert.
pub type AlertCallback = Arc<dyn Fn(&str, &NotificationRecord) + Send + Sync>;

/// Totals for one poll across all watchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub watchers_polled: usize,
    pub failed: usize,
    pub notifications: usize,
}

struct PollContext {
    feed: Arc<dyn FeedSupplier>,
    dedup: Arc<Deduplicator>,
    watchers: Vec<Watcher>,
    on_alert: Option<AlertCallback>,
}

impl PollContext {
    async fn poll(&self) -> PollSummary {
        let results = join_all(self.watchers.iter().map(|w| self.poll_watcher(w))).await;

        let mut summary = PollSummary {
            watchers_polled: self.watchers.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(created) => summary.notifications += created,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    async fn poll_watcher(&self, watcher: &Watcher) -> Result<usize, WorkflowError> {
        let outcome = async {
            let feed = self.feed.current_feed(watcher.station).await?;
            let dedup = Arc::clone(&self.dedup);
            let viewer_id = watcher.viewer_id.clone();
            tokio::task::spawn_blocking(move || dedup.observe(&viewer_id, &feed))
                .await
                .map_err(|e| {
                    WorkflowError::Database(format!("notification task failed: {}", e))
                })?
        }
        .await;

        let observation = match outcome {
            Ok(observation) => {
                metrics::FEED_POLLS.with_label_values(&["ok"]).inc();
                observation
            }
            Err(e) => {
                metrics::FEED_POLLS.with_label_values(&["error"]).inc();
                warn!(
                    viewer_id = %watcher.viewer_id,
                    station = %watcher.station,
                    error = %e,
                    "Feed poll failed"
                );
                return Err(e);
            }
        };

        if let Some(alert) = observation.alert() {
            info!(
                viewer_id = %watcher.viewer_id,
                order_number = %alert.order_number,
                queued = observation.queued().len(),
                "New order at {}",
                watcher.station
            );
            if let Some(ref callback) = self.on_alert {
                callback(&watcher.viewer_id, alert);
            }
        }

        Ok(observation.created.len())
    }
}

/// Polls station feeds on a fixed interval until stopped.
pub struct NotificationPoller {
    context: Arc<PollContext>,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NotificationPoller {
    pub fn new(
        feed: Arc<dyn FeedSupplier>,
        dedup: Arc<Deduplicator>,
        watchers: Vec<Watcher>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            context: Arc::new(PollContext {
                feed,
                dedup,
                watchers,
                on_alert: None,
            }),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Must be set before [`start`](Self::start).
    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.on_alert = Some(callback);
        }
        self
    }

    pub fn watchers(&self) -> &[Watcher] {
        &self.context.watchers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Poll every watcher once.
    pub async fn poll_once(&self) -> PollSummary {
        self.context.poll().await
    }

    /// Spawn the polling loop. The first poll runs immediately.
    ///
    /// Returns `None` if the loop is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Notification poller already running");
            return None;
        }

        let context = Arc::clone(&self.context);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            watchers = context.watchers.len(),
            interval_ms = interval.as_millis() as u64,
            "Starting notification poller"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Notification poller received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let summary = context.poll().await;
                        debug!(
                            watchers = summary.watchers_polled,
                            failed = summary.failed,
                            notifications = summary.notifications,
                            "Poll finished"
                        );
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("Notification poller stopped");
        }))
    }

    /// Signal the polling loop to exit.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Notification poller not running");
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}
