//! Periodic detection of pending tickets that never got a backend answer.
//!
//! The sweeper only reports. Records it flags are left untouched; their
//! retention window removes them eventually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;
use crate::metrics;
use crate::store::{StateStore, StoreError};

/// Result of one pass over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records inspected.
    pub scanned: usize,
    /// Customer ids of `Creating`/`Error` records past the staleness window.
    pub stale: Vec<String>,
    /// Scan batches needed to cover the keyspace.
    pub batches: usize,
}

/// Timer-driven scan for stale pending records.
pub struct ExpirySweeper {
    store: Arc<dyn StateStore>,
    config: SweeperConfig,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn StateStore>, config: SweeperConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Run one sweep against the current wall clock.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        Self::sweep(self.store.as_ref(), self.config.stale_after_secs, Utc::now().timestamp()).await
    }

    /// Run one sweep as if the time were `now` (epoch seconds).
    pub async fn sweep_at(&self, now: i64) -> Result<SweepReport, StoreError> {
        Self::sweep(self.store.as_ref(), self.config.stale_after_secs, now).await
    }

    async fn sweep(
        store: &dyn StateStore,
        stale_after_secs: u64,
        now: i64,
    ) -> Result<SweepReport, StoreError> {
        let stale_after = i64::try_from(stale_after_secs).unwrap_or(i64::MAX);
        let mut report = SweepReport::default();
        let mut cursor = 0;

        loop {
            let page = store.scan(cursor).await?;
            report.batches += 1;

            for customer_id in page.customer_ids {
                // Records can expire between the scan and the read.
                let state = match store.get(&customer_id).await {
                    Ok(Some(state)) => state,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(customer_id = %customer_id, error = %e, "Skipping unreadable record");
                        continue;
                    }
                };
                report.scanned += 1;

                if state.is_stale(now, stale_after) {
                    warn!(
                        customer_id = %state.customer_id,
                        status = %state.status,
                        billing_channel = %state.billing_channel,
                        age_secs = now - state.modified_at,
                        "Ticket has had no backend answer past the staleness window"
                    );
                    metrics::STALE_RECORDS.inc();
                    report.stale.push(state.customer_id);
                }
            }

            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        if report.batches > 1 {
            warn!(
                batches = report.batches,
                scanned = report.scanned,
                "State store holds more records than one scan batch"
            );
        }

        metrics::SWEEPS.inc();
        Ok(report)
    }

    /// Start the sweep timer. Does nothing when sweeping is disabled.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Expiry sweeper disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Expiry sweeper already running");
            return;
        }
        self.spawn_sweep_loop();
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let stale_after_secs = self.config.stale_after_secs;
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Sweep loop started");
            let mut ticker = tokio::time::interval(period);
            // A slow sweep pushes the next one back instead of bunching them.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let now = Utc::now().timestamp();
                        match Self::sweep(store.as_ref(), stale_after_secs, now).await {
                            Ok(report) => debug!(
                                scanned = report.scanned,
                                stale = report.stale.len(),
                                "Sweep finished"
                            ),
                            Err(e) => error!(error = %e, "Sweep failed"),
                        }
                    }
                }
            }
            info!("Sweep loop stopped");
        });
    }
}
