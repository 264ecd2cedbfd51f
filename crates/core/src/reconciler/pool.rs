use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ReconciliationEngine;
use crate::channel::InboundReceiver;
use crate::metrics;
use crate::ticket::Ticket;

/// Fixed set of reconciliation workers fed from the inbound queue.
///
/// Replies are routed to a worker by a hash of the customer id, so replies for
/// one customer are always handled in arrival order and never concurrently.
pub struct ReconcilerPool {
    engine: Arc<ReconciliationEngine>,
    workers: usize,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconcilerPool {
    pub fn new(engine: Arc<ReconciliationEngine>, workers: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            engine,
            workers: workers.max(1),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawn the workers and start dispatching from `inbound`.
    pub async fn start(&self, inbound: InboundReceiver) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconciler pool already running");
            return;
        }

        info!(workers = self.workers, "Starting reconciler pool");

        let mut handles = self.handles.lock().await;
        let mut queues = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(tx);
            handles.push(self.spawn_worker(worker, rx));
        }
        handles.push(self.spawn_dispatcher(inbound, queues));
    }

    /// Stop dispatching once the inbound queue is empty, let workers finish
    /// what they hold, and wait for them.
    ///
    /// Stop the consume loop first so the inbound queue stops growing.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Reconciler pool not running");
            return;
        }

        info!("Stopping reconciler pool");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciler task ended abnormally");
            }
        }

        info!("Reconciler pool stopped");
    }

    fn spawn_dispatcher(
        &self,
        mut inbound: InboundReceiver,
        queues: Vec<mpsc::UnboundedSender<Ticket>>,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                // Offsets of queued replies are already committed, so the
                // queue is emptied before a shutdown signal is honoured.
                tokio::select! {
                    biased;

                    received = inbound.recv() => {
                        let Some(ticket) = received else {
                            info!("Inbound queue closed");
                            break;
                        };
                        let worker = shard_for(&ticket.customer_id, queues.len());
                        metrics::RECONCILER_QUEUED.inc();
                        if queues[worker].send(ticket).is_err() {
                            metrics::RECONCILER_QUEUED.dec();
                            warn!(worker, "Worker queue closed, dropping reply");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                }
            }
            // Dropping the senders lets each worker drain its queue and exit.
            drop(queues);
            info!("Dispatch loop stopped");
        })
    }

    fn spawn_worker(
        &self,
        worker: usize,
        mut queue: mpsc::UnboundedReceiver<Ticket>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);

        tokio::spawn(async move {
            debug!(worker, "Reconciler worker started");
            while let Some(ticket) = queue.recv().await {
                metrics::RECONCILER_QUEUED.dec();
                engine.process(ticket).await;
            }
            debug!(worker, "Reconciler worker stopped");
        })
    }
}

/// Worker index for a customer id.
pub(crate) fn shard_for(customer_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    customer_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}
