//! Worker (§4.O) — process lifecycle: wires every component together,
//! drives the Evaluator and Reconciler on their own cadences, and shuts
//! down gracefully on request.
//!
//! Grounded in the teacher's `main.rs` startup sequencing and
//! `ctrl_c()`-triggered shutdown, but the two periodic loops are
//! rewritten from `tokio::time::interval` fixed-tick loops to single-timer
//! recursion: each tick reschedules its own next `tokio::time::sleep` from
//! inside the handler rather than ticking on a fixed wall-clock grid. This
//! means a slow tick pushes the next one back instead of the runtime
//! silently catching up with a burst of immediate re-fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::evaluator::Evaluator;
use crate::execution::ExecutionEngine;
use crate::reconciler::reconcile_once;
use crate::request_policy::RequestPolicy;
use crate::risk::KillSwitch;
use crate::serial_queue::SerialQueue;
use crate::state_store::StateStore;
use crate::venue::Venue;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns every long-lived component and drives the engine's two periodic
/// loops until told to stop.
pub struct Worker {
    config: EngineConfig,
    store: Arc<StateStore>,
    venue: Arc<dyn Venue>,
    evaluator: Arc<Evaluator>,
    reconciler_policy: Arc<RequestPolicy>,
    queue: Arc<SerialQueue>,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(config: EngineConfig, venue: Arc<dyn Venue>) -> Self {
        let store = Arc::new(StateStore::new());
        let queue = Arc::new(SerialQueue::new());
        let kill_switch = Arc::new(KillSwitch::new());
        let execution = Arc::new(ExecutionEngine::new(venue.clone(), store.clone(), config.execution.clone()));
        let evaluator = Arc::new(Evaluator::new(
            store.clone(),
            venue.clone(),
            execution,
            queue.clone(),
            kill_switch,
            config.clone(),
        ));
        let reconciler_policy = Arc::new(RequestPolicy::new("reconciler", config.request_policy.clone()));

        Self {
            config,
            store,
            venue,
            evaluator,
            reconciler_policy,
            queue,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run one reconciliation pass synchronously before the periodic loop
    /// starts, so the State Store holds venue truth from the very first
    /// evaluator tick instead of only being seeded after the first sleep.
    async fn seed_reconciler(&self) {
        let symbol = &self.config.symbol;
        let spot_asset = format!("{symbol}-SPOT");
        let inconsistencies =
            reconcile_once(self.venue.as_ref(), &self.reconciler_policy, &self.store, &self.config.reconciler, symbol, &spot_asset)
                .await;
        if !inconsistencies.is_empty() {
            warn!(symbol, count = inconsistencies.len(), "initial reconciliation surfaced inconsistencies");
        }
    }

    /// Run until `shutdown()` is called from another task, or the
    /// process receives ctrl-c.
    pub async fn run(&self) {
        info!(symbol = %self.config.symbol, "worker starting");

        if let Err(e) = self.venue.connect().await {
            error!(symbol = %self.config.symbol, error = %e, "venue connect failed, continuing without it");
        }
        if let Err(e) = self.venue.subscribe_ticker(&self.config.symbol).await {
            error!(symbol = %self.config.symbol, error = %e, "ticker subscription failed, continuing without it");
        }

        self.seed_reconciler().await;

        let evaluator_task = self.spawn_evaluator_loop();
        let reconciler_task = self.spawn_reconciler_loop();

        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("shutdown requested");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
            }
        }

        evaluator_task.abort();
        reconciler_task.abort();

        self.queue.cancel_current();
        if !self.queue.wait_for_idle(SHUTDOWN_DRAIN_TIMEOUT).await {
            warn!("in-flight job did not drain within shutdown timeout");
        }

        if let Err(e) = self.venue.disconnect().await {
            error!(error = %e, "venue disconnect failed");
        }

        info!("worker stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn evaluator(&self) -> Arc<Evaluator> {
        self.evaluator.clone()
    }

    fn spawn_evaluator_loop(&self) -> tokio::task::JoinHandle<()> {
        let evaluator = self.evaluator.clone();
        let tick_ms = self.config.evaluator_tick_ms;

        tokio::spawn(async move {
            loop {
                let outcome = evaluator.tick().await;
                info!(?outcome, "evaluator tick completed");
                tokio::time::sleep(Duration::from_millis(tick_ms)).await;
            }
        })
    }

    fn spawn_reconciler_loop(&self) -> tokio::task::JoinHandle<()> {
        let venue = self.venue.clone();
        let policy = self.reconciler_policy.clone();
        let store = self.store.clone();
        let config = self.config.reconciler.clone();
        let symbol = self.config.symbol.clone();
        let interval_ms = config.interval_ms;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                let spot_asset = format!("{symbol}-SPOT");
                let inconsistencies = reconcile_once(venue.as_ref(), &policy, &store, &config, &symbol, &spot_asset).await;
                if !inconsistencies.is_empty() {
                    warn!(symbol, count = inconsistencies.len(), "reconciliation surfaced inconsistencies");
                }
            }
        })
    }
}
