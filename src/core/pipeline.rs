use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::AlertBroadcaster;
use crate::config::MonitorConfig;
use crate::core::mempool::SeenTxs;
use crate::core::simulator::{Simulator, SyntheticAlert};
use crate::core::tx::{RawTransaction, whole_units};
use crate::core::{RiskAssessment, Transaction};
use crate::rpc::feed::{FeedError, TransactionFeed};
use crate::signals::RiskEngine;

/// Broadcast kind for notable assessments.
pub const RISK_ALERT: &str = "risk-alert";
/// Broadcast kind announcing which mode the monitor settled in.
pub const MONITOR_STATUS: &str = "monitor-status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Stopped,
    Starting,
    Live,
    Simulated,
    Stopping,
}

/// Runtime knobs for the monitoring loop.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub force_simulation: bool,
    pub connect_timeout: Duration,
    pub simulation_interval: Duration,
    pub simulation_probability: f64,
    pub max_in_flight: usize,
    pub dedupe_window: Duration,
}

impl From<&MonitorConfig> for PipelineSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            force_simulation: config.force_simulation,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            simulation_interval: Duration::from_secs(config.simulation_interval_secs),
            simulation_probability: config.simulation_probability,
            max_in_flight: config.max_in_flight.max(1),
            dedupe_window: Duration::from_secs(config.dedupe_window_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub transactions_analyzed: u64,
    pub alerts_sent: u64,
    pub simulated_alerts: u64,
    pub subscribers: usize,
}

struct Shared {
    state: Mutex<MonitorState>,
    analyzed: AtomicU64,
    alerts: AtomicU64,
    simulated: AtomicU64,
}

impl Shared {
    fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move a running monitor to `state`. Refused once teardown has begun.
    fn advance(&self, state: MonitorState) -> bool {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*current, MonitorState::Stopping | MonitorState::Stopped) {
            return false;
        }
        *current = state;
        true
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    Idle,
    Running(Running),
    /// `stop` owns the task and is draining it.
    Stopping,
}

/// Owns the monitoring task. Construct once; `start`/`stop` act on this
/// instance only.
pub struct MonitoringService {
    engine: Arc<RiskEngine>,
    feed: Arc<dyn TransactionFeed>,
    broadcaster: Arc<AlertBroadcaster>,
    settings: PipelineSettings,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl MonitoringService {
    pub fn new(
        engine: Arc<RiskEngine>,
        feed: Arc<dyn TransactionFeed>,
        broadcaster: Arc<AlertBroadcaster>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            feed,
            broadcaster,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState::Stopped),
                analyzed: AtomicU64::new(0),
                alerts: AtomicU64::new(0),
                simulated: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Spawn the monitoring task. Returns false (and does nothing) if it is
    /// already running or a previous run is still shutting down.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => {
                debug!("Monitor already running, ignoring start");
                return false;
            }
            Lifecycle::Stopping => {
                debug!("Monitor still stopping, ignoring start");
                return false;
            }
        }

        self.shared.set_state(MonitorState::Starting);
        let cancel = CancellationToken::new();
        let worker = Worker {
            engine: self.engine.clone(),
            feed: self.feed.clone(),
            broadcaster: self.broadcaster.clone(),
            settings: self.settings.clone(),
            shared: self.shared.clone(),
        };
        let handle = tokio::spawn(worker.run(cancel.clone()));
        *lifecycle = Lifecycle::Running(Running { cancel, handle });
        info!("Monitor starting");
        true
    }

    /// Stop accepting transactions, wait for in-flight analyses, then close
    /// every subscriber connection.
    pub async fn stop(&self) {
        let Running { cancel, handle } = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Running(running) => {
                    self.shared.set_state(MonitorState::Stopping);
                    running
                }
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Monitoring task ended abnormally: {e}");
        }
        self.broadcaster.close_all();
        self.shared.set_state(MonitorState::Stopped);
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Idle;
        info!(
            analyzed = self.shared.analyzed.load(Ordering::Relaxed),
            alerts = self.shared.alerts.load(Ordering::Relaxed),
            "Monitor stopped"
        );
    }

    pub fn state(&self) -> MonitorState {
        self.shared.state()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.shared.state(),
            transactions_analyzed: self.shared.analyzed.load(Ordering::Relaxed),
            alerts_sent: self.shared.alerts.load(Ordering::Relaxed),
            simulated_alerts: self.shared.simulated.load(Ordering::Relaxed),
            subscribers: self.broadcaster.subscriber_count(),
        }
    }
}

/// Everything the spawned task needs, detached from the service handle.
struct Worker {
    engine: Arc<RiskEngine>,
    feed: Arc<dyn TransactionFeed>,
    broadcaster: Arc<AlertBroadcaster>,
    settings: PipelineSettings,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        let feed = if self.settings.force_simulation {
            info!("Simulation forced by configuration, not connecting to the node feed");
            None
        } else {
            match self.open_feed(&cancel).await {
                Ok(rx) => Some(rx),
                Err(e) => {
                    warn!("Live feed unavailable, falling back to simulated mode: {e}");
                    None
                }
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        if let Some(rx) = feed {
            self.enter(MonitorState::Live);
            self.run_live(rx, &cancel).await;
            if cancel.is_cancelled() {
                return;
            }
            warn!("Live feed dropped, falling back to simulated mode for the rest of this run");
        }

        self.enter(MonitorState::Simulated);
        self.run_simulated(&cancel).await;
    }

    /// Connect and probe the feed within the connection timeout.
    async fn open_feed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<mpsc::Receiver<RawTransaction>, FeedError> {
        let timeout = self.settings.connect_timeout;
        let connect = async {
            let rx = self.feed.connect().await?;
            self.feed.probe().await?;
            Ok::<_, FeedError>(rx)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(FeedError::Unavailable("stopped during startup".to_string())),
            res = tokio::time::timeout(timeout, connect) => match res {
                Ok(res) => res,
                Err(_) => Err(FeedError::Unavailable(format!("no answer within {timeout:?}"))),
            },
        }
    }

    fn enter(&self, state: MonitorState) {
        if !self.shared.advance(state) {
            return;
        }
        match state {
            MonitorState::Live => info!("Monitor running in live mode"),
            MonitorState::Simulated => warn!("Monitor running in simulated mode"),
            _ => {}
        }
        self.broadcaster
            .broadcast(MONITOR_STATUS, &serde_json::json!({ "state": state }));
    }

    /// Score every feed transaction until the feed closes or we are cancelled.
    async fn run_live(&self, mut rx: mpsc::Receiver<RawTransaction>, cancel: &CancellationToken) {
        let window = chrono::Duration::from_std(self.settings.dedupe_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let mut seen = SeenTxs::new(window);
        let mut in_flight = JoinSet::new();
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = res {
                        error!("Analysis task failed: {e}");
                    }
                }
                raw = rx.recv() => {
                    let Some(raw) = raw else {
                        break;
                    };
                    let tx = match raw.into_transaction() {
                        Ok(tx) => tx,
                        Err(e) => {
                            debug!("Rejected feed entry: {e}");
                            continue;
                        }
                    };

                    let now = Utc::now();
                    if !seen.insert(&tx.hash, now) {
                        debug!(hash = %tx.hash, "Already analysed, skipping");
                        continue;
                    }
                    received += 1;
                    if received % 1000 == 0 {
                        seen.prune(now);
                        debug!(tracked = seen.len(), "Pruned dedupe window");
                    }

                    while in_flight.len() >= self.settings.max_in_flight {
                        if let Some(Err(e)) = in_flight.join_next().await {
                            error!("Analysis task failed: {e}");
                        }
                    }
                    in_flight.spawn(analyze_and_forward(
                        self.engine.clone(),
                        self.broadcaster.clone(),
                        self.shared.clone(),
                        tx,
                    ));
                }
            }
        }

        drop(rx);
        let pending = in_flight.len();
        if pending > 0 {
            info!("Waiting for {pending} in-flight analyses");
        }
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!("Analysis task failed: {e}");
            }
        }
    }

    /// Emit synthetic alerts on a fixed interval until cancelled.
    async fn run_simulated(&self, cancel: &CancellationToken) {
        let period = self.settings.simulation_interval;
        let mut simulator = Simulator::new(self.settings.simulation_probability);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(SyntheticAlert { tx, assessment }) = simulator.tick() else {
                continue;
            };
            debug!(
                hash = %tx.hash,
                value = whole_units(tx.value),
                gas_price = %tx.gas_price,
                "Synthesized transaction"
            );
            self.shared.simulated.fetch_add(1, Ordering::Relaxed);
            let delivered = self.broadcaster.broadcast(RISK_ALERT, &assessment);
            info!(
                hash = %assessment.tx_hash,
                score = assessment.score,
                level = assessment.level.as_str(),
                delivered,
                "Simulated risk alert broadcast"
            );
        }
    }
}

async fn analyze_and_forward(
    engine: Arc<RiskEngine>,
    broadcaster: Arc<AlertBroadcaster>,
    shared: Arc<Shared>,
    tx: Transaction,
) {
    let assessment: RiskAssessment = match engine.analyze(&tx).await {
        Ok(assessment) => assessment,
        Err(e) => {
            debug!(hash = %tx.hash, "Rejected transaction: {e}");
            return;
        }
    };

    let analyzed = shared.analyzed.fetch_add(1, Ordering::Relaxed) + 1;
    if analyzed % 1000 == 0 {
        info!(
            "Monitor processed {analyzed} txs, {} alerts",
            shared.alerts.load(Ordering::Relaxed)
        );
    }

    if !assessment.level.is_notable() {
        debug!(hash = %assessment.tx_hash, score = assessment.score, "Below alert threshold, not broadcast");
        return;
    }

    shared.alerts.fetch_add(1, Ordering::Relaxed);
    let delivered = broadcaster.broadcast(RISK_ALERT, &assessment);
    info!(
        hash = %assessment.tx_hash,
        score = assessment.score,
        level = assessment.level.as_str(),
        delivered,
        "Risk alert broadcast"
    );
}
