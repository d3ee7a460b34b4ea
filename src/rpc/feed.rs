use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{EthRpc, RpcError};
use crate::core::tx::RawTransaction;

/// Source of live pending transactions.
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Open the pending-transaction subscription. The returned receiver
    /// closes when the feed drops permanently.
    async fn connect(&self) -> Result<mpsc::Receiver<RawTransaction>, FeedError>;

    /// Cheap request proving the node is answering.
    async fn probe(&self) -> Result<(), FeedError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("node RPC failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Pending feed polling configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    /// Consecutive poll failures before the feed is declared dropped.
    pub max_failures: u32,
    pub buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_failures: 5,
            buffer: 1024,
        }
    }
}

/// Pending feed backed by a node's `eth_newPendingTransactionFilter`.
pub struct NodeFeed {
    rpc: Arc<EthRpc>,
    config: FeedConfig,
}

impl NodeFeed {
    pub fn new(rpc: Arc<EthRpc>, config: FeedConfig) -> Self {
        Self { rpc, config }
    }
}

#[async_trait]
impl TransactionFeed for NodeFeed {
    async fn connect(&self) -> Result<mpsc::Receiver<RawTransaction>, FeedError> {
        let filter_id = self.rpc.new_pending_transaction_filter().await?;
        info!(endpoint = %self.rpc.url(), %filter_id, "Pending transaction filter installed");

        let (tx, rx) = mpsc::channel(self.config.buffer);
        tokio::spawn(poll_pending(
            self.rpc.clone(),
            filter_id,
            self.config.clone(),
            tx,
        ));
        Ok(rx)
    }

    async fn probe(&self) -> Result<(), FeedError> {
        let height = self.rpc.block_number().await?;
        debug!(height, "Node liveness probe succeeded");
        Ok(())
    }
}

/// Poll the filter until the receiver goes away or the node stops answering.
async fn poll_pending(
    rpc: Arc<EthRpc>,
    filter_id: String,
    config: FeedConfig,
    tx: mpsc::Sender<RawTransaction>,
) {
    let mut failures: u32 = 0;
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                info!("Feed receiver closed, stopping pending poll");
                return;
            }
            _ = ticker.tick() => {}
        }

        let hashes = match rpc.get_filter_changes(&filter_id).await {
            Ok(hashes) => {
                failures = 0;
                hashes
            }
            Err(e) => {
                failures += 1;
                warn!(failures, "Pending filter poll failed: {e}");
                if failures >= config.max_failures {
                    error!("Pending feed dropped after {failures} consecutive failures");
                    return;
                }
                continue;
            }
        };

        for hash in hashes {
            match rpc.get_transaction_by_hash(&hash).await {
                Ok(Some(raw)) => {
                    if tx.send(raw).await.is_err() {
                        info!("Feed receiver closed, stopping pending poll");
                        return;
                    }
                }
                Ok(None) => debug!(%hash, "Pending tx gone before it could be fetched"),
                Err(e) => debug!(%hash, "Failed to fetch pending tx: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    /// Node that announces one pending tx on the first poll, then fails
    /// every poll after it. Counts `eth_getFilterChanges` calls.
    async fn flaky_node() -> (String, Arc<AtomicU32>) {
        async fn handle(State(polls): State<Arc<AtomicU32>>, Json(req): Json<Value>) -> Json<Value> {
            let result = match req["method"].as_str() {
                Some("eth_newPendingTransactionFilter") => json!("0x1"),
                Some("eth_getFilterChanges") => {
                    if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                        json!(["0xaa"])
                    } else {
                        return Json(json!({
                            "jsonrpc": "2.0",
                            "id": 1,
                            "error": {"code": -32000, "message": "filter not found"}
                        }));
                    }
                }
                Some("eth_getTransactionByHash") => json!({
                    "hash": "0xaa",
                    "from": "0xalice",
                    "to": null,
                    "value": "0x0",
                    "gasPrice": "0x3b9aca00",
                    "input": "0x"
                }),
                _ => json!("0x10"),
            };
            Json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
        }

        let polls = Arc::new(AtomicU32::new(0));
        let app = Router::new().route("/", post(handle)).with_state(polls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/"), polls)
    }

    #[tokio::test]
    async fn feed_closes_after_consecutive_poll_failures() {
        let (url, polls) = flaky_node().await;
        let rpc = Arc::new(EthRpc::new(&url, Duration::from_secs(2)));
        let feed = NodeFeed::new(
            rpc,
            FeedConfig {
                poll_interval: Duration::from_millis(10),
                max_failures: 3,
                buffer: 8,
            },
        );
        feed.probe().await.unwrap();
        let mut rx = feed.connect().await.unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no pending tx delivered")
            .expect("feed closed before delivering");
        assert_eq!(raw.hash.as_deref(), Some("0xaa"));

        let end = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("feed never closed");
        assert!(end.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 1 + 3);
    }

    #[tokio::test]
    async fn connect_to_unreachable_node_fails() {
        let rpc = Arc::new(EthRpc::new("http://127.0.0.1:9", Duration::from_secs(2)));
        let feed = NodeFeed::new(rpc, FeedConfig::default());
        assert!(matches!(feed.connect().await, Err(FeedError::Rpc(_))));
        assert!(feed.probe().await.is_err());
    }
}
