use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::tx::normalize_address;
use crate::rpc::RpcError;

/// A failed or empty external lookup. Always absorbed by the scoring engine.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("explorer error: {0}")]
    Explorer(String),
    #[error("no data for {0}")]
    NotFound(String),
}

/// Source verification and deployment age, usually from a block explorer.
#[async_trait]
pub trait ContractIntel: Send + Sync {
    async fn is_verified(&self, address: &str) -> Result<bool, LookupError>;
    async fn contract_age_days(&self, address: &str) -> Result<u64, LookupError>;
}

/// Current network average gas price in wei.
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn average_gas_price(&self) -> Result<u128, LookupError>;
}

/// Deployed bytecode at an address. Empty for externally owned accounts.
#[async_trait]
pub trait ContractCode: Send + Sync {
    async fn code_at(&self, address: &str) -> Result<Vec<u8>, LookupError>;
}

/// Historical transaction count (nonce) of an account.
#[async_trait]
pub trait AccountHistory: Send + Sync {
    async fn transaction_count(&self, address: &str) -> Result<u64, LookupError>;
}

/// Addresses known to be hostile, as listed in config or a list file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReputationList {
    pub malicious_contracts: Vec<String>,
    pub blacklisted_senders: Vec<String>,
}

impl ReputationList {
    /// Read a TOML list file with the same keys as the `[reputation]` section.
    pub async fn load(path: &Path) -> Result<Self, ReputationLoadError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn merged(&self, other: &ReputationList) -> ReputationList {
        ReputationList {
            malicious_contracts: self
                .malicious_contracts
                .iter()
                .chain(&other.malicious_contracts)
                .cloned()
                .collect(),
            blacklisted_senders: self
                .blacklisted_senders
                .iter()
                .chain(&other.blacklisted_senders)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReputationLoadError {
    #[error("failed to read reputation list: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse reputation list: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable view of the reputation data used for one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationSnapshot {
    malicious_contracts: HashSet<String>,
    blacklisted_senders: HashSet<String>,
}

impl ReputationSnapshot {
    pub fn from_list(list: &ReputationList) -> Self {
        Self {
            malicious_contracts: list.malicious_contracts.iter().map(|a| normalize_address(a)).collect(),
            blacklisted_senders: list.blacklisted_senders.iter().map(|a| normalize_address(a)).collect(),
        }
    }

    pub fn is_malicious(&self, address: &str) -> bool {
        self.malicious_contracts.contains(&normalize_address(address))
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklisted_senders.contains(&normalize_address(address))
    }

    pub fn malicious_count(&self) -> usize {
        self.malicious_contracts.len()
    }

    pub fn blacklist_count(&self) -> usize {
        self.blacklisted_senders.len()
    }
}

/// Process-wide holder of the current snapshot.
///
/// Readers load the `Arc` without locking and keep it for the whole
/// analysis; a refresh swaps in a new snapshot and never touches the old one.
#[derive(Debug, Default)]
pub struct ReputationStore {
    current: ArcSwap<ReputationSnapshot>,
}

impl ReputationStore {
    pub fn new(snapshot: ReputationSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn snapshot(&self) -> Arc<ReputationSnapshot> {
        self.current.load_full()
    }

    pub fn replace(&self, snapshot: ReputationSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

/// Reload `path` on a fixed interval, merged with the static `base` list.
/// A failed reload keeps the previous snapshot.
pub fn spawn_refresh(
    store: Arc<ReputationStore>,
    base: ReputationList,
    path: PathBuf,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match refresh_once(&store, &base, &path).await {
                Ok(snapshot) => tracing::debug!(
                    malicious = snapshot.malicious_count(),
                    blacklisted = snapshot.blacklist_count(),
                    "Reputation snapshot refreshed from {}",
                    path.display()
                ),
                Err(e) => tracing::warn!("Reputation refresh failed, keeping previous snapshot: {e}"),
            }
        }
    })
}

async fn refresh_once(
    store: &ReputationStore,
    base: &ReputationList,
    path: &Path,
) -> Result<Arc<ReputationSnapshot>, ReputationLoadError> {
    let file = ReputationList::load(path).await?;
    store.replace(ReputationSnapshot::from_list(&base.merged(&file)));
    Ok(store.snapshot())
}
