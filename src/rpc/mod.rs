pub mod explorer;
pub mod feed;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::core::tx::{RawTransaction, decode_data, parse_quantity};
use crate::reputation::{AccountHistory, ContractCode, GasOracle, LookupError};

/// Simple Ethereum JSON-RPC client over HTTP.
pub struct EthRpc {
    url: String,
    client: Client,
    auth: Option<String>, // base64 encoded user:pass
}

impl EthRpc {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build RPC client with timeout: {e}, using defaults");
                Client::new()
            });
        Self {
            url: url.to_string(),
            client,
            auth: None,
        }
    }

    /// Attach HTTP basic auth credentials.
    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        use base64::{Engine, engine::general_purpose::STANDARD};
        self.auth = Some(STANDARD.encode(format!("{user}:{pass}")));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(auth) = &self.auth {
            request = request.header("Authorization", format!("Basic {auth}"));
        }

        let resp = request.send().await.map_err(RpcError::Http)?;
        let json: Value = resp.json().await.map_err(RpcError::Http)?;

        if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::Rpc(err.clone()));
        }

        Ok(json["result"].clone())
    }

    /// Latest block number. Used as the liveness probe.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        quantity(&result).map(|n| n as u64)
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let result = self.call("eth_gasPrice", vec![]).await?;
        quantity(&result)
    }

    pub async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let result = self
            .call("eth_getTransactionCount", vec![json!(address), json!("latest")])
            .await?;
        quantity(&result).map(|n| n as u64)
    }

    /// Deployed bytecode at `address`, empty for plain accounts.
    pub async fn get_code(&self, address: &str) -> Result<Vec<u8>, RpcError> {
        let result = self
            .call("eth_getCode", vec![json!(address), json!("latest")])
            .await?;
        bytes(&result)
    }

    /// Install a pending-transaction filter and return its id.
    pub async fn new_pending_transaction_filter(&self) -> Result<String, RpcError> {
        let result = self.call("eth_newPendingTransactionFilter", vec![]).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode(format!("filter id is not a string: {result}")))
    }

    /// Hashes announced since the previous poll of `filter_id`.
    pub async fn get_filter_changes(&self, filter_id: &str) -> Result<Vec<String>, RpcError> {
        let result = self.call("eth_getFilterChanges", vec![json!(filter_id)]).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// `None` if the node no longer knows the transaction.
    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<RawTransaction>, RpcError> {
        let result = self.call("eth_getTransactionByHash", vec![json!(hash)]).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// Decode a JSON-RPC hex quantity.
fn quantity(value: &Value) -> Result<u128, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex quantity, got {value}")))?;
    parse_quantity("result", raw).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Decode a JSON-RPC hex data string.
fn bytes(value: &Value) -> Result<Vec<u8>, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex data, got {value}")))?;
    decode_data(raw).map_err(|e| RpcError::Decode(e.to_string()))
}

#[async_trait]
impl ContractCode for EthRpc {
    async fn code_at(&self, address: &str) -> Result<Vec<u8>, LookupError> {
        Ok(self.get_code(address).await?)
    }
}

#[async_trait]
impl GasOracle for EthRpc {
    async fn average_gas_price(&self) -> Result<u128, LookupError> {
        Ok(self.gas_price().await?)
    }
}

#[async_trait]
impl AccountHistory for EthRpc {
    async fn transaction_count(&self, address: &str) -> Result<u64, LookupError> {
        Ok(self.get_transaction_count(address).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(Value),
    #[error("decode error: {0}")]
    Decode(String),
}
