use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::reputation::{ContractIntel, LookupError};

/// Etherscan V2 block explorer client. Every request names its chain.
pub struct ExplorerClient {
    api_url: String,
    chain_id: u64,
    api_key: Option<String>,
    client: Client,
}

impl ExplorerClient {
    pub fn new(api_url: &str, chain_id: u64, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build explorer client with timeout: {e}, using defaults");
                Client::new()
            });
        Self {
            api_url: api_url.to_string(),
            chain_id,
            api_key,
            client,
        }
    }

    fn query(&self, params: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut query = vec![("chainid".to_string(), self.chain_id.to_string())];
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        if let Some(key) = self.api_key.as_deref() {
            query.push(("apikey".to_string(), key.to_string()));
        }
        query
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<Value, LookupError> {
        let resp = self
            .client
            .get(&self.api_url)
            .query(&self.query(params))
            .send()
            .await
            .map_err(|e| LookupError::Explorer(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| LookupError::Explorer(e.to_string()))
    }
}

#[async_trait]
impl ContractIntel for ExplorerClient {
    async fn is_verified(&self, address: &str) -> Result<bool, LookupError> {
        let body = self
            .get(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
            ])
            .await?;
        parse_verified(&body)
    }

    async fn contract_age_days(&self, address: &str) -> Result<u64, LookupError> {
        let body = self
            .get(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("page", "1"),
                ("offset", "1"),
                ("sort", "asc"),
            ])
            .await?;
        let first_seen = parse_first_tx_time(&body, address)?;
        Ok((Utc::now() - first_seen).num_days().max(0) as u64)
    }
}

/// The `result` array of a successful response, or the explorer's message.
fn result_array(body: &Value) -> Result<&Vec<Value>, LookupError> {
    match body["result"].as_array() {
        Some(result) if body["status"] != "0" || !result.is_empty() => Ok(result),
        Some(_) | None => {
            let message = body["result"]
                .as_str()
                .or_else(|| body["message"].as_str())
                .unwrap_or("unexpected response");
            Err(LookupError::Explorer(message.to_string()))
        }
    }
}

/// A contract counts as verified when the explorer returns non-empty source.
fn parse_verified(body: &Value) -> Result<bool, LookupError> {
    let result = result_array(body)?;
    Ok(result
        .first()
        .and_then(|entry| entry["SourceCode"].as_str())
        .is_some_and(|source| !source.is_empty()))
}

/// Timestamp of the oldest transaction involving the address.
fn parse_first_tx_time(body: &Value, address: &str) -> Result<DateTime<Utc>, LookupError> {
    let first = result_array(body)
        .map_err(|_| LookupError::NotFound(address.to_string()))?
        .first()
        .ok_or_else(|| LookupError::NotFound(address.to_string()))?;
    let secs: i64 = first["timeStamp"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LookupError::Explorer(format!("bad timeStamp for {address}")))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| LookupError::Explorer(format!("timestamp out of range for {address}")))
}
