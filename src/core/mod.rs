pub mod mempool;
pub mod pipeline;
pub mod simulator;
pub mod tx;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate transaction, decoded and validated.
///
/// Quantities are in wei. `to == None` means contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: u128,
    pub gas_price: u128,
    pub data: Vec<u8>,
    pub seen_at: DateTime<Utc>,
}

impl Transaction {
    /// Reject transactions that cannot be scored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hash.trim().is_empty() {
            return Err(ValidationError::MissingHash);
        }
        if self.from.trim().is_empty() {
            return Err(ValidationError::MissingSender);
        }
        Ok(())
    }
}

/// Malformed input, rejected before scoring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("transaction hash is missing")]
    MissingHash,
    #[error("transaction sender is missing")]
    MissingSender,
    #[error("invalid {field} quantity: {value:?}")]
    InvalidQuantity { field: &'static str, value: String },
    #[error("invalid call data: {0}")]
    InvalidData(String),
    #[error("invalid transaction body: {0}")]
    InvalidBody(String),
}

/// The scored result for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub tx_hash: String,
    pub score: u32,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Set only on synthetic alerts produced without the scoring engine.
    #[serde(default)]
    pub simulated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,      // <30
    Medium,   // ≥30
    High,     // ≥50
    Critical, // ≥70
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        if score >= 70 {
            RiskLevel::Critical
        } else if score >= 50 {
            RiskLevel::High
        } else if score >= 30 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Whether an assessment at this level is worth pushing to subscribers.
    pub fn is_notable(&self) -> bool {
        *self != RiskLevel::Low
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}
