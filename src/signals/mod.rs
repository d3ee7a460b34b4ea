pub mod rules;
pub mod score;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::core::{RiskAssessment, RiskLevel, Transaction, ValidationError};
use crate::reputation::{AccountHistory, ContractCode, ContractIntel, GasOracle, LookupError, ReputationStore};

/// The risk engine runs all five checks against one reputation snapshot and
/// classifies the summed score.
pub struct RiskEngine {
    reputation: Arc<ReputationStore>,
    contracts: Arc<dyn ContractIntel>,
    code: Arc<dyn ContractCode>,
    gas: Arc<dyn GasOracle>,
    history: Arc<dyn AccountHistory>,
    lookup_timeout: Duration,
}

impl RiskEngine {
    pub fn new(
        reputation: Arc<ReputationStore>,
        contracts: Arc<dyn ContractIntel>,
        code: Arc<dyn ContractCode>,
        gas: Arc<dyn GasOracle>,
        history: Arc<dyn AccountHistory>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            reputation,
            contracts,
            code,
            gas,
            history,
            lookup_timeout,
        }
    }

    /// Score a transaction. Only malformed input is an error; every lookup
    /// failure degrades its own check to the "unknown" default.
    pub async fn analyze(&self, tx: &Transaction) -> Result<RiskAssessment, ValidationError> {
        tx.validate()?;
        let snapshot = self.reputation.snapshot();
        let snapshot = snapshot.as_ref();

        let contract = async {
            let Some(to) = tx.to.as_deref() else {
                return rules::contract_risk(tx, snapshot, None, None, None);
            };
            let (code, verified, age_days) = tokio::join!(
                self.lookup("code", self.code.code_at(to)),
                self.lookup("verification", self.contracts.is_verified(to)),
                self.lookup("contract_age", self.contracts.contract_age_days(to)),
            );
            let has_code = code.map(|code| !code.is_empty());
            rules::contract_risk(tx, snapshot, has_code, verified, age_days)
        };
        let value = async { rules::value_risk(tx) };
        let gas = async {
            let average = self.lookup("gas_oracle", self.gas.average_gas_price()).await;
            rules::gas_price_risk(tx, average)
        };
        let sender = async {
            let count = self
                .lookup("transaction_count", self.history.transaction_count(&tx.from))
                .await;
            rules::sender_risk(tx, snapshot, count)
        };
        let data = async { rules::call_data_risk(tx) };

        let (contract, value, gas, sender, data) = tokio::join!(contract, value, gas, sender, data);
        let (score, reasons) = score::combine(&[contract, value, gas, sender, data]);

        Ok(RiskAssessment {
            tx_hash: tx.hash.clone(),
            score,
            level: RiskLevel::from_score(score),
            reasons,
            timestamp: Utc::now(),
            simulated: false,
        })
    }

    /// Await one external lookup under the configured timeout.
    async fn lookup<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, LookupError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.lookup_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(lookup = what, "Lookup failed, treating as unknown: {e}");
                None
            }
            Err(_) => {
                warn!(lookup = what, timeout = ?self.lookup_timeout, "Lookup timed out, treating as unknown");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::tx::WEI_PER_UNIT;
    use crate::reputation::{ReputationList, ReputationSnapshot};
    use async_trait::async_trait;

    pub(crate) const AVERAGE_GAS: u128 = 20_000_000_000;

    /// Explorer stub: fixed answers, or failures when `None`.
    pub(crate) struct StubIntel {
        pub verified: Option<bool>,
        pub age_days: Option<u64>,
    }

    #[async_trait]
    impl ContractIntel for StubIntel {
        async fn is_verified(&self, address: &str) -> Result<bool, LookupError> {
            self.verified.ok_or_else(|| LookupError::Explorer(format!("no source for {address}")))
        }

        async fn contract_age_days(&self, address: &str) -> Result<u64, LookupError> {
            self.age_days.ok_or_else(|| LookupError::NotFound(address.to_string()))
        }
    }

    pub(crate) enum StubGas {
        Fixed(u128),
        Failing,
        Hanging,
    }

    #[async_trait]
    impl GasOracle for StubGas {
        async fn average_gas_price(&self) -> Result<u128, LookupError> {
            match self {
                StubGas::Fixed(price) => Ok(*price),
                StubGas::Failing => Err(LookupError::Explorer("oracle down".to_string())),
                StubGas::Hanging => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1)
                }
            }
        }
    }

    pub(crate) enum StubCode {
        Contract,
        Account,
        Failing,
    }

    #[async_trait]
    impl ContractCode for StubCode {
        async fn code_at(&self, address: &str) -> Result<Vec<u8>, LookupError> {
            match self {
                StubCode::Contract => Ok(vec![0x60, 0x80, 0x60, 0x40]),
                StubCode::Account => Ok(Vec::new()),
                StubCode::Failing => Err(LookupError::NotFound(address.to_string())),
            }
        }
    }

    pub(crate) struct StubHistory(pub Option<u64>);

    #[async_trait]
    impl AccountHistory for StubHistory {
        async fn transaction_count(&self, address: &str) -> Result<u64, LookupError> {
            self.0.ok_or_else(|| LookupError::NotFound(address.to_string()))
        }
    }

    pub(crate) fn reputation() -> Arc<ReputationStore> {
        Arc::new(ReputationStore::new(ReputationSnapshot::from_list(&ReputationList {
            malicious_contracts: vec!["0xbadc0de".to_string()],
            blacklisted_senders: vec!["0xthief".to_string()],
        })))
    }

    pub(crate) fn engine_with(gas: StubGas, intel: StubIntel, history: StubHistory) -> RiskEngine {
        engine_with_code(gas, intel, history, StubCode::Contract)
    }

    pub(crate) fn engine_with_code(
        gas: StubGas,
        intel: StubIntel,
        history: StubHistory,
        code: StubCode,
    ) -> RiskEngine {
        RiskEngine::new(
            reputation(),
            Arc::new(intel),
            Arc::new(code),
            Arc::new(gas),
            Arc::new(history),
            Duration::from_millis(100),
        )
    }

    /// Every lookup succeeds with benign answers.
    pub(crate) fn benign_engine() -> RiskEngine {
        engine_with(
            StubGas::Fixed(AVERAGE_GAS),
            StubIntel {
                verified: Some(true),
                age_days: Some(365),
            },
            StubHistory(Some(100)),
        )
    }

    pub(crate) fn plain_tx() -> Transaction {
        Transaction {
            hash: "0x01".to_string(),
            from: "0xalice".to_string(),
            to: None,
            value: 0,
            gas_price: AVERAGE_GAS,
            data: vec![],
            seen_at: Utc::now(),
        }
    }

    fn scenario_tx() -> Transaction {
        Transaction {
            hash: "0xscenario".to_string(),
            from: "0xalice".to_string(),
            to: Some("0xbadc0de".to_string()),
            value: 150 * WEI_PER_UNIT,
            gas_price: 4 * AVERAGE_GAS,
            data: vec![0xa9, 0x05, 0x9c, 0xbb],
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn plain_transaction_scores_zero() {
        let assessment = benign_engine().analyze(&plain_tx()).await.unwrap();
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(assessment.reasons.is_empty());
        assert!(!assessment.simulated);
        assert_eq!(assessment.tx_hash, "0x01");
    }

    #[tokio::test]
    async fn score_is_sum_of_rule_contributions() {
        let engine = benign_engine();
        let tx = scenario_tx();
        let snapshot = engine.reputation.snapshot();

        let expected: u32 = [
            rules::contract_risk(&tx, &snapshot, Some(true), Some(true), Some(365)),
            rules::value_risk(&tx),
            rules::gas_price_risk(&tx, Some(AVERAGE_GAS)),
            rules::sender_risk(&tx, &snapshot, Some(100)),
            rules::call_data_risk(&tx),
        ]
        .iter()
        .map(|o| o.contribution)
        .sum();

        let assessment = engine.analyze(&tx).await.unwrap();
        assert_eq!(assessment.score, expected);
    }

    #[tokio::test]
    async fn malicious_transfer_scenario() {
        let assessment = benign_engine().analyze(&scenario_tx()).await.unwrap();
        // contract 80, value 30, gas 25, data 10
        assert_eq!(assessment.score, 145);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert_eq!(
            assessment.reasons,
            vec![
                "recipient is a known malicious contract",
                "high transaction value: 150.00 ETH",
                "gas price anomalously high, possible front-running",
                "invokes a sensitive function selector",
            ]
        );
    }

    #[tokio::test]
    async fn malicious_scenario_with_failing_explorer() {
        let engine = engine_with(
            StubGas::Fixed(AVERAGE_GAS),
            StubIntel {
                verified: None,
                age_days: None,
            },
            StubHistory(None),
        );
        let assessment = engine.analyze(&scenario_tx()).await.unwrap();
        assert_eq!(assessment.score, 145 + 20 + 15);
        assert_eq!(assessment.reasons.len(), 6);
        assert_eq!(assessment.reasons[0], "recipient is a known malicious contract");
        assert_eq!(assessment.reasons[5], "invokes a sensitive function selector");
    }

    #[tokio::test]
    async fn plain_account_recipient_ignores_failing_explorer() {
        let failing_intel = || StubIntel {
            verified: None,
            age_days: None,
        };
        let mut tx = plain_tx();
        tx.to = Some("0xbob".to_string());

        let account = engine_with_code(
            StubGas::Fixed(AVERAGE_GAS),
            failing_intel(),
            StubHistory(Some(100)),
            StubCode::Account,
        );
        assert_eq!(account.analyze(&tx).await.unwrap().score, 0);

        let unknown = engine_with_code(
            StubGas::Fixed(AVERAGE_GAS),
            failing_intel(),
            StubHistory(Some(100)),
            StubCode::Failing,
        );
        assert_eq!(unknown.analyze(&tx).await.unwrap().score, 35);
    }

    #[tokio::test]
    async fn malicious_recipient_always_contributes_80() {
        let engine = benign_engine();
        let mut tx = plain_tx();
        tx.to = Some("0xBADC0DE".to_string());
        let first = engine.analyze(&tx).await.unwrap();
        let second = engine.analyze(&tx).await.unwrap();
        assert!(first.score >= 80);
        assert_eq!(first.score, second.score);
        assert_eq!(first.reasons, second.reasons);
        assert_eq!(first.level, second.level);
    }

    #[tokio::test]
    async fn failing_gas_oracle_contributes_zero() {
        let mut tx = plain_tx();
        tx.gas_price = 100 * AVERAGE_GAS;
        tx.from = "0xthief".to_string();

        let healthy = benign_engine().analyze(&tx).await.unwrap();
        assert_eq!(healthy.score, 70 + 25);

        for gas in [StubGas::Failing, StubGas::Hanging] {
            let engine = engine_with(
                gas,
                StubIntel {
                    verified: Some(true),
                    age_days: Some(365),
                },
                StubHistory(Some(100)),
            );
            let degraded = engine.analyze(&tx).await.unwrap();
            assert_eq!(degraded.score, 70);
            assert_eq!(degraded.reasons, vec!["sender blacklisted"]);
        }
    }

    #[tokio::test]
    async fn malformed_input_rejected() {
        let mut tx = plain_tx();
        tx.hash = String::new();
        assert_eq!(
            benign_engine().analyze(&tx).await,
            Err(ValidationError::MissingHash)
        );
    }

    #[tokio::test]
    async fn concurrent_callers() {
        let engine = Arc::new(benign_engine());
        let mut handles = Vec::new();
        for i in 0..16 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = scenario_tx();
                tx.hash = format!("0x{i:02x}");
                engine.analyze(&tx).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().score, 145);
        }
    }
}
