use crate::core::Transaction;
use crate::core::tx::{WEI_PER_UNIT, selector, whole_units};
use crate::reputation::ReputationSnapshot;

// ---------------------------------------------------------------------------
// Sensitive function selectors (first 4 bytes of keccak256)
// ---------------------------------------------------------------------------

/// ERC-20 transfer(address,uint256)
const SEL_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// ERC-20 approve(address,uint256)
const SEL_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

/// ERC-20 transferFrom(address,address,uint256)
const SEL_TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

const SENSITIVE_SELECTORS: [[u8; 4]; 3] = [SEL_TRANSFER, SEL_APPROVE, SEL_TRANSFER_FROM];

/// Call data above this size is flagged.
pub const LARGE_DATA_BYTES: usize = 10_000;

const YOUNG_CONTRACT_DAYS: u64 = 7;
const LOW_HISTORY_TX_COUNT: u64 = 5;
const GAS_PRICE_MULTIPLIER: u128 = 3;
const HIGH_VALUE_UNITS: u128 = 100;
const ELEVATED_VALUE_UNITS: u128 = 10;

/// The five checks, in the order their reasons appear in an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    Contract,
    Value,
    GasPrice,
    Sender,
    CallData,
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Contract => "contract",
            RuleKind::Value => "value",
            RuleKind::GasPrice => "gas_price",
            RuleKind::Sender => "sender",
            RuleKind::CallData => "call_data",
        }
    }
}

/// Points and reasons contributed by one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule: RuleKind,
    pub contribution: u32,
    pub reasons: Vec<String>,
}

impl RuleOutcome {
    pub fn empty(rule: RuleKind) -> Self {
        Self {
            rule,
            contribution: 0,
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, points: u32, reason: impl Into<String>) {
        self.contribution += points;
        self.reasons.push(reason.into());
    }
}

// --- Individual Rules ---

/// Recipient reputation, source verification and deployment age.
///
/// A failed verification lookup counts as unverified and an unknown age as
/// zero days, so an unreachable explorer still flags the recipient.
/// `has_code == Some(false)` marks a plain account: only the reputation
/// check applies. An unknown code lookup is judged as a contract.
pub fn contract_risk(
    tx: &Transaction,
    snapshot: &ReputationSnapshot,
    has_code: Option<bool>,
    verified: Option<bool>,
    age_days: Option<u64>,
) -> RuleOutcome {
    let mut outcome = RuleOutcome::empty(RuleKind::Contract);
    let Some(to) = tx.to.as_deref() else {
        return outcome;
    };

    if snapshot.is_malicious(to) {
        outcome.add(80, "recipient is a known malicious contract");
    }
    if has_code == Some(false) {
        return outcome;
    }
    if verified != Some(true) {
        outcome.add(20, "contract source unverified");
    }
    if age_days.unwrap_or(0) < YOUNG_CONTRACT_DAYS {
        outcome.add(15, "contract age below 7 days");
    }
    outcome
}

pub fn value_risk(tx: &Transaction) -> RuleOutcome {
    let mut outcome = RuleOutcome::empty(RuleKind::Value);
    let units = whole_units(tx.value);
    if tx.value > HIGH_VALUE_UNITS * WEI_PER_UNIT {
        outcome.add(30, format!("high transaction value: {units:.2} ETH"));
    } else if tx.value > ELEVATED_VALUE_UNITS * WEI_PER_UNIT {
        outcome.add(15, format!("elevated transaction value: {units:.2} ETH"));
    }
    outcome
}

/// Gas price far above the network average suggests front-running.
/// `None` (oracle unavailable) and a zero average contribute nothing.
pub fn gas_price_risk(tx: &Transaction, average: Option<u128>) -> RuleOutcome {
    let mut outcome = RuleOutcome::empty(RuleKind::GasPrice);
    if let Some(avg) = average.filter(|a| *a > 0) {
        if tx.gas_price > avg.saturating_mul(GAS_PRICE_MULTIPLIER) {
            outcome.add(25, "gas price anomalously high, possible front-running");
        }
    }
    outcome
}

pub fn sender_risk(
    tx: &Transaction,
    snapshot: &ReputationSnapshot,
    tx_count: Option<u64>,
) -> RuleOutcome {
    let mut outcome = RuleOutcome::empty(RuleKind::Sender);
    if snapshot.is_blacklisted(&tx.from) {
        outcome.add(70, "sender blacklisted");
    }
    if tx_count.is_some_and(|n| n < LOW_HISTORY_TX_COUNT) {
        outcome.add(10, "sender has low transaction history");
    }
    outcome
}

pub fn call_data_risk(tx: &Transaction) -> RuleOutcome {
    let mut outcome = RuleOutcome::empty(RuleKind::CallData);
    if tx.data.is_empty() {
        return outcome;
    }
    if selector(&tx.data).is_some_and(|sel| SENSITIVE_SELECTORS.contains(&sel)) {
        outcome.add(10, "invokes a sensitive function selector");
    }
    if tx.data.len() > LARGE_DATA_BYTES {
        outcome.add(15, "transaction data abnormally large");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationList;
    use chrono::Utc;

    fn make_test_tx() -> Transaction {
        Transaction {
            hash: "0xdeadbeef".to_string(),
            from: "0xsender".to_string(),
            to: None,
            value: 0,
            gas_price: 20_000_000_000,
            data: vec![],
            seen_at: Utc::now(),
        }
    }

    fn snapshot() -> ReputationSnapshot {
        ReputationSnapshot::from_list(&ReputationList {
            malicious_contracts: vec!["0xbadc0de".to_string()],
            blacklisted_senders: vec!["0xthief".to_string()],
        })
    }

    #[test]
    fn contract_no_recipient() {
        let tx = make_test_tx();
        let outcome = contract_risk(&tx, &snapshot(), Some(true), None, None);
        assert_eq!(outcome.contribution, 0);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn contract_malicious_verified_old() {
        let mut tx = make_test_tx();
        tx.to = Some("0xbadc0de".to_string());
        let outcome = contract_risk(&tx, &snapshot(), Some(true), Some(true), Some(400));
        assert_eq!(outcome.contribution, 80);
        assert_eq!(outcome.reasons, vec!["recipient is a known malicious contract"]);
    }

    #[test]
    fn contract_lookups_failed() {
        let mut tx = make_test_tx();
        tx.to = Some("0xfriendly".to_string());
        let outcome = contract_risk(&tx, &snapshot(), Some(true), None, None);
        assert_eq!(outcome.contribution, 35);
        assert_eq!(
            outcome.reasons,
            vec!["contract source unverified", "contract age below 7 days"]
        );
    }

    #[test]
    fn contract_age_boundary() {
        let mut tx = make_test_tx();
        tx.to = Some("0xfriendly".to_string());
        assert_eq!(contract_risk(&tx, &snapshot(), Some(true), Some(true), Some(6)).contribution, 15);
        assert_eq!(contract_risk(&tx, &snapshot(), Some(true), Some(true), Some(7)).contribution, 0);
    }

    #[test]
    fn contract_all_flags() {
        let mut tx = make_test_tx();
        tx.to = Some("0xBADC0DE".to_string());
        let outcome = contract_risk(&tx, &snapshot(), Some(true), Some(false), Some(1));
        assert_eq!(outcome.contribution, 115);
        assert_eq!(outcome.reasons.len(), 3);
    }

    #[test]
    fn contract_plain_account_skips_explorer_checks() {
        let mut tx = make_test_tx();
        tx.to = Some("0xfriendly".to_string());
        assert_eq!(contract_risk(&tx, &snapshot(), Some(false), None, None).contribution, 0);
        // Unknown code is judged like a contract.
        assert_eq!(contract_risk(&tx, &snapshot(), None, None, None).contribution, 35);

        tx.to = Some("0xbadc0de".to_string());
        let outcome = contract_risk(&tx, &snapshot(), Some(false), None, None);
        assert_eq!(outcome.contribution, 80);
        assert_eq!(outcome.reasons, vec!["recipient is a known malicious contract"]);
    }

    #[test]
    fn value_tiers() {
        let mut tx = make_test_tx();
        assert_eq!(value_risk(&tx).contribution, 0);

        tx.value = 10 * WEI_PER_UNIT;
        assert_eq!(value_risk(&tx).contribution, 0);

        tx.value = 10 * WEI_PER_UNIT + 1;
        assert_eq!(value_risk(&tx).contribution, 15);

        tx.value = 100 * WEI_PER_UNIT;
        assert_eq!(value_risk(&tx).contribution, 15);

        tx.value = 150 * WEI_PER_UNIT;
        let outcome = value_risk(&tx);
        assert_eq!(outcome.contribution, 30);
        assert_eq!(outcome.reasons, vec!["high transaction value: 150.00 ETH"]);
    }

    #[test]
    fn value_reason_formats_units() {
        let mut tx = make_test_tx();
        tx.value = 25 * WEI_PER_UNIT + WEI_PER_UNIT / 2;
        assert_eq!(value_risk(&tx).reasons, vec!["elevated transaction value: 25.50 ETH"]);
    }

    #[test]
    fn gas_price_anomaly() {
        let mut tx = make_test_tx();
        tx.gas_price = 400;
        assert_eq!(gas_price_risk(&tx, Some(100)).contribution, 25);

        tx.gas_price = 300;
        assert_eq!(gas_price_risk(&tx, Some(100)).contribution, 0);
    }

    #[test]
    fn gas_price_unknown_average() {
        let mut tx = make_test_tx();
        tx.gas_price = u128::MAX;
        assert_eq!(gas_price_risk(&tx, None).contribution, 0);
        assert_eq!(gas_price_risk(&tx, Some(0)).contribution, 0);
        assert_eq!(gas_price_risk(&tx, Some(u128::MAX)).contribution, 0);
    }

    #[test]
    fn sender_blacklisted_and_new() {
        let mut tx = make_test_tx();
        tx.from = "0xthief".to_string();
        let outcome = sender_risk(&tx, &snapshot(), Some(0));
        assert_eq!(outcome.contribution, 80);
        assert_eq!(
            outcome.reasons,
            vec!["sender blacklisted", "sender has low transaction history"]
        );
    }

    #[test]
    fn sender_history_lookup_failed() {
        let tx = make_test_tx();
        assert_eq!(sender_risk(&tx, &snapshot(), None).contribution, 0);
        assert_eq!(sender_risk(&tx, &snapshot(), Some(5)).contribution, 0);
        assert_eq!(sender_risk(&tx, &snapshot(), Some(4)).contribution, 10);
    }

    #[test]
    fn call_data_sensitive_selectors() {
        let mut tx = make_test_tx();
        for sel in SENSITIVE_SELECTORS {
            tx.data = sel.to_vec();
            assert_eq!(call_data_risk(&tx).contribution, 10);
        }
        tx.data = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(call_data_risk(&tx).contribution, 0);
    }

    #[test]
    fn call_data_large_payload() {
        let mut tx = make_test_tx();
        tx.data = vec![0u8; LARGE_DATA_BYTES];
        assert_eq!(call_data_risk(&tx).contribution, 0);

        let mut data = SEL_APPROVE.to_vec();
        data.resize(LARGE_DATA_BYTES + 1, 0);
        tx.data = data;
        let outcome = call_data_risk(&tx);
        assert_eq!(outcome.contribution, 25);
        assert_eq!(
            outcome.reasons,
            vec!["invokes a sensitive function selector", "transaction data abnormally large"]
        );
    }

    #[test]
    fn rule_names_unique() {
        let mut names: Vec<&str> = [
            RuleKind::Contract,
            RuleKind::Value,
            RuleKind::GasPrice,
            RuleKind::Sender,
            RuleKind::CallData,
        ]
        .iter()
        .map(|r| r.name())
        .collect();
        let len = names.len();
        names.sort();
        names.dedup();
        assert_eq!(len, names.len());
    }
}
