use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::tx::WEI_PER_UNIT;
use super::{RiskAssessment, RiskLevel, Transaction};

/// Findings a synthetic alert may cite, in rule order.
const SIM_REASONS: &[&str] = &[
    "contract source unverified",
    "contract age below 7 days",
    "gas price anomalously high, possible front-running",
    "sender has low transaction history",
    "invokes a sensitive function selector",
];

/// A synthetic transaction paired with its fabricated assessment.
#[derive(Debug, Clone)]
pub struct SyntheticAlert {
    pub tx: Transaction,
    pub assessment: RiskAssessment,
}

/// Generates test-mode alerts when no live feed is available.
///
/// Alerts are fabricated: their score and reasons do not come from the
/// scoring engine, and they are flagged `simulated`.
pub struct Simulator {
    rng: StdRng,
    probability: f64,
}

impl Simulator {
    pub fn new(probability: f64) -> Self {
        Self::with_rng(probability, StdRng::from_entropy())
    }

    #[cfg(test)]
    pub fn with_seed(probability: f64, seed: u64) -> Self {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(probability: f64, rng: StdRng) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { rng, probability }
    }

    /// One interval tick: a Bernoulli draw, then an alert on success.
    pub fn tick(&mut self) -> Option<SyntheticAlert> {
        if self.rng.gen_bool(self.probability) {
            Some(self.synthesize())
        } else {
            None
        }
    }

    pub fn synthesize(&mut self) -> SyntheticAlert {
        let tx = Transaction {
            hash: self.random_hex(32),
            from: self.random_hex(20),
            to: Some(self.random_hex(20)),
            value: self.rng.gen_range(0..50) * WEI_PER_UNIT + self.rng.gen_range(0..WEI_PER_UNIT),
            gas_price: self.rng.gen_range(5..200) * 1_000_000_000,
            data: Vec::new(),
            seen_at: Utc::now(),
        };

        let (level, score) = if self.rng.gen_bool(0.5) {
            (RiskLevel::Medium, self.rng.gen_range(30..50))
        } else {
            (RiskLevel::High, self.rng.gen_range(50..70))
        };

        let count = self.rng.gen_range(1..=2);
        let mut picked = rand::seq::index::sample(&mut self.rng, SIM_REASONS.len(), count).into_vec();
        picked.sort_unstable();

        let assessment = RiskAssessment {
            tx_hash: tx.hash.clone(),
            score,
            level,
            reasons: picked.into_iter().map(|i| SIM_REASONS[i].to_string()).collect(),
            timestamp: Utc::now(),
            simulated: true,
        };
        SyntheticAlert { tx, assessment }
    }

    fn random_hex(&mut self, len: usize) -> String {
        let mut bytes = vec![0u8; len];
        self.rng.fill(bytes.as_mut_slice());
        format!("0x{}", hex::encode(bytes))
    }
}
