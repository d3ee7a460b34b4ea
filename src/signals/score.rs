use super::rules::RuleOutcome;

/// Sum rule contributions and concatenate their reasons in rule order.
///
/// Outcomes may arrive in any order; they are sorted by rule position first.
pub fn combine(outcomes: &[RuleOutcome]) -> (u32, Vec<String>) {
    let mut ordered: Vec<&RuleOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| o.rule);
    for o in &ordered {
        tracing::trace!(rule = o.rule.name(), points = o.contribution, "Rule evaluated");
    }

    let score = ordered.iter().map(|o| o.contribution).sum();
    let reasons = ordered
        .iter()
        .flat_map(|o| o.reasons.iter().cloned())
        .collect();
    (score, reasons)
}
