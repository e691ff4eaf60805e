//! Iteration limits for the outline agent.

/// Hard ceiling on agent iterations: one generate and one evaluate per
/// allowed outline version, plus two spare iterations for planner slack.
pub fn hard_iteration_ceiling(max_retries: u32) -> u32 {
    max_retries.saturating_add(1).saturating_mul(2).saturating_add(2)
}

/// Number of outline versions the agent may produce before it must report
/// the best one.
pub fn max_outline_versions(max_retries: u32) -> u32 {
    max_retries.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_matches_generate_evaluate_pairs_plus_slack() {
        assert_eq!(hard_iteration_ceiling(0), 4);
        assert_eq!(hard_iteration_ceiling(1), 6);
        assert_eq!(hard_iteration_ceiling(2), 8);
    }

    #[test]
    fn versions_are_retries_plus_one() {
        assert_eq!(max_outline_versions(2), 3);
        assert_eq!(max_outline_versions(u32::MAX), u32::MAX);
    }
}
