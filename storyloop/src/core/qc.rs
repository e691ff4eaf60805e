//! Deterministic aggregation of checker reports into one [`QcResult`].
//!
//! The aggregate is a weighted mean of the partial scores, capped when any
//! critical issue is present. Issues only influence the score through the cap,
//! so adding a critical issue can never raise it and removing an issue can
//! never lower it.

use crate::core::types::{CheckerReport, QcResult, Severity};

/// Thresholds applied after the weighted mean is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QcPolicy {
    pub pass_score: f64,
    /// Ceiling on the aggregate whenever a critical issue exists.
    pub critical_cap: f64,
}

impl Default for QcPolicy {
    fn default() -> Self {
        Self {
            pass_score: 75.0,
            critical_cap: 59.0,
        }
    }
}

/// A checker report paired with its configured weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedReport {
    pub report: CheckerReport,
    pub weight: f64,
}

/// Combine reports into a single verdict.
///
/// With no reports (or zero total weight) the chapter scores 100; the verdict
/// then depends only on issues, of which there are none.
pub fn aggregate(reports: &[WeightedReport], policy: &QcPolicy) -> QcResult {
    let total_weight: f64 = reports.iter().map(|r| r.weight.max(0.0)).sum();
    let mean = if total_weight > 0.0 {
        reports
            .iter()
            .map(|r| r.report.score * r.weight.max(0.0))
            .sum::<f64>()
            / total_weight
    } else {
        100.0
    };

    let issues: Vec<_> = reports
        .iter()
        .flat_map(|r| r.report.issues.iter().cloned())
        .collect();
    let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);

    let capped = if has_critical {
        mean.min(policy.critical_cap)
    } else {
        mean
    };

    QcResult::new(round_one_decimal(capped), issues, policy.pass_score)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{QcCategory, QcIssue};

    fn weighted(name: &str, score: f64, weight: f64, issues: Vec<QcIssue>) -> WeightedReport {
        WeightedReport {
            report: CheckerReport::new(name, score, issues),
            weight,
        }
    }

    #[test]
    fn weighted_mean_respects_weights() {
        let result = aggregate(
            &[
                weighted("structure", 90.0, 2.0, Vec::new()),
                weighted("pacing", 60.0, 1.0, Vec::new()),
            ],
            &QcPolicy::default(),
        );
        assert_eq!(result.score(), 80.0);
        assert!(result.passed());
    }

    #[test]
    fn critical_issue_caps_score_and_fails() {
        let result = aggregate(
            &[weighted(
                "structure",
                95.0,
                1.0,
                vec![QcIssue::new(QcCategory::Plot, Severity::Critical, "goal missed")],
            )],
            &QcPolicy::default(),
        );
        assert_eq!(result.score(), 59.0);
        assert!(!result.passed());
    }

    #[test]
    fn adding_critical_never_raises_and_removing_issue_never_lowers() {
        let clean = weighted("a", 70.0, 1.0, Vec::new());
        let with_minor = weighted(
            "a",
            70.0,
            1.0,
            vec![QcIssue::new(QcCategory::Style, Severity::Minor, "wordy")],
        );
        let with_critical = weighted(
            "a",
            70.0,
            1.0,
            vec![QcIssue::new(QcCategory::Logic, Severity::Critical, "paradox")],
        );
        let policy = QcPolicy::default();

        let base = aggregate(std::slice::from_ref(&clean), &policy).score();
        let minor = aggregate(std::slice::from_ref(&with_minor), &policy).score();
        let critical = aggregate(std::slice::from_ref(&with_critical), &policy).score();

        assert!(critical <= base);
        assert!(base >= minor);
    }

    #[test]
    fn empty_reports_pass() {
        let result = aggregate(&[], &QcPolicy::default());
        assert_eq!(result.score(), 100.0);
        assert!(result.passed());
    }

    #[test]
    fn issues_from_all_checkers_are_collected_critical_first() {
        let result = aggregate(
            &[
                weighted(
                    "pacing",
                    80.0,
                    1.0,
                    vec![QcIssue::new(QcCategory::Pacing, Severity::Minor, "slow")],
                ),
                weighted(
                    "character",
                    80.0,
                    1.0,
                    vec![QcIssue::new(QcCategory::Character, Severity::Major, "ooc")],
                ),
            ],
            &QcPolicy::default(),
        );
        let severities: Vec<Severity> = result.issues().iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec![Severity::Major, Severity::Minor]);
    }
}
