use crate::detect::AnomalyCandidate;
use std::collections::HashSet;

/// Merge candidates from every detector run against one series.
///
/// Candidates are ordered by `(timestamp asc, severity desc)` and the first
/// of each `(timestamp, metric_name)` group is kept, so the most severe
/// finding for a day wins. Among equal severities the winner is whichever
/// came first in the input.
pub fn aggregate(mut candidates: Vec<AnomalyCandidate>) -> Vec<AnomalyCandidate> {
    candidates.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| b.severity.cmp(&a.severity))
    });

    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert((c.timestamp, c.metric_name.clone())));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionMethod, Severity};
    use chrono::NaiveDate;

    fn candidate(day: u32, metric: &str, severity: Severity, method: DetectionMethod) -> AnomalyCandidate {
        AnomalyCandidate {
            timestamp: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            metric_name: metric.to_string(),
            metric_value: 1.0,
            expected_range: (0.0, 1.0),
            severity,
            detection_method: method,
            confidence: 1.0,
            notes: String::new(),
        }
    }

    #[test]
    fn test_highest_severity_wins_per_day() {
        let out = aggregate(vec![
            candidate(3, "sales_total", Severity::Medium, DetectionMethod::IsolationForest),
            candidate(3, "sales_total", Severity::Critical, DetectionMethod::SeasonalResidual),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Critical);
        assert_eq!(out[0].detection_method, DetectionMethod::SeasonalResidual);
    }

    #[test]
    fn test_output_is_time_ordered_and_keeps_distinct_days() {
        let out = aggregate(vec![
            candidate(9, "sales_total", Severity::High, DetectionMethod::RollingZscore),
            candidate(2, "sales_total", Severity::Medium, DetectionMethod::IsolationForest),
            candidate(9, "sales_total", Severity::Medium, DetectionMethod::IsolationForest),
            candidate(5, "sales_total", Severity::Low, DetectionMethod::IsolationForest),
        ]);
        let days: Vec<u32> = out.iter().map(|c| chrono::Datelike::day(&c.timestamp)).collect();
        assert_eq!(days, vec![2, 5, 9]);
        assert_eq!(out[2].severity, Severity::High);
    }

    #[test]
    fn test_groups_are_per_metric() {
        let out = aggregate(vec![
            candidate(1, "sales_total", Severity::High, DetectionMethod::RollingZscore),
            candidate(1, "collections_total", Severity::Medium, DetectionMethod::RollingZscore),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_equal_severity_keeps_exactly_one() {
        let out = aggregate(vec![
            candidate(4, "m", Severity::High, DetectionMethod::IsolationForest),
            candidate(4, "m", Severity::High, DetectionMethod::RollingZscore),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::High);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(Vec::new()).is_empty());
    }
}
