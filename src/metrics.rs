use crate::model::{Finding, RemovalJob};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts over a set of discovery findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindingStats {
    pub total: usize,
    pub found: usize,
    pub selectable: usize,
    pub false_positive: usize,
    pub verified: usize,
    pub search_errors: usize,
    /// Mean confidence over found findings.
    pub mean_confidence: Option<f64>,
}

pub fn compute_finding_stats(findings: &[Finding]) -> FindingStats {
    let mut stats = FindingStats {
        total: findings.len(),
        ..Default::default()
    };
    let mut confidence_sum = 0.0;
    for f in findings {
        if f.found {
            stats.found += 1;
            confidence_sum += f.confidence;
        }
        if f.is_selectable() {
            stats.selectable += 1;
        }
        if f.marked_false_positive {
            stats.false_positive += 1;
        }
        if f.verified_positive {
            stats.verified += 1;
        }
        if f.error.is_some() {
            stats.search_errors += 1;
        }
    }
    if stats.found > 0 {
        stats.mean_confidence = Some(confidence_sum / stats.found as f64);
    }
    stats
}

/// Removal items grouped by status and by method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemovalTally {
    pub by_status: BTreeMap<String, usize>,
    pub by_method: BTreeMap<String, usize>,
}

pub fn compute_removal_tally(job: &RemovalJob) -> RemovalTally {
    let mut tally = RemovalTally::default();
    for item in &job.items {
        *tally
            .by_status
            .entry(item.status.as_str().to_string())
            .or_default() += 1;
        *tally
            .by_method
            .entry(item.method.as_str().to_string())
            .or_default() += 1;
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finding_stats_count_each_flag() {
        let findings: Vec<Finding> = serde_json::from_value(json!([
            {"broker_id": 1, "found": true, "confidence": 0.9, "verified_positive": true},
            {"broker_id": 2, "found": true, "confidence": 0.5, "marked_false_positive": true},
            {"broker_id": 3, "found": false, "error": "timeout"},
        ]))
        .unwrap();

        let stats = compute_finding_stats(&findings);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.found, 2);
        assert_eq!(stats.selectable, 1);
        assert_eq!(stats.false_positive, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.search_errors, 1);
        assert!((stats.mean_confidence.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn no_found_findings_has_no_mean() {
        assert_eq!(compute_finding_stats(&[]).mean_confidence, None);
    }

    #[test]
    fn removal_tally_groups_items() {
        let job: RemovalJob = serde_json::from_value(json!({
            "status": "completed",
            "broker_ids": [1, 2, 3],
            "items": [
                {"broker_id": 1, "method": "email", "status": "drafted"},
                {"broker_id": 2, "method": "form", "status": "manual_required"},
                {"broker_id": 3, "method": "email", "status": "drafted"}
            ]
        }))
        .unwrap();

        let tally = compute_removal_tally(&job);
        assert_eq!(tally.by_status["drafted"], 2);
        assert_eq!(tally.by_status["manual_required"], 1);
        assert!(!tally.by_status.contains_key("submitted"));
        assert_eq!(tally.by_method["email"], 2);
        assert_eq!(tally.by_method["form"], 1);
    }
}
