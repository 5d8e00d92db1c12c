//! Text summary builder for CLI output.
//!
//! This module computes metrics and formats human-readable lines for text mode.

use crate::metrics;
use crate::model::{BrokerSet, Finding, RemovalJob, SubjectProfile};
use crate::orchestrator::{DiscoveryView, RemovalPhase, RemovalView, SelectionSet, WorkflowReport};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() {
        "-"
    } else {
        s
    }
}

/// One-line progress for a running discovery job.
pub(crate) fn discovery_progress_line(view: &DiscoveryView) -> String {
    let status = view.status.as_ref().map(|s| s.as_str()).unwrap_or("starting");
    let mut line = format!("Discovery {status}: {:>3}%", view.progress);
    if view.total_brokers > 0 {
        line.push_str(&format!(
            " ({}/{})",
            view.current_broker_index, view.total_brokers
        ));
    }
    if let Some(name) = view.current_broker_name.as_deref() {
        line.push_str(&format!(" checking {name}"));
    }
    line
}

/// One-line progress for a running removal job.
pub(crate) fn removal_progress_line(view: &RemovalView) -> String {
    match (view.phase(), view.job.as_ref()) {
        (RemovalPhase::Draft, _) | (_, None) => "Removal: draft".to_string(),
        (_, Some(job)) => format!(
            "Removal {}: {:>3}% ({} of {} brokers handled)",
            job.status,
            job.progress,
            job.items.len(),
            job.broker_ids.len()
        ),
    }
}

fn finding_line(f: &Finding, selection: Option<&SelectionSet>) -> String {
    let mark = match selection {
        Some(sel) if sel.contains(f.broker_id) => "[x]",
        Some(_) if f.is_selectable() => "[ ]",
        _ => "   ",
    };
    let mut flags = Vec::new();
    if f.marked_false_positive {
        flags.push("false positive");
    }
    if f.verified_positive {
        flags.push("verified");
    }
    if f.error.is_some() {
        flags.push("search error");
    }
    let mut line = format!(
        "{mark} #{:<4} {:<24} {:<24} {:<9} {:>4.0}%",
        f.broker_id,
        or_dash(&f.broker_name),
        or_dash(&f.domain),
        if f.found { "found" } else { "not found" },
        f.confidence * 100.0
    );
    if !flags.is_empty() {
        line.push_str(&format!("  ({})", flags.join(", ")));
    }
    line
}

pub(crate) fn build_discovery_summary(
    view: &DiscoveryView,
    selection: Option<&SelectionSet>,
) -> TextSummary {
    let mut lines = Vec::new();
    lines.push(format!(
        "Discovery job: {} ({:?})",
        view.job_id.as_deref().unwrap_or("-"),
        view.phase
    ));
    if let Some(profile) = view.profile_id.as_deref() {
        lines.push(format!("Profile: {profile}"));
    }
    if let Some(set) = view.broker_set.as_deref() {
        lines.push(format!("Broker set: {set}"));
    }
    lines.push(format!(
        "Progress: {}% ({}/{} brokers)",
        view.progress, view.current_broker_index, view.total_brokers
    ));
    if let Some(err) = view.last_error.as_deref() {
        lines.push(format!("Error: {err}"));
    }

    if !view.findings.is_empty() {
        let stats = metrics::compute_finding_stats(&view.findings);
        lines.push(format!(
            "Findings: {} checked, {} found, {} selectable, {} false positive, {} verified",
            stats.total, stats.found, stats.selectable, stats.false_positive, stats.verified
        ));
        if let Some(mean) = stats.mean_confidence {
            lines.push(format!("Mean confidence (found): {:.0}%", mean * 100.0));
        }
        for f in &view.findings {
            lines.push(finding_line(f, selection));
        }
    }
    if let Some(sel) = selection {
        lines.push(format!(
            "Selected: {} of {} selectable",
            sel.len(),
            view.selectable().count()
        ));
    }

    TextSummary { lines }
}

pub(crate) fn build_removal_summary(job: &RemovalJob) -> TextSummary {
    let mut lines = vec![
        format!("Removal job: {} ({})", job.id, job.status),
        format!("Profile: {}", or_dash(&job.profile_id)),
        format!("Created: {}", job.created_at.to_rfc3339()),
        format!(
            "Progress: {}% ({} of {} brokers)",
            job.progress,
            job.items.len(),
            job.broker_ids.len()
        ),
    ];
    if let Some(err) = job.error.as_deref() {
        lines.push(format!("Error: {err}"));
    }
    if !job.items.is_empty() {
        let tally = metrics::compute_removal_tally(job);
        let by_status: Vec<String> = tally
            .by_status
            .iter()
            .map(|(k, n)| format!("{k} {n}"))
            .collect();
        lines.push(format!("Items: {}", by_status.join(", ")));
    }
    for item in &job.items {
        lines.push(format!(
            "  #{:<4} {:<24} {:<7} {:<16} {}",
            item.broker_id,
            or_dash(&item.broker_name),
            or_dash(item.method.as_str()),
            or_dash(item.status.as_str()),
            item.transcript.lines().next().unwrap_or("")
        ));
        if let Some(path) = item.evidence_path.as_deref() {
            lines.push(format!("        evidence: {path}"));
        }
    }
    TextSummary { lines }
}

pub(crate) fn build_history_summary(jobs: &[RemovalJob]) -> TextSummary {
    if jobs.is_empty() {
        return TextSummary {
            lines: vec!["No removal jobs.".to_string()],
        };
    }
    let lines = jobs
        .iter()
        .map(|job| {
            format!(
                "{}  {:<10} {:>3}%  {} broker(s)  {}  {}",
                job.created_at.to_rfc3339(),
                job.status,
                job.progress,
                job.broker_ids.len(),
                or_dash(&job.profile_id),
                job.id
            )
        })
        .collect();
    TextSummary { lines }
}

pub(crate) fn build_broker_sets_summary(sets: &[BrokerSet]) -> TextSummary {
    let lines = sets
        .iter()
        .map(|s| {
            let count = s
                .broker_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into());
            format!(
                "{:<20} {:<24} {:>4} brokers  {:<10} p{}  {}",
                s.key,
                or_dash(&s.name),
                count,
                s.estimated_time.as_deref().unwrap_or("-"),
                s.priority,
                s.description
            )
        })
        .collect();
    TextSummary { lines }
}

pub(crate) fn build_profiles_summary(profiles: &[SubjectProfile]) -> TextSummary {
    if profiles.is_empty() {
        return TextSummary {
            lines: vec!["No subject profiles.".to_string()],
        };
    }
    let lines = profiles
        .iter()
        .map(|p| {
            format!(
                "{}  {:<20} names {}  emails {}  phones {}",
                p.id,
                or_dash(&p.label),
                p.names.len(),
                p.emails.len(),
                p.phones.len()
            )
        })
        .collect();
    TextSummary { lines }
}

pub(crate) fn build_workflow_summary(report: &WorkflowReport) -> TextSummary {
    let mut lines = build_discovery_summary(&report.discovery, Some(&report.selection)).lines;
    if let Some(job) = report.removal.as_ref() {
        lines.push(String::new());
        lines.extend(build_removal_summary(job).lines);
    }
    if let Some(err) = report.removal_error.as_deref() {
        lines.push(format!("Removal polling stopped: {err}"));
    }
    if !report.history.is_empty() {
        lines.push(String::new());
        lines.push("History:".to_string());
        lines.extend(build_history_summary(&report.history).lines);
    }
    TextSummary { lines }
}
