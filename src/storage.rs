//! Report persistence: explicit JSON exports and timestamped auto-saves.

use crate::orchestrator::WorkflowReport;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

/// Directory that auto-saved reports go to.
pub fn reports_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cloak")
        .join("reports")
}

pub fn export_json(path: &Path, report: &WorkflowReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Save under `dir` as `report-<timestamp>.json`.
pub fn save_report_in(dir: &Path, report: &WorkflowReport) -> Result<PathBuf> {
    let stamp = report
        .generated_at
        .to_datetime()
        .unwrap_or_else(OffsetDateTime::now_utc)
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("format report timestamp")?;
    let path = dir.join(format!("report-{stamp}.json"));
    export_json(&path, report)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EpochSeconds;
    use crate::orchestrator::{DiscoveryView, SelectionSet};

    fn report() -> WorkflowReport {
        WorkflowReport {
            generated_at: EpochSeconds(1_712_345_678.0),
            discovery: DiscoveryView::default(),
            selection: SelectionSet::default(),
            removal: None,
            removal_error: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn save_report_names_file_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_report_in(dir.path(), &report()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "report-20240405-193438.json"
        );

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["discovery"]["phase"], "idle");
        assert_eq!(saved["removal"], serde_json::Value::Null);
    }

    #[test]
    fn export_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/report.json");
        export_json(&path, &report()).unwrap();
        assert!(path.exists());
    }
}
