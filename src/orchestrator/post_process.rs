//! Post-workflow processing.
//!
//! Handles auto-save and exports once a workflow has produced its report.

use super::WorkflowReport;
use crate::storage;
use std::path::{Path, PathBuf};

/// Result of post-workflow processing, ready for presentation layers.
pub struct ProcessedWorkflow {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Auto-save the report and write the requested export. Failures become messages.
pub fn process_workflow_completion(
    export_json: Option<&Path>,
    auto_save_dir: Option<&Path>,
    report: &WorkflowReport,
) -> ProcessedWorkflow {
    let mut export_messages = Vec::new();

    let auto_saved_path = match auto_save_dir {
        Some(dir) => match storage::save_report_in(dir, report) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "auto-save failed");
                export_messages.push(format!("Auto-save failed: {e:#}"));
                None
            }
        },
        None => None,
    };

    if let Some(export_path) = export_json {
        match storage::export_json(export_path, report) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedWorkflow {
        export_messages,
        auto_saved_path,
    }
}
