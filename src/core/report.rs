//! RunReport schema v1 - machine-readable summary of one provisioning run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lab::SelectionMode;

/// Schema version for forward compatibility
pub const SCHEMA_VERSION: u32 = 1;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Provisioned,
    NothingToDo,
    /// The selected lab already had a record; no tool was run.
    AlreadyRecorded,
    Failed,
}

/// Provisioning tool information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Failure details for a run that did not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Pipeline stage that failed
    pub stage: String,
    /// Error kind (e.g. "provisioning_failed")
    pub kind: String,
    pub message: String,
    /// What the compensation pass did
    pub compensation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version for forward compatibility
    pub schema_version: u32,

    /// Unique identifier for this run
    pub run_id: String,

    /// ISO 8601 timestamp
    pub timestamp: String,

    pub mode: SelectionMode,

    pub status: RunStatus,

    pub tool: ToolInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Path of the generated Terraform document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,

    /// Wall time of the whole run
    pub duration_ms: u128,
}

impl RunReport {
    pub fn new(mode: SelectionMode, status: RunStatus, tool: ToolInfo) -> Self {
        let timestamp = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let run_id = format!(
            "{:x}-{}",
            nanos,
            timestamp
                .get(..19)
                .unwrap_or(&timestamp)
                .replace([':', '-', 'T'], "")
        );

        RunReport {
            schema_version: SCHEMA_VERSION,
            run_id,
            timestamp,
            mode,
            status,
            tool,
            lab_id: None,
            image_id: None,
            instance_id: None,
            document_path: None,
            document_sha256: None,
            failure: None,
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ToolInfo {
        ToolInfo {
            name: "terraform".into(),
            version: None,
        }
    }

    #[test]
    fn test_new_report_has_id_and_timestamp() {
        let report = RunReport::new(SelectionMode::Unprovisioned, RunStatus::NothingToDo, tool());
        assert_eq!(report.schema_version, SCHEMA_VERSION);
        assert!(!report.run_id.is_empty());
        assert!(!report.timestamp.is_empty());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let report = RunReport::new(SelectionMode::Latest, RunStatus::NothingToDo, tool());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "nothing_to_do");
        assert_eq!(json["mode"], "latest");
        assert!(json.get("lab_id").is_none());
        assert!(json.get("failure").is_none());
        assert!(json["tool"].get("version").is_none());
    }
}
