//! JSONL (JSON Lines) history of provisioning runs.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::ProvisionError;
use crate::core::report::{RunReport, SCHEMA_VERSION};

/// JSONL writer/reader for run reports.
///
/// Each report is stored as a single JSON line, so runs can be appended
/// without rewriting the file.
#[derive(Debug, Clone)]
pub struct JsonlWriter {
    path: PathBuf,
}

impl JsonlWriter {
    /// Create a new JsonlWriter for the given path.
    ///
    /// The file will be created if it doesn't exist when writing.
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonlWriter {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single report to the JSONL file.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The report's schema_version doesn't match SCHEMA_VERSION
    /// - File operations fail
    /// - JSON serialization fails
    pub fn append(&self, report: &RunReport) -> Result<(), ProvisionError> {
        if report.schema_version != SCHEMA_VERSION {
            return Err(ProvisionError::Config(format!(
                "schema version mismatch: report has v{}, expected v{}",
                report.schema_version, SCHEMA_VERSION
            )));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(report).map_err(|e| {
            ProvisionError::Config(format!("failed to serialize report: {e}"))
        })?;

        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all reports from the JSONL file.
    pub fn read_all(&self) -> Result<Vec<RunReport>, ProvisionError> {
        self.read_filtered(None)
    }

    /// Read reports, optionally only those for one lab.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file doesn't exist
    /// - File operations fail
    /// - JSON deserialization fails for any line
    pub fn read_filtered(&self, lab_id: Option<Uuid>) -> Result<Vec<RunReport>, ProvisionError> {
        if !self.path.exists() {
            return Err(ProvisionError::Config(format!(
                "file not found: {}",
                self.path.display()
            )));
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut reports = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;

            // Skip empty lines
            if line.trim().is_empty() {
                continue;
            }

            let report: RunReport = serde_json::from_str(&line).map_err(|e| {
                ProvisionError::Config(format!("failed to parse line {}: {e}", line_num + 1))
            })?;

            if lab_id.is_some() && report.lab_id != lab_id {
                continue;
            }

            reports.push(report);
        }

        Ok(reports)
    }

    /// Check if the JSONL file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Number of reports in the file (0 if it does not exist).
    pub fn count(&self) -> Result<usize, ProvisionError> {
        if !self.path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let count = reader
            .lines()
            .map_while(Result::ok)
            .filter(|l| !l.trim().is_empty())
            .count();

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunStatus, SelectionMode, ToolInfo};

    fn make_report(lab_id: Option<Uuid>) -> RunReport {
        let mut report = RunReport::new(
            SelectionMode::Unprovisioned,
            RunStatus::Provisioned,
            ToolInfo {
                name: "mock".to_string(),
                version: None,
            },
        );
        report.lab_id = lab_id;
        report
    }

    #[test]
    fn test_schema_version_validation() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlWriter::new(dir.path().join("history.jsonl"));

        let mut report = make_report(None);
        report.schema_version = 999;

        let result = writer.append(&report);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("schema version mismatch"));
    }

    #[test]
    fn test_append_and_filter_by_lab() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlWriter::new(dir.path().join("nested/history.jsonl"));
        assert_eq!(writer.count().unwrap(), 0);

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        writer.append(&make_report(Some(a))).unwrap();
        writer.append(&make_report(Some(b))).unwrap();
        writer.append(&make_report(None)).unwrap();
        writer.append(&make_report(Some(a))).unwrap();

        assert!(writer.exists());
        assert_eq!(writer.count().unwrap(), 4);
        assert_eq!(writer.read_all().unwrap().len(), 4);
        let only_a = writer.read_filtered(Some(a)).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.lab_id == Some(a)));
    }

    #[test]
    fn test_missing_file_errors_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlWriter::new(dir.path().join("absent.jsonl"));
        assert!(writer.read_all().is_err());
    }
}
