//! CLI command handler for `history`.
//!
//! Reads run reports back from a JSONL history written by `provision --history`.

use std::io::Write;
use std::path::PathBuf;

use uuid::Uuid;

use crate::core::{RunReport, RunStatus};
use crate::storage::JsonlWriter;
use crate::{ProvisionError, ProvisionResult};

/// Print the runs in `jsonl_path`, optionally only those for one lab.
pub fn run(jsonl_path: PathBuf, lab_id: Option<Uuid>, json: bool) -> ProvisionResult<()> {
    let reader = JsonlWriter::new(&jsonl_path);
    let reports = reader.read_filtered(lab_id)?;
    eprintln!("Read {} run(s) from: {}", reports.len(), jsonl_path.display());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_reports(&mut out, &reports, json)
}

fn status_label(report: &RunReport) -> &'static str {
    match report.status {
        RunStatus::Provisioned => "provisioned",
        RunStatus::NothingToDo => "nothing_to_do",
        RunStatus::AlreadyRecorded => "already_recorded",
        RunStatus::Failed => "failed",
    }
}

pub fn write_reports<W: Write>(out: &mut W, reports: &[RunReport], json: bool) -> ProvisionResult<()> {
    if json {
        let text = serde_json::to_string_pretty(reports)
            .map_err(|e| ProvisionError::Config(format!("failed to serialize history: {e}")))?;
        writeln!(out, "{text}")?;
        return Ok(());
    }

    for r in reports {
        let lab = r.lab_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
        let detail = match (&r.instance_id, &r.failure) {
            (Some(id), _) => id.clone(),
            (None, Some(f)) => format!("{} at {}: {}", f.kind, f.stage, f.compensation),
            (None, None) => String::new(),
        };
        writeln!(
            out,
            "{}  {:<13}  {}  {}ms  {}",
            r.timestamp,
            status_label(r),
            lab,
            r.duration_ms,
            detail
        )?;
    }
    Ok(())
}
