//! CLI command handler for `provision`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::AppConfig;
use crate::core::{FailureInfo, ImageCatalog, RunReport, RunStatus, SelectionMode, ToolInfo};
use crate::engine::{RunOptions, RunOutcome, run_once};
use crate::storage::JsonlWriter;
use crate::store::{LabStore, PgLabStore};
use crate::tool::{Provisioner, TerraformProvisioner};
use crate::{ProvisionError, ProvisionResult, sha256_hex};

/// Where the run report goes besides stdout.
#[derive(Debug, Clone, Default)]
pub struct ReportTargets {
    /// Write the report as a JSON document
    pub json: Option<PathBuf>,
    /// Append the report to a JSONL history file
    pub history: Option<PathBuf>,
}

/// Run the `provision` command against Postgres and the Terraform CLI.
pub fn run(
    config: &AppConfig,
    mode: SelectionMode,
    rollback: bool,
    targets: &ReportTargets,
) -> ProvisionResult<()> {
    let store = PgLabStore::new(config.database.clone());
    let provisioner = TerraformProvisioner::new(config.terraform_config()?);
    let catalog = config.image_catalog();

    let mut opts = RunOptions::new(&config.workspace)
        .with_mode(mode)
        .with_document(config.document.clone())
        .with_timeout(config.tool_timeout());
    if !rollback {
        opts = opts.without_rollback();
    }

    run_with(&store, &provisioner, &catalog, &opts, targets).map(|_| ())
}

/// Run one provisioning pass with explicit collaborators.
///
/// Prints the one-line result to stdout and writes the report targets for
/// every outcome, including failures. Returns the report on success and the
/// run's error otherwise.
pub fn run_with(
    store: &dyn LabStore,
    provisioner: &dyn Provisioner,
    catalog: &ImageCatalog,
    opts: &RunOptions,
    targets: &ReportTargets,
) -> ProvisionResult<RunReport> {
    let tool = ToolInfo {
        name: provisioner.name().to_string(),
        version: provisioner.version(),
    };
    let start = Instant::now();
    let outcome = run_once(store, provisioner, catalog, opts);
    let elapsed = start.elapsed().as_millis();

    let (mut report, result) = match outcome {
        Ok(RunOutcome::NothingToDo) => {
            println!("No unprovisioned lab requests; nothing to do.");
            (RunReport::new(opts.mode, RunStatus::NothingToDo, tool), Ok(()))
        }
        Ok(RunOutcome::Provisioned(done)) => {
            println!("Instance created successfully with ID: {}", done.instance_id);
            let mut report = RunReport::new(opts.mode, RunStatus::Provisioned, tool);
            report.lab_id = Some(done.lab.lab_id);
            report.image_id = Some(done.image_id);
            report.instance_id = Some(done.instance_id);
            report.document_path = Some(done.document.path);
            report.document_sha256 = Some(done.document.sha256);
            (report, Ok(()))
        }
        Ok(RunOutcome::AlreadyRecorded(record)) => {
            println!(
                "Lab {} already has a {} record (instance {}); nothing to do.",
                record.lab_id,
                record.status,
                record.instance_id.as_deref().unwrap_or("-")
            );
            let mut report = RunReport::new(opts.mode, RunStatus::AlreadyRecorded, tool);
            report.lab_id = Some(record.lab_id);
            report.instance_id = record.instance_id;
            (report, Ok(()))
        }
        Err(failure) => {
            eprintln!("compensation: {}", failure.compensation);
            let mut report = RunReport::new(opts.mode, RunStatus::Failed, tool);
            report.lab_id = failure.lab_id;
            if let Some(lab_id) = failure.lab_id {
                let path = crate::render::lab_workdir(&opts.workspace, lab_id)
                    .join(crate::render::DOCUMENT_FILE);
                if let Ok(bytes) = std::fs::read(&path) {
                    report.document_sha256 = Some(sha256_hex(&bytes));
                    report.document_path = Some(path);
                }
            }
            report.failure = Some(FailureInfo {
                stage: failure.stage.to_string(),
                kind: failure.error.kind().to_string(),
                message: failure.error.to_string(),
                compensation: failure.compensation.to_string(),
            });
            (report, Err(failure.error))
        }
    };
    report.duration_ms = elapsed;

    // Report targets are best effort once the run itself has failed.
    if let Err(e) = write_targets(&report, targets) {
        if result.is_err() {
            eprintln!("failed to write run report: {e}");
        } else {
            return Err(e);
        }
    }

    result.map(|()| report)
}

fn write_targets(report: &RunReport, targets: &ReportTargets) -> ProvisionResult<()> {
    if let Some(path) = &targets.json {
        write_json(report, path)?;
        eprintln!("Wrote JSON report to: {}", path.display());
    }
    if let Some(path) = &targets.history {
        JsonlWriter::new(path).append(report)?;
        eprintln!("Appended run to history: {}", path.display());
    }
    Ok(())
}

fn write_json(report: &RunReport, path: &Path) -> ProvisionResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| ProvisionError::Config(format!("failed to serialize report: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}
