//! JSON report and JSONL history written by the provision command.

use lab_provision::ToolStep;
use lab_provision::core::{ImageCatalog, LabRequest, RunReport, RunStatus, SCHEMA_VERSION};
use lab_provision::engine::RunOptions;
use lab_provision::provision_cmd::{ReportTargets, run_with};
use lab_provision::storage::JsonlWriter;
use lab_provision::store::MemoryLabStore;
use lab_provision::tool::{MockConfig, MockProvisioner};
use tempfile::tempdir;
use uuid::Uuid;

#[test]
fn test_history_accumulates_one_line_per_run() {
    let dir = tempdir().unwrap();
    let history = dir.path().join("runs/history.jsonl");
    let lab = LabRequest::new(Uuid::new_v4(), "t2.micro", 20, "ubuntu", "demo");
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::default_mock();
    let opts = RunOptions::new(dir.path());
    let targets = ReportTargets {
        json: None,
        history: Some(history.clone()),
    };

    let first = run_with(&store, &tool, &ImageCatalog::default(), &opts, &targets).unwrap();
    let second = run_with(&store, &tool, &ImageCatalog::default(), &opts, &targets).unwrap();
    assert_eq!(first.status, RunStatus::Provisioned);
    assert_eq!(second.status, RunStatus::NothingToDo);

    let writer = JsonlWriter::new(&history);
    assert_eq!(writer.count().unwrap(), 2);

    let runs = writer.read_all().unwrap();
    assert!(runs.iter().all(|r| r.schema_version == SCHEMA_VERSION));
    assert_eq!(runs[0].run_id, first.run_id);
    assert_eq!(runs[0].instance_id.as_deref(), Some("i-0abc123"));
    assert_eq!(runs[1].lab_id, None);

    let for_lab = writer.read_filtered(Some(lab.lab_id)).unwrap();
    assert_eq!(for_lab.len(), 1);
    assert_eq!(for_lab[0].document_sha256, first.document_sha256);
}

#[test]
fn test_json_report_for_failed_run() {
    let dir = tempdir().unwrap();
    let json = dir.path().join("report.json");
    let lab = LabRequest::new(Uuid::new_v4(), "t2.micro", 20, "ubuntu", "demo");
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::new(MockConfig::new("mock").fails_at(ToolStep::Init));
    let targets = ReportTargets {
        json: Some(json.clone()),
        history: None,
    };

    let err = run_with(
        &store,
        &tool,
        &ImageCatalog::default(),
        &RunOptions::new(dir.path()),
        &targets,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "provisioning_failed");

    let report: RunReport = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.lab_id, Some(lab.lab_id));
    assert!(report.instance_id.is_none());
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, "provisioning");
    assert_eq!(failure.compensation, "claim released");
    assert!(failure.message.contains("terraform init failed"));
}
