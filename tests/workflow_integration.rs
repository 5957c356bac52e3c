//! Integration tests for the provisioning workflow.
//!
//! These run the full pipeline against the in-memory store and the mock
//! provisioner. No Terraform binary or database is required.

use lab_provision::ToolStep;
use lab_provision::core::{ImageCatalog, LabRequest, RecordStatus, SelectionMode};
use lab_provision::engine::{Compensation, RunOptions, RunOutcome, Stage, run_once};
use lab_provision::store::{LabStore, MemoryLabStore};
use lab_provision::tool::{MockConfig, MockProvisioner};
use lab_provision::{ProvisionError, render};
use uuid::Uuid;

fn demo_lab() -> LabRequest {
    LabRequest::new(Uuid::new_v4(), "t2.micro", 20, "ubuntu", "demo")
}

#[test]
fn test_provision_records_instance_and_next_run_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::default_mock();
    let opts = RunOptions::new(dir.path());

    let outcome = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap();
    let RunOutcome::Provisioned(done) = outcome else {
        panic!("expected a provisioned lab");
    };

    assert_eq!(done.lab, lab);
    assert_eq!(done.image_id, "ami-0dba2cb6798deb6d8");
    assert_eq!(done.instance_id, "i-0abc123");
    assert_eq!(tool.steps(), vec!["init", "apply", "show"]);

    let text = std::fs::read_to_string(&done.document.path).unwrap();
    assert!(text.contains(r#"ami           = "ami-0dba2cb6798deb6d8""#));
    assert!(text.contains(r#"instance_type = "t2.micro""#));
    assert!(text.contains("volume_size = 20"));
    assert!(text.contains(r#"Name = "demo""#));
    assert_eq!(done.document.workdir, render::lab_workdir(dir.path(), lab.lab_id));

    let records = store.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lab_id, lab.lab_id);
    assert_eq!(records[0].instance_id.as_deref(), Some("i-0abc123"));
    assert_eq!(records[0].status, RecordStatus::Provisioned);

    let again = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap();
    assert!(matches!(again, RunOutcome::NothingToDo));
    assert_eq!(store.records().unwrap().len(), 1);
}

#[test]
fn test_every_tool_call_runs_in_the_lab_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::default_mock();

    run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path())).unwrap();

    let workdir = render::lab_workdir(dir.path(), lab.lab_id);
    for call in tool.calls() {
        assert!(call.ends_with(&workdir.display().to_string()), "{call}");
    }
}

#[test]
fn test_apply_failure_rolls_back_and_releases_claim() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::new(MockConfig::new("mock").fails_at(ToolStep::Apply));

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path()))
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Provisioning);
    assert_eq!(failure.lab_id, Some(lab.lab_id));
    assert!(matches!(
        failure.error,
        ProvisionError::ProvisioningFailed { step: ToolStep::Apply, .. }
    ));
    assert_eq!(failure.compensation, Compensation::RolledBack);
    assert_eq!(failure.exit_code(), 4);
    assert_eq!(tool.steps(), vec!["init", "apply", "destroy"]);

    // no record left behind; the lab is eligible again
    assert!(store.record_for(lab.lab_id).is_none());
    assert_eq!(store.claim_next().unwrap(), Some(lab));
}

#[test]
fn test_destroy_failure_flags_lab_as_orphaned() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::new(
        MockConfig::new("mock")
            .fails_at(ToolStep::Apply)
            .fails_at(ToolStep::Destroy),
    );

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path()))
        .unwrap_err();

    assert!(matches!(failure.compensation, Compensation::Orphaned { instance_id: None, .. }));
    let record = store.record_for(lab.lab_id).unwrap();
    assert_eq!(record.status, RecordStatus::Orphaned);

    // orphaned labs are never picked up again
    let tool = MockProvisioner::default_mock();
    let next = run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path())).unwrap();
    assert!(matches!(next, RunOutcome::NothingToDo));
    assert!(tool.steps().is_empty());
}

#[test]
fn test_no_rollback_keeps_infrastructure_and_flags_orphan() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::new(MockConfig::new("mock").with_state_json("not json"));
    let opts = RunOptions::new(dir.path()).without_rollback();

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap_err();

    assert_eq!(failure.stage, Stage::Extracting);
    assert!(matches!(failure.error, ProvisionError::ResultNotFound(_)));
    match &failure.compensation {
        Compensation::Orphaned { reason, .. } => assert_eq!(reason, "rollback disabled"),
        other => panic!("expected orphaned, got {other:?}"),
    }
    assert!(!tool.steps().contains(&"destroy".to_string()));
    assert_eq!(store.record_for(lab.lab_id).unwrap().status, RecordStatus::Orphaned);
}

#[test]
fn test_record_failure_with_unwritable_store_reports_unrecorded() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone()).failing_writes();
    let tool = MockProvisioner::new(MockConfig::new("mock").fails_at(ToolStep::Destroy));
    let opts = RunOptions::new(dir.path()).with_mode(SelectionMode::Latest);

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap_err();

    assert_eq!(failure.stage, Stage::Recording);
    assert!(matches!(failure.error, ProvisionError::Storage(_)));
    assert!(matches!(failure.compensation, Compensation::Unrecorded { .. }));
    assert_eq!(failure.exit_code(), 6);
}

#[test]
fn test_unsupported_os_never_reaches_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let lab = LabRequest::new(Uuid::new_v4(), "t2.micro", 20, "solaris", "demo");
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::default_mock();

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path()))
        .unwrap_err();

    assert_eq!(failure.exit_code(), 3);
    assert_eq!(failure.compensation, Compensation::Rejected);
    assert!(tool.steps().is_empty());
    assert!(!render::lab_workdir(dir.path(), lab.lab_id).exists());
    assert_eq!(store.record_for(lab.lab_id).unwrap().status, RecordStatus::Rejected);
}

#[test]
fn test_rejected_lab_does_not_block_older_labs() {
    let dir = tempfile::tempdir().unwrap();
    let older = LabRequest::new(Uuid::new_v4(), "t2.small", 30, "linux", "older");
    let bad = LabRequest::new(Uuid::new_v4(), "t2.micro", 20, "Ubuntu", "newer");
    let store = MemoryLabStore::new().with_lab(older.clone()).with_lab(bad.clone());
    let tool = MockProvisioner::default_mock();
    let opts = RunOptions::new(dir.path());

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap_err();
    assert_eq!(failure.lab_id, Some(bad.lab_id));

    let RunOutcome::Provisioned(done) = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap()
    else {
        panic!("expected the older lab to be provisioned");
    };
    assert_eq!(done.lab.lab_id, older.lab_id);

    let next = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap();
    assert!(matches!(next, RunOutcome::NothingToDo));
}

#[test]
fn test_latest_mode_rerun_reports_existing_record() {
    let dir = tempfile::tempdir().unwrap();
    let lab = demo_lab();
    let store = MemoryLabStore::new().with_lab(lab.clone());
    let tool = MockProvisioner::default_mock();
    let opts = RunOptions::new(dir.path()).with_mode(SelectionMode::Latest);

    run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap();
    let again = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap();

    match again {
        RunOutcome::AlreadyRecorded(record) => {
            assert_eq!(record.instance_id.as_deref(), Some("i-0abc123"))
        }
        other => panic!("expected the existing record, got {other:?}"),
    }
    assert_eq!(tool.steps(), vec!["init", "apply", "show"]);
    assert_eq!(store.records().unwrap().len(), 1);
}

#[test]
fn test_latest_mode_on_empty_table_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryLabStore::new();
    let tool = MockProvisioner::default_mock();
    let opts = RunOptions::new(dir.path()).with_mode(SelectionMode::Latest);

    let failure = run_once(&store, &tool, &ImageCatalog::default(), &opts).unwrap_err();
    assert_eq!(failure.stage, Stage::Selecting);
    assert!(matches!(failure.error, ProvisionError::NotFound));
    assert_eq!(failure.exit_code(), 2);
}

#[test]
fn test_unprovisioned_mode_on_empty_table_is_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryLabStore::new();
    let tool = MockProvisioner::default_mock();

    let outcome = run_once(&store, &tool, &ImageCatalog::default(), &RunOptions::new(dir.path())).unwrap();
    assert!(matches!(outcome, RunOutcome::NothingToDo));
    assert_eq!(store.schema_creations(), 1);
}

#[test]
fn test_runs_drain_labs_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let older = LabRequest::new(Uuid::new_v4(), "t2.small", 30, "linux", "older");
    let newer = LabRequest::new(Uuid::new_v4(), "t2.micro", 8, "windows", "newer");
    let store = MemoryLabStore::new().with_lab(older.clone()).with_lab(newer.clone());
    let catalog = ImageCatalog::default();
    let opts = RunOptions::new(dir.path());

    let mut seen = Vec::new();
    for id in ["i-first", "i-second"] {
        let tool = MockProvisioner::new(MockConfig::new("mock").with_instance_id(id));
        match run_once(&store, &tool, &catalog, &opts).unwrap() {
            RunOutcome::Provisioned(done) => seen.push((done.lab.lab_id, done.image_id)),
            other => panic!("expected a lab, got {other:?}"),
        }
    }

    assert_eq!(
        seen,
        vec![
            (newer.lab_id, "ami-05b4ded3ceb71e470".to_string()),
            (older.lab_id, "ami-12345678abcd12345".to_string()),
        ]
    );
    assert_eq!(store.record_for(newer.lab_id).unwrap().instance_id.as_deref(), Some("i-first"));
    assert_eq!(store.record_for(older.lab_id).unwrap().instance_id.as_deref(), Some("i-second"));
}
