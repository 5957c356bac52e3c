//! The provisioning pipeline for one lab.
//!
//! `run_once` walks `SELECTING -> RESOLVING_IMAGE -> RENDERING -> PROVISIONING
//! -> EXTRACTING -> RECORDING`. Undo actions are registered as the run makes
//! progress (claim release after a claim, `destroy` before `apply`) and are
//! replayed in reverse when a later stage fails. A resource that cannot be
//! destroyed is flagged `orphaned` in the store instead of being forgotten.
//!
//! Only infrastructure created by the failing run is destroyed: a working
//! directory that already tracked resources is flagged, never torn down, and
//! `latest` mode stops before the tool for a lab that already has a record.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::core::{ImageCatalog, LabRequest, ProvisioningRecord, SelectionMode};
use crate::render::{DocumentInputs, DocumentSettings, RenderedDocument, write_document};
use crate::store::LabStore;
use crate::tool::{Provisioner, extract_instance_id};
use crate::{ProvisionError, ProvisionResult};

/// Pipeline stage, used to report where a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Selecting,
    ResolvingImage,
    Rendering,
    Provisioning,
    Extracting,
    Recording,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Selecting => "selecting",
            Stage::ResolvingImage => "resolving_image",
            Stage::Rendering => "rendering",
            Stage::Provisioning => "provisioning",
            Stage::Extracting => "extracting",
            Stage::Recording => "recording",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for a provisioning run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: SelectionMode,
    /// Parent of the per-lab working directories
    pub workspace: PathBuf,
    pub document: DocumentSettings,
    /// Timeout for each provisioning tool call; zero waits indefinitely
    pub timeout: Duration,
    /// Destroy applied infrastructure when a later stage fails
    pub rollback: bool,
}

impl RunOptions {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        RunOptions {
            mode: SelectionMode::default(),
            workspace: workspace.into(),
            document: DocumentSettings::default(),
            timeout: Duration::ZERO,
            rollback: true,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_document(mut self, document: DocumentSettings) -> Self {
        self.document = document;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Leave applied infrastructure in place on failure; the lab is flagged
    /// `orphaned` instead.
    pub fn without_rollback(mut self) -> Self {
        self.rollback = false;
        self
    }
}

/// A lab that was provisioned and recorded.
#[derive(Debug, Clone)]
pub struct ProvisionedLab {
    pub lab: LabRequest,
    pub image_id: String,
    pub instance_id: String,
    pub document: RenderedDocument,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// No eligible lab request.
    NothingToDo,
    Provisioned(ProvisionedLab),
    /// `latest` mode picked a lab that already has a record; nothing was run.
    AlreadyRecorded(ProvisioningRecord),
}

/// What the compensation pass did after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    /// Nothing had been done that needed undoing.
    None,
    /// The claim was dropped; the lab will be selected again.
    ClaimReleased,
    /// Applied infrastructure was destroyed (and any claim dropped).
    RolledBack,
    /// The lab can never be provisioned as written and is closed out.
    Rejected,
    /// Infrastructure may still exist; the lab is flagged `orphaned`.
    Orphaned {
        instance_id: Option<String>,
        reason: String,
    },
    /// Infrastructure may still exist and flagging it in the store failed too.
    Unrecorded { reason: String },
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::None => f.write_str("none"),
            Compensation::ClaimReleased => f.write_str("claim released"),
            Compensation::RolledBack => f.write_str("rolled back"),
            Compensation::Rejected => f.write_str("lab rejected"),
            Compensation::Orphaned { instance_id, reason } => match instance_id {
                Some(id) => write!(f, "orphaned instance {id} flagged ({reason})"),
                None => write!(f, "possible orphaned resources flagged ({reason})"),
            },
            Compensation::Unrecorded { reason } => {
                write!(f, "possible orphaned resources NOT recorded ({reason})")
            }
        }
    }
}

/// A run that ended in `DONE-FAILED`.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct RunFailure {
    pub stage: Stage,
    pub lab_id: Option<Uuid>,
    #[source]
    pub error: ProvisionError,
    pub compensation: Compensation,
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

enum Undo {
    ReleaseClaim(Uuid),
    Deprovision(PathBuf),
    /// The working directory tracked resources before this run started.
    KeepExisting(PathBuf),
}

/// Undo log for one run.
struct Saga<'a> {
    store: &'a dyn LabStore,
    provisioner: &'a dyn Provisioner,
    opts: &'a RunOptions,
    lab_id: Uuid,
    undo: Vec<Undo>,
    instance_id: Option<String>,
}

impl<'a> Saga<'a> {
    fn new(
        store: &'a dyn LabStore,
        provisioner: &'a dyn Provisioner,
        opts: &'a RunOptions,
        lab_id: Uuid,
    ) -> Self {
        Saga {
            store,
            provisioner,
            opts,
            lab_id,
            undo: Vec::new(),
            instance_id: None,
        }
    }

    fn register(&mut self, undo: Undo) {
        self.undo.push(undo);
    }

    /// Replay undo actions in reverse. Stops at the first resource that cannot
    /// be destroyed and flags the lab instead of releasing it.
    fn compensate(mut self) -> Compensation {
        let mut rolled_back = false;
        let mut released = false;

        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Deprovision(workdir) => {
                    if !self.opts.rollback {
                        return self.flag_orphan("rollback disabled".to_string());
                    }
                    warn!(workdir = %workdir.display(), "destroying partially provisioned lab");
                    match self.provisioner.destroy(&workdir, self.opts.timeout) {
                        Ok(_) => rolled_back = true,
                        Err(e) => {
                            error!(error = %e, "rollback failed");
                            return self.flag_orphan(format!("destroy failed: {e}"));
                        }
                    }
                }
                Undo::KeepExisting(workdir) => {
                    warn!(workdir = %workdir.display(), "state predates this run, not destroying");
                    return self.flag_orphan("working directory held state before this run".to_string());
                }
                Undo::ReleaseClaim(lab_id) => match self.store.release_claim(lab_id) {
                    Ok(()) => released = true,
                    Err(e) => warn!(%lab_id, error = %e, "failed to release claim"),
                },
            }
        }

        if rolled_back {
            Compensation::RolledBack
        } else if released {
            Compensation::ClaimReleased
        } else {
            Compensation::None
        }
    }

    /// Close out a claimed lab that can never succeed so later runs move on
    /// to other labs. Falls back to the normal undo pass if that write fails.
    fn reject(self) -> Compensation {
        let claimed = self.undo.iter().any(|u| matches!(u, Undo::ReleaseClaim(_)));
        if !claimed {
            return self.compensate();
        }
        match self.store.mark_rejected(self.lab_id) {
            Ok(()) => {
                warn!(lab_id = %self.lab_id, "lab rejected");
                Compensation::Rejected
            }
            Err(e) => {
                warn!(lab_id = %self.lab_id, error = %e, "failed to reject lab");
                self.compensate()
            }
        }
    }

    fn flag_orphan(&self, reason: String) -> Compensation {
        let instance_id = self.instance_id.clone();
        match self.store.mark_orphaned(self.lab_id, instance_id.as_deref()) {
            Ok(()) => {
                warn!(lab_id = %self.lab_id, ?instance_id, %reason, "lab flagged as orphaned");
                Compensation::Orphaned { instance_id, reason }
            }
            Err(e) => {
                error!(lab_id = %self.lab_id, ?instance_id, error = %e,
                    "failed to flag orphaned lab; infrastructure may exist without a record");
                Compensation::Unrecorded {
                    reason: format!("{reason}; {e}"),
                }
            }
        }
    }
}

/// Pick the next lab according to `mode`.
///
/// `Latest` fails with `NotFound` on an empty table; `Unprovisioned` returns
/// `None` when nothing is eligible.
pub fn select_lab(store: &dyn LabStore, mode: SelectionMode) -> ProvisionResult<Option<LabRequest>> {
    match mode {
        SelectionMode::Latest => store.latest().map(Some),
        SelectionMode::Unprovisioned => {
            store.ensure_schema()?;
            store.claim_next()
        }
    }
}

/// Execute one provisioning run.
pub fn run_once(
    store: &dyn LabStore,
    provisioner: &dyn Provisioner,
    catalog: &ImageCatalog,
    opts: &RunOptions,
) -> Result<RunOutcome, RunFailure> {
    let span = info_span!("run", mode = opts.mode.as_str());
    let _guard = span.enter();

    info!(stage = %Stage::Selecting, "selecting lab request");
    let lab = select_lab(store, opts.mode).map_err(|error| RunFailure {
        stage: Stage::Selecting,
        lab_id: None,
        error,
        compensation: Compensation::None,
    })?;
    let Some(lab) = lab else {
        info!("no unprovisioned lab requests");
        return Ok(RunOutcome::NothingToDo);
    };

    let lab_span = info_span!("lab", lab_id = %lab.lab_id);
    let _lab_guard = lab_span.enter();

    if opts.mode == SelectionMode::Latest {
        let existing = store.find_record(lab.lab_id).map_err(|error| RunFailure {
            stage: Stage::Selecting,
            lab_id: Some(lab.lab_id),
            error,
            compensation: Compensation::None,
        })?;
        if let Some(record) = existing {
            info!(status = %record.status, instance_id = ?record.instance_id, "lab already has a record");
            return Ok(RunOutcome::AlreadyRecorded(record));
        }
    }

    let mut saga = Saga::new(store, provisioner, opts, lab.lab_id);
    if opts.mode == SelectionMode::Unprovisioned {
        saga.register(Undo::ReleaseClaim(lab.lab_id));
    }

    match provision(&lab, catalog, opts, &mut saga) {
        Ok(done) => {
            info!(instance_id = %done.instance_id, "lab provisioned");
            Ok(RunOutcome::Provisioned(done))
        }
        Err((stage, error)) => {
            error!(%stage, error = %error, "run failed");
            let compensation = match error {
                ProvisionError::UnsupportedOs(_) => saga.reject(),
                _ => saga.compensate(),
            };
            Err(RunFailure {
                stage,
                lab_id: Some(lab.lab_id),
                error,
                compensation,
            })
        }
    }
}

fn provision(
    lab: &LabRequest,
    catalog: &ImageCatalog,
    opts: &RunOptions,
    saga: &mut Saga<'_>,
) -> Result<ProvisionedLab, (Stage, ProvisionError)> {
    let provisioner = saga.provisioner;
    let store = saga.store;

    info!(stage = %Stage::ResolvingImage, os = %lab.os);
    let image_id = catalog
        .resolve(&lab.os)
        .map_err(|e| (Stage::ResolvingImage, e))?
        .to_string();

    info!(stage = %Stage::Rendering, %image_id);
    let document = write_document(
        &opts.workspace,
        &opts.document,
        &DocumentInputs::from_lab(lab, &image_id),
    )
    .map_err(|e| (Stage::Rendering, e))?;

    info!(stage = %Stage::Provisioning, workdir = %document.workdir.display());
    let pre_existing = provisioner.has_state(&document.workdir);
    provisioner
        .init(&document.workdir, opts.timeout)
        .map_err(|e| (Stage::Provisioning, e))?;
    if pre_existing {
        saga.register(Undo::KeepExisting(document.workdir.clone()));
    } else {
        saga.register(Undo::Deprovision(document.workdir.clone()));
    }
    provisioner
        .apply(&document.workdir, opts.timeout)
        .map_err(|e| (Stage::Provisioning, e))?;

    info!(stage = %Stage::Extracting);
    let state = provisioner
        .show_state(&document.workdir, opts.timeout)
        .map_err(|e| (Stage::Extracting, e))?;
    let instance_id = extract_instance_id(&state, &opts.document.resource_type, &document.resource_name)
        .map_err(|e| (Stage::Extracting, e))?;
    saga.instance_id = Some(instance_id.clone());

    info!(stage = %Stage::Recording, %instance_id);
    store
        .record_instance(lab.lab_id, &instance_id)
        .map_err(|e| (Stage::Recording, e))?;

    Ok(ProvisionedLab {
        lab: lab.clone(),
        image_id,
        instance_id,
        document,
    })
}
