//! In-memory store for testing.

use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::core::{LabRequest, ProvisioningRecord, RecordStatus};
use crate::{ProvisionError, ProvisionResult};

use super::traits::LabStore;

#[derive(Debug, Default)]
struct MemoryState {
    /// Creation order; the last entry is the newest.
    labs: Vec<LabRequest>,
    records: Vec<ProvisioningRecord>,
    next_id: i32,
    schema_ready: bool,
    schema_creations: u32,
    fail_writes: bool,
}

impl MemoryState {
    fn require_schema(&self) -> ProvisionResult<()> {
        if self.schema_ready {
            Ok(())
        } else {
            Err(ProvisionError::Storage(
                "relation \"instances\" does not exist".into(),
            ))
        }
    }

    fn check_writable(&self) -> ProvisionResult<()> {
        if self.fail_writes {
            return Err(ProvisionError::Storage("mock write failure".into()));
        }
        Ok(())
    }

    fn record_mut(&mut self, lab_id: Uuid) -> Option<&mut ProvisioningRecord> {
        self.records.iter_mut().find(|r| r.lab_id == lab_id)
    }

    /// Turn a claim (or no row at all) into a terminal `status` row.
    fn close_claim(
        &mut self,
        lab_id: Uuid,
        instance_id: Option<&str>,
        status: RecordStatus,
    ) -> ProvisionResult<()> {
        self.require_schema()?;
        self.check_writable()?;
        match self.record_mut(lab_id) {
            Some(record) if record.status == RecordStatus::Claimed => {
                if let Some(id) = instance_id {
                    record.instance_id = Some(id.to_string());
                }
                record.status = status;
                Ok(())
            }
            Some(record) => Err(ProvisionError::Storage(format!(
                "lab {lab_id} already has a {} record",
                record.status
            ))),
            None => {
                self.insert(lab_id, instance_id.map(str::to_string), status);
                Ok(())
            }
        }
    }

    fn insert(&mut self, lab_id: Uuid, instance_id: Option<String>, status: RecordStatus) {
        self.next_id += 1;
        self.records.push(ProvisioningRecord {
            id: self.next_id,
            lab_id,
            instance_id,
            status,
        });
    }
}

/// `LabStore` backed by a mutex-guarded vector.
///
/// Mirrors the Postgres semantics: one record per lab, claims are atomic, and
/// the `instances` table must be created before it is queried.
#[derive(Debug, Default)]
pub struct MemoryLabStore {
    state: Mutex<MemoryState>,
}

impl MemoryLabStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lab request; later additions are considered newer.
    pub fn with_lab(self, lab: LabRequest) -> Self {
        self.add_lab(lab);
        self
    }

    pub fn add_lab(&self, lab: LabRequest) {
        if let Ok(mut state) = self.state.lock() {
            state.labs.push(lab);
        }
    }

    /// Make every write fail with a storage error.
    pub fn failing_writes(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = true;
        }
        self
    }

    /// Number of times the `instances` table was actually created.
    pub fn schema_creations(&self) -> u32 {
        self.state.lock().map(|s| s.schema_creations).unwrap_or(0)
    }

    pub fn record_for(&self, lab_id: Uuid) -> Option<ProvisioningRecord> {
        self.state
            .lock()
            .ok()?
            .records
            .iter()
            .find(|r| r.lab_id == lab_id)
            .cloned()
    }

    fn lock(&self) -> ProvisionResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ProvisionError::Storage("memory store poisoned".into()))
    }
}

impl LabStore for MemoryLabStore {
    fn ensure_schema(&self) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        if !state.schema_ready {
            state.schema_ready = true;
            state.schema_creations += 1;
        }
        Ok(())
    }

    fn latest(&self) -> ProvisionResult<LabRequest> {
        self.lock()?.labs.last().cloned().ok_or(ProvisionError::NotFound)
    }

    fn claim_next(&self) -> ProvisionResult<Option<LabRequest>> {
        let mut state = self.lock()?;
        state.require_schema()?;
        let candidate = state
            .labs
            .iter()
            .rev()
            .find(|lab| !state.records.iter().any(|r| r.lab_id == lab.lab_id))
            .cloned();
        let Some(lab) = candidate else {
            return Ok(None);
        };
        state.check_writable()?;
        state.insert(lab.lab_id, None, RecordStatus::Claimed);
        Ok(Some(lab))
    }

    fn record_instance(&self, lab_id: Uuid, instance_id: &str) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        if !state.schema_ready {
            state.schema_ready = true;
            state.schema_creations += 1;
        }
        state.check_writable()?;
        match state.record_mut(lab_id) {
            Some(record) if record.status == RecordStatus::Claimed => {
                record.instance_id = Some(instance_id.to_string());
                record.status = RecordStatus::Provisioned;
                Ok(())
            }
            Some(record) => Err(ProvisionError::Storage(format!(
                "lab {lab_id} already has a {} record",
                record.status
            ))),
            None => {
                state.insert(lab_id, Some(instance_id.to_string()), RecordStatus::Provisioned);
                Ok(())
            }
        }
    }

    fn release_claim(&self, lab_id: Uuid) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        state.require_schema()?;
        state.check_writable()?;
        state
            .records
            .retain(|r| !(r.lab_id == lab_id && r.status == RecordStatus::Claimed));
        Ok(())
    }

    fn mark_orphaned(&self, lab_id: Uuid, instance_id: Option<&str>) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        state.close_claim(lab_id, instance_id, RecordStatus::Orphaned)
    }

    fn mark_rejected(&self, lab_id: Uuid) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        state.close_claim(lab_id, None, RecordStatus::Rejected)
    }

    fn find_record(&self, lab_id: Uuid) -> ProvisionResult<Option<ProvisioningRecord>> {
        let state = self.lock()?;
        Ok(state.records.iter().find(|r| r.lab_id == lab_id).cloned())
    }

    fn records(&self) -> ProvisionResult<Vec<ProvisioningRecord>> {
        Ok(self.lock()?.records.clone())
    }
}
