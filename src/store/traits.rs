//! Storage trait for lab requests and provisioning records.

use uuid::Uuid;

use crate::ProvisionResult;
use crate::core::{LabRequest, ProvisioningRecord};

/// Access to the `createlab` (read-only) and `instances` (owned) tables.
///
/// At most one `instances` row exists per lab. A lab with any row is never
/// returned by `claim_next`.
pub trait LabStore: Send + Sync {
    /// Create the `instances` table and its unique index if missing.
    /// Safe to call any number of times.
    fn ensure_schema(&self) -> ProvisionResult<()>;

    /// Newest lab request regardless of existing records.
    ///
    /// Fails with `ProvisionError::NotFound` when there are no lab requests.
    fn latest(&self) -> ProvisionResult<LabRequest>;

    /// Atomically pick the newest lab without a record and insert a `claimed`
    /// row for it. Returns `None` when every lab already has a record.
    fn claim_next(&self) -> ProvisionResult<Option<LabRequest>>;

    /// Store the instance id for a lab, promoting its claim if there is one.
    ///
    /// Fails with `ProvisionError::Storage` if the lab is already provisioned
    /// or orphaned.
    fn record_instance(&self, lab_id: Uuid, instance_id: &str) -> ProvisionResult<()>;

    /// Drop a `claimed` row so the lab becomes selectable again. No-op when
    /// the lab has no claim.
    fn release_claim(&self, lab_id: Uuid) -> ProvisionResult<()>;

    /// Flag a lab whose infrastructure may exist without a record.
    fn mark_orphaned(&self, lab_id: Uuid, instance_id: Option<&str>) -> ProvisionResult<()>;

    /// Close out a claimed lab that can never be provisioned as written, so
    /// it stops being selected. Fails with `ProvisionError::Storage` if the
    /// lab already has a non-claim record.
    fn mark_rejected(&self, lab_id: Uuid) -> ProvisionResult<()>;

    /// The record for one lab, if any. Read-only: a missing `instances`
    /// table yields `None`.
    fn find_record(&self, lab_id: Uuid) -> ProvisionResult<Option<ProvisioningRecord>>;

    /// All rows of `instances`, oldest first. Read-only: a missing
    /// `instances` table yields an empty list.
    fn records(&self) -> ProvisionResult<Vec<ProvisioningRecord>>;
}
