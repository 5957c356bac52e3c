//! Lab request and provisioning record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A requested compute environment, as stored in `createlab`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRequest {
    pub lab_id: Uuid,
    pub instance_type: String,
    pub storage_size: u32,
    /// Raw OS key; validated against the image catalog, not here.
    pub os: String,
    pub title: String,
}

impl LabRequest {
    pub fn new(
        lab_id: Uuid,
        instance_type: impl Into<String>,
        storage_size: u32,
        os: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        LabRequest {
            lab_id,
            instance_type: instance_type.into(),
            storage_size,
            os: os.into(),
            title: title.into(),
        }
    }
}

/// Lifecycle of a row in `instances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Selected by a run that has not finished yet.
    Claimed,
    Provisioned,
    /// A resource may exist that was neither recorded nor rolled back.
    Orphaned,
    /// The request cannot be provisioned as written (e.g. unknown OS).
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Claimed => "claimed",
            RecordStatus::Provisioned => "provisioned",
            RecordStatus::Orphaned => "orphaned",
            RecordStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claimed" => Ok(RecordStatus::Claimed),
            "provisioned" => Ok(RecordStatus::Provisioned),
            "orphaned" => Ok(RecordStatus::Orphaned),
            "rejected" => Ok(RecordStatus::Rejected),
            other => Err(format!("unknown record status '{other}'")),
        }
    }
}

/// A row of the `instances` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub id: i32,
    pub lab_id: Uuid,
    pub instance_id: Option<String>,
    pub status: RecordStatus,
}

/// How the record selector picks the next lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Newest lab without a provisioning record, claimed atomically.
    #[default]
    Unprovisioned,
    /// Newest lab regardless of existing records (legacy behavior).
    Latest,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::Unprovisioned => "unprovisioned",
            SelectionMode::Latest => "latest",
        }
    }
}
