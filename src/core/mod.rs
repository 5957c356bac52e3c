//! Core types for lab-provision.
//!
//! Lab requests and provisioning records as stored in the database, the image
//! catalog, and the `RunReport` schema (v1) used for JSON and JSONL output.

pub mod images;
pub mod lab;
pub mod report;

// Re-export key types for convenience
pub use images::{DEFAULT_IMAGES, ImageCatalog};
pub use lab::{LabRequest, ProvisioningRecord, RecordStatus, SelectionMode};
pub use report::{FailureInfo, RunReport, RunStatus, SCHEMA_VERSION, ToolInfo};
