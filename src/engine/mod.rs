//! Engine module: runs the provisioning pipeline against a store and a tool.
//!
//! # Boundaries
//!
//! - `LabStore` (`crate::store`) owns lab requests and provisioning records.
//! - `Provisioner` (`crate::tool`) owns the external infrastructure tool.
//! - `workflow` composes both with the image catalog and the renderer, and is
//!   the only place that decides what to undo when a run fails.

pub mod workflow;

// Re-export key types for convenience
pub use workflow::{
    Compensation, ProvisionedLab, RunFailure, RunOptions, RunOutcome, Stage, run_once, select_lab,
};
