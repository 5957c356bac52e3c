//! Provisioner trait and output types for the external provisioning tool.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProvisionResult;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit status as reported by the OS (e.g. "exit status: 0")
    pub status: String,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u128,
}

/// Operations the workflow needs from an infrastructure-as-code tool.
///
/// Every call is scoped to a working directory holding the generated document
/// and takes a timeout; `Duration::ZERO` waits indefinitely. A non-zero exit
/// of the tool is reported as `ProvisionError::ProvisioningFailed`.
pub trait Provisioner: Send + Sync {
    /// Returns the tool name (e.g., "terraform", "mock").
    fn name(&self) -> &str;

    /// Returns the tool version, if available.
    fn version(&self) -> Option<String>;

    /// Whether the working directory already tracks infrastructure. A run
    /// must not tear down resources it did not create.
    fn has_state(&self, workdir: &Path) -> bool;

    /// Prepare the working directory (providers, backend).
    fn init(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput>;

    /// Create or update the infrastructure described in the working directory,
    /// without interactive confirmation.
    fn apply(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput>;

    /// Dump the current state as machine-readable JSON.
    fn show_state(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<String>;

    /// Tear down everything the working directory manages. Used to compensate
    /// a failed run.
    fn destroy(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput>;
}
