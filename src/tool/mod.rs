//! External provisioning tool abstraction.
//!
//! `Provisioner` is implemented by `TerraformProvisioner` (shells out to the
//! `terraform` CLI) and `MockProvisioner` (canned results for tests). The
//! `state` submodule parses `terraform show -json` output.

pub mod mock;
pub mod state;
pub mod terraform;
pub mod traits;

// Re-export key types
pub use mock::{MockConfig, MockProvisioner};
pub use state::extract_instance_id;
pub use terraform::{TerraformConfig, TerraformProvisioner};
pub use traits::{Provisioner, ToolOutput};
