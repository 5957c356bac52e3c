pub mod config;
pub mod core;
pub mod engine;
pub mod history_cmd;
pub mod images_cmd;
pub mod provision_cmd;
pub mod records_cmd;
pub mod render;
pub mod render_cmd;
pub mod storage;
pub mod store;
pub mod tool;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terraform sub-invocation that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStep {
    Init,
    Apply,
    Show,
    Destroy,
}

impl ToolStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStep::Init => "init",
            ToolStep::Apply => "apply",
            ToolStep::Show => "show",
            ToolStep::Destroy => "destroy",
        }
    }
}

impl fmt::Display for ToolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no lab request found")]
    NotFound,
    #[error("unsupported OS: {0}")]
    UnsupportedOs(String),
    #[error("terraform {step} failed ({status}): {output}")]
    ProvisioningFailed {
        step: ToolStep,
        status: String,
        output: String,
    },
    #[error("no instance id in terraform state: {0}")]
    ResultNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::NotFound => "not_found",
            ProvisionError::UnsupportedOs(_) => "unsupported_os",
            ProvisionError::ProvisioningFailed { .. } => "provisioning_failed",
            ProvisionError::ResultNotFound(_) => "result_not_found",
            ProvisionError::Storage(_) => "storage_error",
            ProvisionError::Config(_) => "config_error",
            ProvisionError::Io(_) => "io_error",
        }
    }

    /// Process exit status used by the binary for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::NotFound => 2,
            ProvisionError::UnsupportedOs(_) => 3,
            ProvisionError::ProvisioningFailed { .. } => 4,
            ProvisionError::ResultNotFound(_) => 5,
            ProvisionError::Storage(_) => 6,
            ProvisionError::Config(_) => 7,
            ProvisionError::Io(_) => 1,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Keep at most `max` trailing bytes of tool output, on a char boundary.
pub fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha256::digest;
    digest(bytes)
}
