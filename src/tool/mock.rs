//! Mock provisioner for testing.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::{ProvisionError, ProvisionResult, ToolStep};

use super::traits::{Provisioner, ToolOutput};

/// Configuration for mock provisioner responses.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Name to report
    pub name: String,
    /// Version to report
    pub version: Option<String>,
    /// Instance id placed in the fake state dump
    pub instance_id: String,
    /// Resource type placed in the fake state dump
    pub resource_type: String,
    /// Raw state JSON to return instead of the generated one
    pub state_json: Option<String>,
    /// Steps that should fail with a non-zero exit
    pub failing_steps: Vec<ToolStep>,
    /// Report the working directory as already tracking resources
    pub existing_state: bool,
}

impl MockConfig {
    /// Create a new mock config with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        MockConfig {
            name: name.into(),
            version: Some("mock-1.0.0".to_string()),
            instance_id: "i-0abc123".to_string(),
            resource_type: "aws_instance".to_string(),
            state_json: None,
            failing_steps: Vec::new(),
            existing_state: false,
        }
    }

    /// Set the instance id reported after apply.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Return this exact text from `show_state`.
    pub fn with_state_json(mut self, json: impl Into<String>) -> Self {
        self.state_json = Some(json.into());
        self
    }

    /// Pretend every working directory already holds state.
    pub fn with_existing_state(mut self) -> Self {
        self.existing_state = true;
        self
    }

    /// Make the given step fail.
    pub fn fails_at(mut self, step: ToolStep) -> Self {
        self.failing_steps.push(step);
        self
    }
}

/// Mock provisioner for unit testing.
///
/// Records every call as `"<step> <workdir>"` and returns configured results
/// without running anything.
pub struct MockProvisioner {
    config: MockConfig,
    calls: Mutex<Vec<String>>,
}

impl MockProvisioner {
    pub fn new(config: MockConfig) -> Self {
        MockProvisioner {
            config,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock provisioner with default configuration.
    pub fn default_mock() -> Self {
        Self::new(MockConfig::new("mock"))
    }

    /// Steps invoked so far, in order.
    pub fn steps(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| c.split_whitespace().next().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full call log, `"<step> <workdir>"` per entry.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn call(&self, step: ToolStep, workdir: &Path) -> ProvisionResult<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{step} {}", workdir.display()));
        }
        if self.config.failing_steps.contains(&step) {
            return Err(ProvisionError::ProvisioningFailed {
                step,
                status: "exit status: 1".into(),
                output: format!("mock {step} failed"),
            });
        }
        Ok(ToolOutput {
            status: "exit status: 0".into(),
            ..Default::default()
        })
    }

    fn state_json(&self) -> String {
        if let Some(json) = &self.config.state_json {
            return json.clone();
        }
        serde_json::json!({
            "format_version": "1.0",
            "values": {
                "root_module": {
                    "resources": [{
                        "type": self.config.resource_type,
                        "name": "mock",
                        "values": { "id": self.config.instance_id }
                    }]
                }
            }
        })
        .to_string()
    }
}

impl Provisioner for MockProvisioner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> Option<String> {
        self.config.version.clone()
    }

    fn has_state(&self, _workdir: &Path) -> bool {
        self.config.existing_state
    }

    fn init(&self, workdir: &Path, _timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.call(ToolStep::Init, workdir)
    }

    fn apply(&self, workdir: &Path, _timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.call(ToolStep::Apply, workdir)
    }

    fn show_state(&self, workdir: &Path, _timeout: Duration) -> ProvisionResult<String> {
        self.call(ToolStep::Show, workdir)?;
        Ok(self.state_json())
    }

    fn destroy(&self, workdir: &Path, _timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.call(ToolStep::Destroy, workdir)
    }
}
