//! Terraform provisioner implementation.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{ProvisionError, ProvisionResult, ToolStep, tail};

use super::traits::{Provisioner, ToolOutput};

/// Local state file written by `apply` when no remote backend is configured.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Bytes of tool output kept in error messages.
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Configuration for the Terraform provisioner.
#[derive(Debug, Clone)]
pub struct TerraformConfig {
    /// Path to the terraform binary
    pub binary: PathBuf,
    /// Extra arguments appended to `apply` and `destroy`; `init` and
    /// `show -json` accept a different flag set and never get them
    pub extra_args: Vec<String>,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        TerraformConfig {
            binary: PathBuf::from("terraform"),
            extra_args: Vec::new(),
        }
    }
}

impl TerraformConfig {
    /// Create a new config with the given terraform path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        TerraformConfig {
            binary: binary.into(),
            ..Default::default()
        }
    }

    /// Add extra arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

/// Shells out to the `terraform` CLI.
///
/// stdout and stderr of every step are written to `<step>.stdout.log` and
/// `<step>.stderr.log` in the working directory, then read back. Files rather
/// than pipes keep a chatty `apply` from blocking on a full pipe while we poll
/// for the timeout.
pub struct TerraformProvisioner {
    config: TerraformConfig,
}

impl TerraformProvisioner {
    pub fn new(config: TerraformConfig) -> Self {
        TerraformProvisioner { config }
    }

    /// Create a provisioner with just the binary path.
    pub fn from_path(binary: impl Into<PathBuf>) -> Self {
        Self::new(TerraformConfig::new(binary))
    }

    pub fn config(&self) -> &TerraformConfig {
        &self.config
    }

    fn command(&self, step: ToolStep, workdir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.current_dir(workdir).args(args);
        if matches!(step, ToolStep::Apply | ToolStep::Destroy) {
            cmd.args(&self.config.extra_args);
        }
        cmd
    }

    /// Run one terraform step, failing on spawn errors, timeouts and non-zero exits.
    fn run_step(
        &self,
        step: ToolStep,
        workdir: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> ProvisionResult<ToolOutput> {
        let stdout_path = workdir.join(format!("{step}.stdout.log"));
        let stderr_path = workdir.join(format!("{step}.stderr.log"));

        let mut cmd = self.command(step, workdir, args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(File::create(&stdout_path)?))
            .stderr(Stdio::from(File::create(&stderr_path)?));

        debug!(%step, binary = %self.config.binary.display(), ?args, "running terraform");
        let start = Instant::now();
        let result = run_with_timeout(cmd, timeout);
        let elapsed_ms = start.elapsed().as_millis();

        let stdout = std::fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();

        let status = match result {
            Ok(status) => status,
            Err(reason) => {
                return Err(ProvisionError::ProvisioningFailed {
                    step,
                    status: reason,
                    output: tail(&format!("{stdout}{stderr}"), OUTPUT_TAIL_BYTES),
                });
            }
        };

        if !status.success() {
            let combined = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(ProvisionError::ProvisioningFailed {
                step,
                status: status.to_string(),
                output: tail(&combined, OUTPUT_TAIL_BYTES),
            });
        }

        debug!(%step, elapsed_ms, "terraform step finished");
        Ok(ToolOutput {
            status: status.to_string(),
            stdout,
            stderr,
            elapsed_ms,
        })
    }

    /// Detect terraform version.
    fn detect_version(&self) -> Option<String> {
        Command::new(&self.config.binary)
            .arg("version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|s| parse_terraform_version(&s))
    }
}

/// Wait for the child, killing it once `timeout` elapses (zero means no limit).
///
/// The error string describes why no exit status is available.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ExitStatus, String> {
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;

    loop {
        if let Some(status) = child.try_wait().map_err(|e| e.to_string())? {
            return Ok(status);
        }

        if !timeout.is_zero() && start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("timed out after {}s", timeout.as_secs_f64()));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

/// True if a local state file lists at least one resource.
///
/// A state left behind by `destroy` keeps the file but empties `resources`.
pub fn state_has_resources(state: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(state)
        .ok()
        .and_then(|v| v.get("resources").and_then(|r| r.as_array()).map(|r| !r.is_empty()))
        .unwrap_or(false)
}

/// Parse the first line of `terraform version`.
///
/// Expected format: "Terraform v1.9.5" followed by platform/provider lines.
pub fn parse_terraform_version(output: &str) -> Option<String> {
    let first = output.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let version = first.strip_prefix("Terraform ").unwrap_or(first);
    Some(version.trim_start_matches('v').to_string())
}

impl Provisioner for TerraformProvisioner {
    fn name(&self) -> &str {
        "terraform"
    }

    fn version(&self) -> Option<String> {
        self.detect_version()
    }

    fn has_state(&self, workdir: &Path) -> bool {
        std::fs::read_to_string(workdir.join(STATE_FILE))
            .map(|s| state_has_resources(&s))
            .unwrap_or(false)
    }

    fn init(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.run_step(ToolStep::Init, workdir, &["init", "-input=false", "-no-color"], timeout)
    }

    fn apply(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.run_step(
            ToolStep::Apply,
            workdir,
            &["apply", "-auto-approve", "-input=false", "-no-color"],
            timeout,
        )
    }

    fn show_state(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<String> {
        let output = self.run_step(ToolStep::Show, workdir, &["show", "-json", "-no-color"], timeout)?;
        Ok(output.stdout)
    }

    fn destroy(&self, workdir: &Path, timeout: Duration) -> ProvisionResult<ToolOutput> {
        self.run_step(
            ToolStep::Destroy,
            workdir,
            &["destroy", "-auto-approve", "-input=false", "-no-color"],
            timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TerraformConfig::default();
        assert_eq!(config.binary, PathBuf::from("terraform"));
        assert!(config.extra_args.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = TerraformConfig::new("/usr/local/bin/terraform")
            .with_args(vec!["-lock-timeout=60s".into()]);
        assert_eq!(config.binary, PathBuf::from("/usr/local/bin/terraform"));
        assert_eq!(config.extra_args, vec!["-lock-timeout=60s"]);
    }

    #[test]
    fn test_parse_terraform_version() {
        assert_eq!(
            parse_terraform_version("Terraform v1.9.5\non linux_amd64\n"),
            Some("1.9.5".to_string())
        );
        assert_eq!(parse_terraform_version("1.6.0"), Some("1.6.0".to_string()));
        assert_eq!(parse_terraform_version(""), None);
    }

    #[test]
    fn test_state_has_resources() {
        assert!(state_has_resources(
            r#"{"version": 4, "resources": [{"type": "aws_instance", "name": "x"}]}"#
        ));
        assert!(!state_has_resources(r#"{"version": 4, "resources": []}"#));
        assert!(!state_has_resources("garbage"));
    }

    #[test]
    fn test_has_state_reads_local_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let tf = TerraformProvisioner::from_path("terraform");
        assert!(!tf.has_state(dir.path()));
        std::fs::write(dir.path().join(STATE_FILE), r#"{"resources": [{}]}"#).unwrap();
        assert!(tf.has_state(dir.path()));
    }

    #[test]
    fn test_missing_binary_is_provisioning_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tf = TerraformProvisioner::from_path(dir.path().join("no-such-terraform"));
        match tf.init(dir.path(), Duration::ZERO) {
            Err(ProvisionError::ProvisioningFailed { step, status, .. }) => {
                assert_eq!(step, ToolStep::Init);
                assert!(status.starts_with("failed to spawn"));
            }
            other => panic!("expected ProvisioningFailed, got {other:?}"),
        }
    }
}
