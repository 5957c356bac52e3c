//! Configuration: TOML file, `.env` and environment overrides.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables (`DATABASE_URL`, `LAB_PROVISION_TERRAFORM`,
//! `LAB_PROVISION_WORKSPACE`), then command-line flags applied by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::ImageCatalog;
use crate::render::DocumentSettings;
use crate::tool::TerraformConfig;
use crate::{ProvisionError, ProvisionResult};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "lab-provision.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; when set the components below are ignored.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    /// Per-connection `statement_timeout`; unset or 0 waits indefinitely.
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            name: "golab".to_string(),
            user: "postgres".to_string(),
            password: None,
            statement_timeout_ms: None,
        }
    }
}

/// Quote a value for a libpq keyword/value connection string.
fn conninfo_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl DatabaseConfig {
    /// Connection string accepted by libpq: the URL if configured, otherwise
    /// a keyword/value string built from the components.
    pub fn connection_string(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        let mut parts = vec![
            format!("host={}", conninfo_value(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", conninfo_value(&self.name)),
            format!("user={}", conninfo_value(&self.user)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", conninfo_value(password)));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TerraformSettings {
    pub binary: PathBuf,
    /// Shell-style string appended to `terraform apply` and `destroy`
    pub extra_args: String,
    /// Per-command timeout; 0 waits indefinitely
    pub timeout_secs: u64,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        TerraformSettings {
            binary: PathBuf::from("terraform"),
            extra_args: String::new(),
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory under which `terraform_<lab_id>` working directories live
    pub workspace: PathBuf,
    pub database: DatabaseConfig,
    pub terraform: TerraformSettings,
    pub document: DocumentSettings,
    /// Replaces the built-in OS -> image table when present
    pub images: Option<BTreeMap<String, String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            workspace: PathBuf::from("."),
            database: DatabaseConfig::default(),
            terraform: TerraformSettings::default(),
            document: DocumentSettings::default(),
            images: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> ProvisionResult<Self> {
        toml::from_str(s).map_err(|e| ProvisionError::Config(e.to_string()))
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(bin) = lookup("LAB_PROVISION_TERRAFORM").filter(|v| !v.is_empty()) {
            self.terraform.binary = PathBuf::from(bin);
        }
        if let Some(dir) = lookup("LAB_PROVISION_WORKSPACE").filter(|v| !v.is_empty()) {
            self.workspace = PathBuf::from(dir);
        }
    }

    pub fn image_catalog(&self) -> ImageCatalog {
        match &self.images {
            Some(images) => ImageCatalog::from_pairs(images.clone()),
            None => ImageCatalog::default(),
        }
    }

    pub fn terraform_config(&self) -> ProvisionResult<TerraformConfig> {
        let extra_args = shlex::split(&self.terraform.extra_args).ok_or_else(|| {
            ProvisionError::Config(format!(
                "terraform.extra_args is not valid shell syntax: {}",
                self.terraform.extra_args
            ))
        })?;
        Ok(TerraformConfig::new(&self.terraform.binary).with_args(extra_args))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.terraform.timeout_secs)
    }
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, `lab-provision.toml` in the
/// current directory is used if present. `.env` is loaded before environment
/// overrides are applied.
pub fn load_config(path: Option<&Path>) -> ProvisionResult<AppConfig> {
    let _ = dotenvy::dotenv();

    let mut config = match path {
        Some(p) => {
            let s = std::fs::read_to_string(p).map_err(|e| {
                ProvisionError::Config(format!("failed to read {}: {e}", p.display()))
            })?;
            AppConfig::from_toml_str(&s)?
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            let s = std::fs::read_to_string(DEFAULT_CONFIG_FILE)?;
            AppConfig::from_toml_str(&s)?
        }
        None => AppConfig::default(),
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
