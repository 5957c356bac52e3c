//! Terraform document generation.
//!
//! Each lab gets its own working directory (`terraform_<lab_id>`) holding a
//! single `main.tf`. The resource declaration is named after the lab as well,
//! so runs for different labs never collide on either.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::LabRequest;
use crate::{ProvisionResult, sha256_hex};

/// File name of the generated document inside the working directory.
pub const DOCUMENT_FILE: &str = "main.tf";

/// Fixed parts of the generated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub provider: String,
    pub region: String,
    pub volume_type: String,
    /// Terraform resource type of the compute instance
    pub resource_type: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        DocumentSettings {
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            volume_type: "gp2".to_string(),
            resource_type: "aws_instance".to_string(),
        }
    }
}

/// Values substituted into the document for one lab.
#[derive(Debug, Clone)]
pub struct DocumentInputs<'a> {
    pub lab_id: Uuid,
    pub instance_type: &'a str,
    pub storage_size: u32,
    pub image_id: &'a str,
    pub title: &'a str,
}

impl<'a> DocumentInputs<'a> {
    pub fn from_lab(lab: &'a LabRequest, image_id: &'a str) -> Self {
        DocumentInputs {
            lab_id: lab.lab_id,
            instance_type: &lab.instance_type,
            storage_size: lab.storage_size,
            image_id,
            title: &lab.title,
        }
    }
}

/// A document written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub workdir: PathBuf,
    pub path: PathBuf,
    /// Name of the resource declaration, e.g. `instance_<lab>`
    pub resource_name: String,
    pub sha256: String,
}

/// Resource declaration name for a lab.
pub fn resource_name(lab_id: Uuid) -> String {
    format!("instance_{}", lab_id.simple())
}

/// Working directory for a lab under `workspace`.
pub fn lab_workdir(workspace: &Path, lab_id: Uuid) -> PathBuf {
    workspace.join(format!("terraform_{lab_id}"))
}

/// Escape a value for use inside an HCL quoted string.
pub fn hcl_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // template sequences
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render the Terraform document text.
pub fn render_document(settings: &DocumentSettings, inputs: &DocumentInputs<'_>) -> String {
    format!(
        r#"provider {provider} {{
  region = {region}
}}

resource {rtype} {rname} {{
  ami           = {ami}
  instance_type = {itype}

  root_block_device {{
    volume_size = {size}
    volume_type = {vtype}
  }}

  tags = {{
    Name = {name}
  }}
}}
"#,
        provider = hcl_string(&settings.provider),
        region = hcl_string(&settings.region),
        rtype = hcl_string(&settings.resource_type),
        rname = hcl_string(&resource_name(inputs.lab_id)),
        ami = hcl_string(inputs.image_id),
        itype = hcl_string(inputs.instance_type),
        size = inputs.storage_size,
        vtype = hcl_string(&settings.volume_type),
        name = hcl_string(inputs.title),
    )
}

/// Render the document and write it to `<workspace>/terraform_<lab_id>/main.tf`.
///
/// The directory is created if missing; an existing document is overwritten.
pub fn write_document(
    workspace: &Path,
    settings: &DocumentSettings,
    inputs: &DocumentInputs<'_>,
) -> ProvisionResult<RenderedDocument> {
    let workdir = lab_workdir(workspace, inputs.lab_id);
    std::fs::create_dir_all(&workdir)?;

    let text = render_document(settings, inputs);
    let path = workdir.join(DOCUMENT_FILE);
    std::fs::write(&path, text.as_bytes())?;
    debug!(path = %path.display(), "wrote terraform document");

    Ok(RenderedDocument {
        workdir,
        path,
        resource_name: resource_name(inputs.lab_id),
        sha256: sha256_hex(text.as_bytes()),
    })
}
