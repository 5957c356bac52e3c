//! CLI command handler for `render`: write a document without provisioning.

use std::path::Path;

use uuid::Uuid;

use crate::ProvisionResult;
use crate::config::AppConfig;
use crate::core::LabRequest;
use crate::render::{DocumentInputs, RenderedDocument, write_document};

/// Render the document for the given lab fields into `workspace`.
///
/// The OS goes through the same catalog lookup as a real run, so an
/// unsupported OS fails here too. The database and Terraform are not touched.
pub fn run(config: &AppConfig, workspace: &Path, lab: &LabRequest) -> ProvisionResult<RenderedDocument> {
    let catalog = config.image_catalog();
    let image_id = catalog.resolve(&lab.os)?;
    let rendered = write_document(workspace, &config.document, &DocumentInputs::from_lab(lab, image_id))?;

    println!("{}", rendered.path.display());
    println!("sha256: {}", rendered.sha256);
    Ok(rendered)
}

/// Lab request for a dry run; a fresh id is generated when none is given.
pub fn lab_from_args(
    lab_id: Option<Uuid>,
    instance_type: String,
    storage_size: u32,
    os: String,
    title: String,
) -> LabRequest {
    LabRequest::new(lab_id.unwrap_or_else(Uuid::new_v4), instance_type, storage_size, os, title)
}
