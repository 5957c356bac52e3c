//! Extraction of the provider-assigned instance id from `terraform show -json`.

use serde::Deserialize;

use crate::{ProvisionError, ProvisionResult};

#[derive(Debug, Deserialize)]
struct ShowDocument {
    #[serde(default)]
    values: Option<StateValues>,
}

#[derive(Debug, Deserialize)]
struct StateValues {
    root_module: Module,
}

#[derive(Debug, Deserialize)]
struct Module {
    #[serde(default)]
    resources: Vec<Resource>,
    #[serde(default)]
    child_modules: Vec<Module>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    values: serde_json::Value,
}

fn collect<'a>(module: &'a Module, resource_type: &str, out: &mut Vec<&'a Resource>) {
    out.extend(module.resources.iter().filter(|r| r.kind == resource_type));
    for child in &module.child_modules {
        collect(child, resource_type, out);
    }
}

/// Find the id of the compute instance in a state dump.
///
/// `resource_name` selects among several instances of `resource_type`; with a
/// single instance in the state, that one is returned regardless of its name.
pub fn extract_instance_id(
    state_json: &str,
    resource_type: &str,
    resource_name: &str,
) -> ProvisionResult<String> {
    let doc: ShowDocument = serde_json::from_str(state_json).map_err(|e| {
        ProvisionError::ResultNotFound(format!("failed to parse terraform state: {e}"))
    })?;

    let Some(values) = doc.values else {
        return Err(ProvisionError::ResultNotFound("state has no resources".into()));
    };

    let mut matches = Vec::new();
    collect(&values.root_module, resource_type, &mut matches);

    let resource = match matches.as_slice() {
        [] => {
            return Err(ProvisionError::ResultNotFound(format!(
                "no {resource_type} resource in state"
            )));
        }
        [only] => *only,
        many => many
            .iter()
            .copied()
            .find(|r| r.name == resource_name)
            .ok_or_else(|| {
                ProvisionError::ResultNotFound(format!(
                    "{} {resource_type} resources in state, none named {resource_name}",
                    many.len()
                ))
            })?,
    };

    resource
        .values
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProvisionError::ResultNotFound(format!(
                "{resource_type}.{} has no id",
                resource.name
            ))
        })
}
