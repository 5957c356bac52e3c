//! Operating system to machine image lookup.

use std::collections::BTreeMap;

use crate::{ProvisionError, ProvisionResult};

/// Default AWS us-east-1 images for the supported operating systems.
pub const DEFAULT_IMAGES: [(&str, &str); 4] = [
    ("linux", "ami-12345678abcd12345"),
    ("windows", "ami-05b4ded3ceb71e470"),
    ("ubuntu", "ami-0dba2cb6798deb6d8"),
    ("redhat", "ami-08f3d892de259504d"),
];

/// Immutable OS -> image id table, built once at startup and passed to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    images: BTreeMap<String, String>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_IMAGES)
    }
}

impl ImageCatalog {
    /// Build a catalog from `(os, image_id)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        ImageCatalog {
            images: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Resolve an OS key to its image id. Keys match exactly and case-sensitively.
    pub fn resolve(&self, os: &str) -> ProvisionResult<&str> {
        self.images
            .get(os)
            .map(String::as_str)
            .ok_or_else(|| ProvisionError::UnsupportedOs(os.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.images.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
