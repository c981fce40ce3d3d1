//! `LoadTestPointer`, `LoadTestVersion`, `LoadTestManifest`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// logical name -> bucket key, e.g. `"locustfile.py" -> "configs/demo-loadtest/bundles/bndl_1/locustfile.py"`.
pub type BundleFiles = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadTestSummary {
    pub tasks: u32,
    pub endpoints: u32,
    pub has_host: bool,
}

/// The mutable `current.json` pointer — the only mutable load-test key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestPointer {
    pub project_id: String,
    #[serde(default = "artifact_type_default")]
    pub artifact_type: String,
    pub active_version: String,
    pub bundle_id: String,
    pub updated_at: u64,
    pub files: BundleFiles,
    pub summary: LoadTestSummary,
}

fn artifact_type_default() -> String {
    "loadtest_bundle".to_string()
}

impl LoadTestPointer {
    pub fn new(
        project_id: impl Into<String>,
        version: impl Into<String>,
        bundle_id: impl Into<String>,
        updated_at: u64,
        files: BundleFiles,
        summary: LoadTestSummary,
    ) -> Self {
        LoadTestPointer {
            project_id: project_id.into(),
            artifact_type: artifact_type_default(),
            active_version: version.into(),
            bundle_id: bundle_id.into(),
            updated_at,
            files,
            summary,
        }
    }
}

/// Validation outcome recorded alongside an immutable version snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadTestValidation {
    pub locustfile_present: bool,
    pub requirements_present: bool,
    pub user_data_present: bool,
    pub manifest_present: bool,
    pub host_defined: bool,
    #[serde(default)]
    pub placeholder_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadTestMetrics {
    pub tasks: u32,
    pub endpoints: u32,
}

/// Immutable snapshot written once per upload, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestVersion {
    pub project_id: String,
    pub version: String,
    pub bundle_id: String,
    pub created_at: u64,
    /// `name -> "sha256:<hex>"`.
    pub hashes: BTreeMap<String, String>,
    pub validation: LoadTestValidation,
    pub metrics: LoadTestMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestFileEntry {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

/// In-bundle `manifest.json`, generated fresh on every upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestManifest {
    pub bundle_id: String,
    pub project_id: String,
    pub generated_at: u64,
    pub files: Vec<ManifestFileEntry>,
    #[serde(default)]
    pub entrypoints: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
