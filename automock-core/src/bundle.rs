//! Load-test bundle manager: validate, fingerprint, upload, download,
//! roll back, and purge load-test bundles, keeping the active-pointer
//! invariant that every pointer's `bundle_id` references a bundle
//! directory that exists at pointer-write time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, IoContext, Result};
use crate::model::loadtest::{
    LoadTestManifest, LoadTestMetrics, LoadTestPointer, LoadTestSummary, LoadTestValidation,
    LoadTestVersion, ManifestFileEntry,
};
use crate::naming;
use crate::provider::Provider;
use crate::store::DeleteOutcome;
use crate::time::{now_unix_nanos, now_unix_seconds};

const REQUIRED_FILES: &[&str] = &["locustfile.py", "requirements.txt", "locust_endpoints.json"];
const OPTIONAL_FILES: &[&str] = &["user_data.yaml", "manifest.json"];
const MANIFEST_FILE: &str = "manifest.json";

/// A scanned bundle directory: logical filename -> raw bytes. Does not
/// include `manifest.json` — that file is always regenerated, never
/// carried through from the input directory.
#[derive(Debug, Clone, Default)]
pub struct BundleInput {
    pub files: BTreeMap<String, Vec<u8>>,
    /// Whether the input directory itself contained a `manifest.json`
    /// (feeds `LoadTestValidation::manifest_present`; the file's content
    /// is discarded either way).
    pub had_manifest: bool,
}

/// Scans `dir` for the bundle's required/optional files. Missing
/// required files are reported together, not one at a time.
pub async fn scan_bundle_dir(dir: &Path) -> Result<BundleInput> {
    let mut files = BTreeMap::new();
    let mut missing = Vec::new();
    for name in REQUIRED_FILES {
        let path = dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                files.insert(name.to_string(), bytes);
            }
            Err(_) => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::MissingBundleFile { names: missing });
    }

    let mut had_manifest = false;
    for name in OPTIONAL_FILES {
        let path = dir.join(name);
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if *name == MANIFEST_FILE {
                had_manifest = true;
            } else {
                files.insert(name.to_string(), bytes);
            }
        }
    }

    Ok(BundleInput { files, had_manifest })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Validates a scanned bundle. `host_defined` is true iff
/// `locustfile.py` matches a case-insensitive `host\s*=\s*['"].+?['"]`.
/// Placeholders are any `{{…}}` containing `TODO` or `REPLACE` — a
/// deliberately conservative heuristic.
pub fn validate_bundle(input: &BundleInput) -> (LoadTestValidation, LoadTestMetrics) {
    let locustfile = input.files.get("locustfile.py");
    let requirements_present = input.files.contains_key("requirements.txt");
    let user_data_present = input.files.contains_key("user_data.yaml");

    let locustfile_text = locustfile.map(|b| String::from_utf8_lossy(b).to_string());
    let host_re = Regex::new(r"(?i)host\s*=\s*['\"].+?['\"]").unwrap();
    let host_defined = locustfile_text
        .as_deref()
        .map(|t| host_re.is_match(t))
        .unwrap_or(false);

    let task_re = Regex::new(r"(?m)^\s*@task").unwrap();
    let tasks = locustfile_text
        .as_deref()
        .map(|t| task_re.find_iter(t).count() as u32)
        .unwrap_or(0);

    let endpoints = input
        .files
        .get("locust_endpoints.json")
        .and_then(|b| serde_json::from_slice::<serde_json::Value>(b).ok())
        .map(|v| match v {
            serde_json::Value::Array(a) => a.len() as u32,
            serde_json::Value::Object(o) => o.len() as u32,
            _ => 0,
        })
        .unwrap_or(0);

    let placeholder_re = Regex::new(r"\{\{[^}]*\}\}").unwrap();
    let mut placeholder_errors = Vec::new();
    for (name, bytes) in &input.files {
        let text = String::from_utf8_lossy(bytes);
        for m in placeholder_re.find_iter(&text) {
            let s = m.as_str();
            if s.contains("TODO") || s.contains("REPLACE") {
                placeholder_errors.push(format!("{name}: unresolved placeholder `{s}`"));
            }
        }
    }

    let validation = LoadTestValidation {
        locustfile_present: locustfile.is_some(),
        requirements_present,
        user_data_present,
        manifest_present: input.had_manifest,
        host_defined,
        placeholder_errors,
    };
    let metrics = LoadTestMetrics { tasks, endpoints };
    (validation, metrics)
}

fn mint_version() -> String {
    naming::version_tag(now_unix_seconds())
}

fn mint_bundle_id() -> String {
    naming::bundle_id_tag(now_unix_nanos())
}

fn build_files_map(base: &str, bundle_id: &str, names: impl Iterator<Item = String>) -> crate::model::loadtest::BundleFiles {
    names
        .map(|name| {
            let key = naming::loadtest_bundle_file_key(base, bundle_id, &name);
            (name, key)
        })
        .collect()
}

/// Upload protocol. Caller is responsible for having already
/// run `init_project`/region alignment (controller precondition, step 1);
/// this function assumes a bound, region-correct provider.
pub async fn upload_bundle(
    provider: &dyn Provider,
    base: &str,
    project_id: &str,
    input: BundleInput,
    cancel: &CancellationToken,
) -> Result<(LoadTestPointer, LoadTestVersion)> {
    if provider.bucket_name().is_none() {
        return Err(Error::not_found("bucket", "<unbound>"));
    }

    let (validation, metrics) = validate_bundle(&input);

    let hashes: BTreeMap<String, String> = input
        .files
        .iter()
        .map(|(name, bytes)| (name.clone(), sha256_hex(bytes)))
        .collect();

    let version = mint_version();
    let bundle_id = mint_bundle_id();
    let now = now_unix_seconds();

    let mut manifest_entries: Vec<ManifestFileEntry> = input
        .files
        .iter()
        .map(|(name, bytes)| ManifestFileEntry {
            name: name.clone(),
            size: bytes.len() as u64,
            sha256: hashes[name].clone(),
        })
        .collect();
    manifest_entries.sort_by(|a, b| a.name.cmp(&b.name));

    let manifest = LoadTestManifest {
        bundle_id: bundle_id.clone(),
        project_id: project_id.to_string(),
        generated_at: now,
        files: manifest_entries,
        entrypoints: vec!["locustfile.py".to_string()],
        warnings: validation.placeholder_errors.clone(),
    };

    // Step 8: bundle files, manifest.json last, then version, then pointer.
    for (name, bytes) in &input.files {
        let key = naming::loadtest_bundle_file_key(base, &bundle_id, name);
        provider
            .put_object(&key, bytes.clone(), content_type_for(name), cancel)
            .await?;
    }
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Json {
        context: "load-test manifest".to_string(),
        source: e,
    })?;
    let manifest_key = naming::loadtest_bundle_file_key(base, &bundle_id, MANIFEST_FILE);
    provider
        .put_object(&manifest_key, manifest_bytes, "application/json", cancel)
        .await?;

    let version_snapshot = LoadTestVersion {
        project_id: project_id.to_string(),
        version: version.clone(),
        bundle_id: bundle_id.clone(),
        created_at: now,
        hashes,
        validation: validation.clone(),
        metrics: metrics.clone(),
    };
    let version_bytes = serde_json::to_vec_pretty(&version_snapshot).map_err(|e| Error::Json {
        context: "load-test version snapshot".to_string(),
        source: e,
    })?;
    provider
        .put_object(
            &naming::loadtest_version_key(base, &version),
            version_bytes,
            "application/json",
            cancel,
        )
        .await?;

    let mut file_names: Vec<String> = input.files.keys().cloned().collect();
    file_names.push(MANIFEST_FILE.to_string());
    let files = build_files_map(base, &bundle_id, file_names.into_iter());

    let summary = LoadTestSummary {
        tasks: metrics.tasks,
        endpoints: metrics.endpoints,
        has_host: validation.host_defined,
    };
    let pointer = LoadTestPointer::new(project_id, &version, &bundle_id, now, files, summary);
    let pointer_bytes = serde_json::to_vec_pretty(&pointer).map_err(|e| Error::Json {
        context: "load-test pointer".to_string(),
        source: e,
    })?;
    // Commit point: once this PUT returns, every file in `pointer.files`
    // must be readable.
    provider
        .put_object(
            &naming::loadtest_current_key(base),
            pointer_bytes,
            "application/json",
            cancel,
        )
        .await?;

    if let Err(e) = write_loadtest_index(provider, base, &version_snapshot, cancel).await {
        warn!(error = %e, base, "load-test metadata index write failed, ignoring");
    }

    Ok((pointer, version_snapshot))
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct LoadTestIndex {
    base: String,
    active_version: String,
    updated_at: u64,
}

async fn write_loadtest_index(
    provider: &dyn Provider,
    base: &str,
    version: &LoadTestVersion,
    cancel: &CancellationToken,
) -> Result<()> {
    let index = LoadTestIndex {
        base: base.to_string(),
        active_version: version.version.clone(),
        updated_at: version.created_at,
    };
    let bytes = serde_json::to_vec_pretty(&index).map_err(|e| Error::Json {
        context: "load-test index".to_string(),
        source: e,
    })?;
    provider
        .put_object(&naming::loadtest_metadata_key(base), bytes, "application/json", cancel)
        .await
}

pub async fn get_current_pointer(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<Option<LoadTestPointer>> {
    let key = naming::loadtest_current_key(base);
    if !provider.head_object(&key, cancel).await? {
        return Ok(None);
    }
    let bytes = provider.get_object(&key, cancel).await?;
    let pointer = serde_json::from_slice(&bytes).map_err(|e| Error::Json {
        context: format!("load-test pointer for {base}"),
        source: e,
    })?;
    Ok(Some(pointer))
}

/// Download protocol: read pointer, `mkdir <dest>/<bundle_id>`, stream
/// every file in `pointer.files` to disk. Returns the local directory.
pub async fn download_bundle(
    provider: &dyn Provider,
    base: &str,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let pointer = get_current_pointer(provider, base, cancel)
        .await?
        .ok_or_else(|| Error::not_found("load-test pointer", base))?;

    let target = dest_dir.join(&pointer.bundle_id);
    tokio::fs::create_dir_all(&target).await.with_path(&target)?;

    for (logical, key) in &pointer.files {
        let bytes = provider.get_object(key, cancel).await?;
        let path = target.join(logical);
        tokio::fs::write(&path, bytes).await.with_path(&path)?;
    }
    Ok(target)
}

/// Delete-pointer-and-rollback. Idempotent: running it again
/// after the pointer is already gone is a no-op that returns `(None, 0)`.
pub async fn delete_pointer_rollback(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<(Option<LoadTestPointer>, u64)> {
    let current_key = naming::loadtest_current_key(base);
    let Some(pointer) = get_current_pointer(provider, base, cancel).await? else {
        provider.delete_object(&current_key, cancel).await?;
        return Ok((None, 0));
    };

    let deleted = provider
        .delete_all_versions_with_prefix(
            &naming::loadtest_bundle_dir(base, &pointer.bundle_id),
            cancel,
        )
        .await?;

    let current_version_key = naming::loadtest_version_key(base, &pointer.active_version);
    let versions_prefix = naming::loadtest_versions_prefix(base);
    let mut version_keys = provider.list_keys_all(&versions_prefix, cancel).await?;
    version_keys.sort();
    version_keys.reverse(); // descending lexical order

    let predecessor_key = version_keys
        .into_iter()
        .find(|k| k.as_str() < current_version_key.as_str());

    let Some(predecessor_key) = predecessor_key else {
        provider.delete_object(&current_key, cancel).await?;
        return Ok((None, deleted));
    };

    let predecessor_bytes = provider.get_object(&predecessor_key, cancel).await?;
    let predecessor: LoadTestVersion = serde_json::from_slice(&predecessor_bytes).map_err(|e| Error::Json {
        context: format!("predecessor load-test version at {predecessor_key}"),
        source: e,
    })?;

    let mut names: Vec<String> = predecessor.hashes.keys().cloned().collect();
    names.push(MANIFEST_FILE.to_string());
    let files = build_files_map(base, &predecessor.bundle_id, names.into_iter());

    let summary = LoadTestSummary {
        tasks: predecessor.metrics.tasks,
        endpoints: predecessor.metrics.endpoints,
        has_host: predecessor.validation.host_defined,
    };
    let new_pointer = LoadTestPointer::new(
        &predecessor.project_id,
        &predecessor.version,
        &predecessor.bundle_id,
        now_unix_seconds(),
        files,
        summary,
    );
    let bytes = serde_json::to_vec_pretty(&new_pointer).map_err(|e| Error::Json {
        context: "rolled-back load-test pointer".to_string(),
        source: e,
    })?;
    provider
        .put_object(&current_key, bytes, "application/json", cancel)
        .await?;

    Ok((Some(new_pointer), deleted))
}

/// Purge protocol: removes every load-test artifact for the project, then
/// evaluates the same coexistence matrix as [`crate::store::staged_project_delete`]
/// before touching IaC state or the bucket.
pub async fn purge(
    provider: &mut dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    let mut objects_deleted = provider
        .delete_all_versions_with_prefix(&naming::loadtest_namespace_prefix(base), cancel)
        .await?;
    provider
        .delete_object(&naming::loadtest_metadata_key(base), cancel)
        .await?;

    let mock_present = !provider
        .list_keys_all(&naming::mock_namespace_prefix(base), cancel)
        .await?
        .is_empty()
        || provider
            .head_object(&naming::mock_metadata_key(base), cancel)
            .await?;
    let mock_deployed = provider
        .head_object(naming::deployment_metadata_key(), cancel)
        .await?;
    let loadtest_deployed = provider
        .head_object(naming::deployment_metadata_loadtest_key(), cancel)
        .await?;

    if mock_present || mock_deployed || loadtest_deployed {
        let mut blockers = Vec::new();
        if mock_present {
            blockers.push("mock artifacts remain");
        }
        if mock_deployed {
            blockers.push("mock deployment metadata remains");
        }
        if loadtest_deployed {
            blockers.push("load-test deployment metadata remains");
        }
        return Ok(DeleteOutcome {
            bucket_removed: false,
            objects_deleted,
            message: format!("load-test artifacts purged, bucket retained: {}", blockers.join(", ")),
        });
    }

    objects_deleted += provider
        .delete_all_versions_with_prefix(naming::terraform_state_prefix(), cancel)
        .await?;
    objects_deleted += provider
        .delete_all_versions_with_prefix(naming::terraform_loadtest_state_prefix(), cancel)
        .await?;

    let remaining = provider.list_keys_all("", cancel).await?;
    if remaining.is_empty() {
        provider.delete_project(base, cancel).await?;
        Ok(DeleteOutcome {
            bucket_removed: true,
            objects_deleted,
            message: "load-test purge left the project empty, bucket removed".to_string(),
        })
    } else {
        Ok(DeleteOutcome {
            bucket_removed: false,
            objects_deleted,
            message: format!("IaC state cleared but bucket retained: {} object(s) remain", remaining.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fs::FsProvider;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    async fn provider_for(base: &str) -> (tempfile::TempDir, FsProvider) {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        p.init_project(base, &cancel()).await.unwrap();
        (tmp, p)
    }

    fn sample_bundle(host: bool) -> BundleInput {
        let mut files = BTreeMap::new();
        let locustfile = if host {
            b"from locust import HttpUser, task\nclass U(HttpUser):\n    host = \"https://x.example\"\n    @task\n    def t(self):\n        pass\n".to_vec()
        } else {
            b"from locust import HttpUser, task\nclass U(HttpUser):\n    @task\n    def t(self):\n        pass\n".to_vec()
        };
        files.insert("locustfile.py".to_string(), locustfile);
        files.insert("requirements.txt".to_string(), b"locust==2.0\n".to_vec());
        files.insert(
            "locust_endpoints.json".to_string(),
            serde_json::to_vec(&serde_json::json!(["/a", "/b"])).unwrap(),
        );
        BundleInput {
            files,
            had_manifest: false,
        }
    }

    #[tokio::test]
    async fn upload_validates_host_and_endpoints() {
        let (_tmp, p) = provider_for("demo").await;
        let (pointer, version) = upload_bundle(&p, "demo", "demo", sample_bundle(true), &cancel())
            .await
            .unwrap();
        assert!(version.validation.host_defined);
        assert!(version.metrics.endpoints >= 1);
        for key in pointer.files.values() {
            assert!(p.head_object(key, &cancel()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn missing_required_file_rejected() {
        let (_tmp, p) = provider_for("demo").await;
        let mut bundle = sample_bundle(true);
        bundle.files.remove("requirements.txt");
        let err = upload_bundle(&p, "demo", "demo", bundle, &cancel()).await.unwrap_err();
        match err {
            Error::MissingBundleFile { names } => assert_eq!(names, vec!["requirements.txt".to_string()]),
            other => panic!("expected MissingBundleFile, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rollback_walks_back_through_two_uploads() {
        let (_tmp, p) = provider_for("demo").await;
        let (pointer_a, version_a) = upload_bundle(&p, "demo", "demo", sample_bundle(true), &cancel())
            .await
            .unwrap();
        // Ensure a distinct second-resolution version tag.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let (pointer_b, _version_b) = upload_bundle(&p, "demo", "demo", sample_bundle(false), &cancel())
            .await
            .unwrap();
        assert_ne!(pointer_a.bundle_id, pointer_b.bundle_id);

        let current = get_current_pointer(&p, "demo", &cancel()).await.unwrap().unwrap();
        assert_eq!(current.bundle_id, pointer_b.bundle_id);

        let (rolled_back, deleted_b) = delete_pointer_rollback(&p, "demo", &cancel()).await.unwrap();
        let rolled_back = rolled_back.unwrap();
        assert_eq!(rolled_back.bundle_id, pointer_a.bundle_id);
        assert_eq!(rolled_back.active_version, version_a.version);
        assert!(deleted_b > 0);

        // Bundle B's directory is now empty.
        let b_dir = naming::loadtest_bundle_dir("demo", &pointer_b.bundle_id);
        assert!(p.list_keys_all(&b_dir, &cancel()).await.unwrap().is_empty());

        let (final_pointer, _deleted_a) = delete_pointer_rollback(&p, "demo", &cancel()).await.unwrap();
        assert!(final_pointer.is_none());
        assert!(get_current_pointer(&p, "demo", &cancel()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_pointer_rollback_is_idempotent_once_empty() {
        let (_tmp, p) = provider_for("demo").await;
        let (first, second) = (
            delete_pointer_rollback(&p, "demo", &cancel()).await.unwrap(),
            delete_pointer_rollback(&p, "demo", &cancel()).await.unwrap(),
        );
        assert_eq!(first, second);
    }
}
