//! The versioned artifact store. CRUD + versioning for mock configs
//! plus the staged project-delete protocol.
//!
//! Free functions over `&dyn Provider` rather than a struct wrapping one —
//! the store has no state of its own beyond the bucket the provider is
//! already bound to, so there is nothing to own.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::mock::{validate_mock_configuration, MockConfiguration, MockMetadata};
use crate::naming;
use crate::provider::Provider;
use crate::time::now_unix_seconds;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub created_at: u64,
    pub size: u64,
}

/// Save a mock configuration. `config.metadata.version`/`created_at` are
/// treated as hints: an empty version is minted fresh, a zero `created_at`
/// is stamped to now. `updated_at` is always overwritten.
///
/// Write order: `current.json` (authoritative) → version snapshot →
/// metadata index. The latter two are best-effort: failures are logged
/// and swallowed rather than failing the enclosing operation.
pub async fn save_mock_config(
    provider: &dyn Provider,
    base: &str,
    mut config: MockConfiguration,
    cancel: &CancellationToken,
) -> Result<MockConfiguration> {
    naming::validate_base(base)?;
    validate_mock_configuration(base, &config.expectations)?;

    let now = now_unix_seconds();
    config.metadata.updated_at = now;
    if config.metadata.created_at == 0 {
        config.metadata.created_at = now;
    }
    if config.metadata.version.is_empty() {
        config.metadata.version = naming::version_tag(now);
    }

    // `size` is the serialised byte length of the whole configuration;
    // compute it from a first pass, then bake it into the final bytes.
    config.metadata.size = 0;
    let probe = serde_json::to_vec(&config).map_err(|e| Error::Json {
        context: "mock configuration (size probe)".to_string(),
        source: e,
    })?;
    config.metadata.size = probe.len() as u64;

    let bytes = serde_json::to_vec_pretty(&config).map_err(|e| Error::Json {
        context: "mock configuration".to_string(),
        source: e,
    })?;

    let current_key = naming::mock_current_key(base);
    provider
        .put_object(&current_key, bytes.clone(), "application/json", cancel)
        .await?;

    let version_key = naming::mock_version_key(base, &config.metadata.version);
    if let Err(e) = provider
        .put_object(&version_key, bytes.clone(), "application/json", cancel)
        .await
    {
        warn!(error = %e, key = %version_key, "mock config version snapshot write failed, ignoring");
    }

    if let Err(e) = write_mock_index(provider, base, &config.metadata, cancel).await {
        warn!(error = %e, base, "mock config metadata index write failed, ignoring");
    }

    Ok(config)
}

/// Read `current`, preserve `created_at`, mint a new version, and save.
pub async fn update_mock_config(
    provider: &dyn Provider,
    base: &str,
    expectations: Vec<crate::model::mock::Expectation>,
    settings: serde_json::Value,
    cancel: &CancellationToken,
) -> Result<MockConfiguration> {
    let current = get_current_mock_config(provider, base, cancel).await?;
    let next = MockConfiguration {
        metadata: MockMetadata {
            version: String::new(), // re-minted by save_mock_config
            created_at: current.metadata.created_at,
            updated_at: 0,
            size: 0,
        },
        expectations,
        settings,
    };
    save_mock_config(provider, base, next, cancel).await
}

pub async fn get_current_mock_config(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<MockConfiguration> {
    let bytes = provider
        .get_object(&naming::mock_current_key(base), cancel)
        .await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Json {
        context: format!("current mock config for {base}"),
        source: e,
    })
}

pub async fn list_mock_versions(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<Vec<VersionInfo>> {
    let prefix = naming::mock_versions_prefix(base);
    let entries = provider.list_prefix_all(&prefix, cancel).await?;
    let mut versions: Vec<VersionInfo> = entries
        .into_iter()
        .filter_map(|e| {
            let suffix = e.key.strip_prefix(&prefix)?;
            let version = suffix.strip_suffix(".json")?.to_string();
            Some(VersionInfo {
                version,
                created_at: e.last_modified,
                size: e.size,
            })
        })
        .collect();
    versions.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(versions)
}

/// Internal index kept at `metadata/<base>.json`. Best-effort only; never
/// authoritative.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct MockConfigIndex {
    base: String,
    latest_version: String,
    updated_at: u64,
    version_count: u64,
}

async fn write_mock_index(
    provider: &dyn Provider,
    base: &str,
    metadata: &MockMetadata,
    cancel: &CancellationToken,
) -> Result<()> {
    let versions = list_mock_versions(provider, base, cancel).await.unwrap_or_default();
    let index = MockConfigIndex {
        base: base.to_string(),
        latest_version: metadata.version.clone(),
        updated_at: metadata.updated_at,
        version_count: versions.len() as u64,
    };
    let bytes = serde_json::to_vec_pretty(&index).map_err(|e| Error::Json {
        context: "mock config index".to_string(),
        source: e,
    })?;
    provider
        .put_object(&naming::mock_metadata_key(base), bytes, "application/json", cancel)
        .await
}

/// Deletes everything under `configs/<base>/` and `metadata/<base>.json`.
/// Does **not** touch IaC state or the bucket — that is only ever decided
/// by [`staged_project_delete`].
pub async fn delete_mock_artifacts(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let n = provider
        .delete_all_versions_with_prefix(&naming::mock_namespace_prefix(base), cancel)
        .await?;
    provider
        .delete_object(&naming::mock_metadata_key(base), cancel)
        .await?;
    Ok(n)
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteOutcome {
    pub bucket_removed: bool,
    pub objects_deleted: u64,
    pub message: String,
}

/// The staged project-delete protocol: mock artifacts are always
/// removed; the bucket and IaC state are only removed once the
/// coexistence check (both stacks fully absent) passes.
pub async fn staged_project_delete(
    provider: &mut dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    let mut objects_deleted = 0u64;

    objects_deleted += provider
        .delete_all_versions_with_prefix(&naming::mock_namespace_prefix(base), cancel)
        .await?;
    provider
        .delete_object(&naming::mock_metadata_key(base), cancel)
        .await?;

    let loadtest_present = has_loadtest_artifacts(provider, base, cancel).await?;
    let loadtest_deployed = provider
        .head_object(naming::deployment_metadata_loadtest_key(), cancel)
        .await?;
    let mock_deployed = provider
        .head_object(naming::deployment_metadata_key(), cancel)
        .await?;

    debug!(
        base,
        loadtest_present, loadtest_deployed, mock_deployed, "coexistence check for project delete"
    );

    if loadtest_present || loadtest_deployed || mock_deployed {
        let mut blockers = Vec::new();
        if loadtest_present {
            blockers.push("load-test artifacts remain");
        }
        if loadtest_deployed {
            blockers.push("load-test deployment metadata remains");
        }
        if mock_deployed {
            blockers.push("mock deployment metadata remains");
        }
        return Ok(DeleteOutcome {
            bucket_removed: false,
            objects_deleted,
            message: format!(
                "mock artifacts removed, bucket retained: {}",
                blockers.join(", ")
            ),
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
            message: "project fully deleted, bucket removed".to_string(),
        })
    } else {
        Ok(DeleteOutcome {
            bucket_removed: false,
            objects_deleted,
            message: format!(
                "IaC state cleared but bucket retained: {} object(s) remain",
                remaining.len()
            ),
        })
    }
}

async fn has_loadtest_artifacts(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<bool> {
    let has_objects = !provider
        .list_keys_all(&naming::loadtest_namespace_prefix(base), cancel)
        .await?
        .is_empty();
    let has_metadata = provider
        .head_object(&naming::loadtest_metadata_key(base), cancel)
        .await?;
    Ok(has_objects || has_metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::normalise_expectations;
    use crate::provider::fs::FsProvider;
    use serde_json::json;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn one_expectation() -> MockConfiguration {
        let raw = json!([{
            "httpRequest": {"method": "GET", "path": "/ping"},
            "httpResponse": {"statusCode": 200, "body": {"ok": true}}
        }]);
        let expectations = normalise_expectations(raw.as_array().unwrap()).unwrap();
        MockConfiguration {
            metadata: MockMetadata {
                version: String::new(),
                created_at: 0,
                updated_at: 0,
                size: 0,
            },
            expectations,
            settings: json!({}),
        }
    }

    async fn provider_for(base: &str) -> (tempfile::TempDir, FsProvider) {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        p.init_project(base, &cancel()).await.unwrap();
        (tmp, p)
    }

    #[tokio::test]
    async fn save_then_read_byte_equal() {
        let (_tmp, p) = provider_for("demo").await;
        let saved = save_mock_config(&p, "demo", one_expectation(), &cancel()).await.unwrap();

        let current_bytes = p.get_object("configs/demo/current.json", &cancel()).await.unwrap();
        let version_key = naming::mock_version_key("demo", &saved.metadata.version);
        let version_bytes = p.get_object(&version_key, &cancel()).await.unwrap();
        assert_eq!(current_bytes, version_bytes);

        let reread: MockConfiguration = serde_json::from_slice(&current_bytes).unwrap();
        assert_eq!(reread.metadata.version, saved.metadata.version);
    }

    #[tokio::test]
    async fn created_at_preserved_across_updates() {
        let (_tmp, p) = provider_for("demo").await;
        let first = save_mock_config(&p, "demo", one_expectation(), &cancel()).await.unwrap();
        let created = first.metadata.created_at;

        for _ in 0..3 {
            let updated = update_mock_config(
                &p,
                "demo",
                first.expectations.clone(),
                json!({}),
                &cancel(),
            )
            .await
            .unwrap();
            assert_eq!(updated.metadata.created_at, created);
        }
    }

    #[tokio::test]
    async fn delete_blocked_by_loadtest_deployment() {
        let (_tmp, mut p) = provider_for("demo").await;
        save_mock_config(&p, "demo", one_expectation(), &cancel()).await.unwrap();
        p.put_object(
            naming::deployment_metadata_loadtest_key(),
            b"{}".to_vec(),
            "application/json",
            &cancel(),
        )
        .await
        .unwrap();

        let outcome = staged_project_delete(&mut p, "demo", &cancel()).await.unwrap();
        assert!(!outcome.bucket_removed);
        assert!(!p.head_object("configs/demo/current.json", &cancel()).await.unwrap());
        assert!(p
            .head_object(naming::deployment_metadata_loadtest_key(), &cancel())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_fully_removes_bucket_when_both_stacks_absent() {
        let (_tmp, mut p) = provider_for("demo").await;
        save_mock_config(&p, "demo", one_expectation(), &cancel()).await.unwrap();

        let outcome = staged_project_delete(&mut p, "demo", &cancel()).await.unwrap();
        assert!(outcome.bucket_removed);
        assert!(p.bucket_name().is_none());
    }
}
