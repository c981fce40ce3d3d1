//! Deployment-metadata reconciler: the single source of truth for
//! "is this stack deployed, and since when". Two stacks
//! share the same shape, distinguished only by which key they live at.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::deployment::{DeploymentMetadata, DeploymentStatus};
use crate::naming;
use crate::provider::Provider;
use crate::time::now_unix_seconds;

/// Which deployment-metadata document a call concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Mock,
    LoadTest,
}

impl Stack {
    fn metadata_key(self) -> &'static str {
        match self {
            Stack::Mock => naming::deployment_metadata_key(),
            Stack::LoadTest => naming::deployment_metadata_loadtest_key(),
        }
    }
}

/// `None` if the stack has never been deployed (no metadata document yet).
pub async fn read_deployment_metadata(
    provider: &dyn Provider,
    stack: Stack,
    cancel: &CancellationToken,
) -> Result<Option<DeploymentMetadata>> {
    let key = stack.metadata_key();
    if !provider.head_object(key, cancel).await? {
        return Ok(None);
    }
    let bytes = provider.get_object(key, cancel).await?;
    let metadata = serde_json::from_slice(&bytes).map_err(|e| Error::Json {
        context: format!("deployment metadata at {key}"),
        source: e,
    })?;
    Ok(Some(metadata))
}

pub async fn write_deployment_metadata(
    provider: &dyn Provider,
    stack: Stack,
    metadata: &DeploymentMetadata,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(metadata).map_err(|e| Error::Json {
        context: "deployment metadata".to_string(),
        source: e,
    })?;
    provider
        .put_object(stack.metadata_key(), bytes, "application/json", cancel)
        .await
}

/// Deletes the stack's deployment-metadata document. The key's existence
/// is the "is this stack deployed" signal read by the store and bundle
/// coexistence checks, so a successful destroy must remove it rather than
/// write a `Destroyed` record in place.
pub async fn delete_deployment_metadata(
    provider: &dyn Provider,
    stack: Stack,
    cancel: &CancellationToken,
) -> Result<()> {
    provider.delete_object(stack.metadata_key(), cancel).await
}

/// Best-effort status mark, swallowing write failures after logging — used
/// by the controller's failure paths where the original error must win
///.
pub async fn mark_status_best_effort(
    provider: &dyn Provider,
    stack: Stack,
    project_name: &str,
    status: DeploymentStatus,
    cancel: &CancellationToken,
) {
    let mut metadata = match read_deployment_metadata(provider, stack, cancel).await {
        Ok(Some(m)) => m,
        Ok(None) => DeploymentMetadata::new(project_name),
        Err(e) => {
            warn!(error = %e, "could not read deployment metadata to mark status, ignoring");
            return;
        }
    };
    metadata.status = status;
    if status == DeploymentStatus::Destroyed {
        metadata.destroyed_at = Some(now_unix_seconds());
    }
    if let Err(e) = write_deployment_metadata(provider, stack, &metadata, cancel).await {
        warn!(error = %e, "could not persist deployment status, ignoring");
    }
}

/// Atomic (single-writer, ) extend-TTL read-modify-write. Only
/// valid for an already-deployed stack; extends from the later of "now"
/// and the current expiry so a lapsed TTL doesn't get backdated.
pub async fn extend_ttl(
    provider: &dyn Provider,
    stack: Stack,
    additional_hours: u32,
    cancel: &CancellationToken,
) -> Result<DeploymentMetadata> {
    let mut metadata = read_deployment_metadata(provider, stack, cancel)
        .await?
        .ok_or_else(|| Error::conflict("project has no deployment to extend"))?;
    if !metadata.is_deployed() {
        return Err(Error::conflict("project is not currently deployed"));
    }

    let now = now_unix_seconds();
    let base_expiry = metadata.ttl_expiry.filter(|&e| e > now).unwrap_or(now);
    let additional_seconds = u64::from(additional_hours) * 3600;
    metadata.ttl_expiry = Some(base_expiry + additional_seconds);
    metadata.ttl_hours = Some(metadata.ttl_hours.unwrap_or(0) + additional_hours);

    write_deployment_metadata(provider, stack, &metadata, cancel).await?;
    Ok(metadata)
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

    #[tokio::test]
    async fn missing_metadata_reads_as_none() {
        let (_tmp, p) = provider_for("demo").await;
        assert!(read_deployment_metadata(&p, Stack::Mock, &cancel()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_ttl_requires_deployed_stack() {
        let (_tmp, p) = provider_for("demo").await;
        let mut metadata = DeploymentMetadata::new("demo");
        metadata.status = DeploymentStatus::Deploying;
        write_deployment_metadata(&p, Stack::Mock, &metadata, &cancel()).await.unwrap();

        let err = extend_ttl(&p, Stack::Mock, 4, &cancel()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn extend_ttl_adds_to_remaining_time() {
        let (_tmp, p) = provider_for("demo").await;
        let now = now_unix_seconds();
        let mut metadata = DeploymentMetadata::new("demo");
        metadata.status = DeploymentStatus::Deployed;
        metadata.ttl_hours = Some(2);
        metadata.ttl_expiry = Some(now + 7200);
        write_deployment_metadata(&p, Stack::Mock, &metadata, &cancel()).await.unwrap();

        let updated = extend_ttl(&p, Stack::Mock, 1, &cancel()).await.unwrap();
        assert_eq!(updated.ttl_hours, Some(3));
        assert!(updated.ttl_expiry.unwrap() >= now + 7200 + 3600);
    }

    #[tokio::test]
    async fn mark_status_best_effort_creates_document_if_absent() {
        let (_tmp, p) = provider_for("demo").await;
        mark_status_best_effort(&p, Stack::LoadTest, "demo", DeploymentStatus::Failed, &cancel()).await;
        let metadata = read_deployment_metadata(&p, Stack::LoadTest, &cancel())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.status, DeploymentStatus::Failed);
    }
}
