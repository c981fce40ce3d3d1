//! Project lifecycle controller: the operations the CLI exposes
//! (`init`/`deploy`/`destroy`/`scale`/`purge-loadtest`/`delete`/`status`),
//! composing the artifact store, bundle manager, IaC orchestrator, and
//! deployment reconciler. Exactly one writer per project is expected at a
//! time; this module does not enforce that itself — the caller is
//! expected to hold the provider for the duration of one call before
//! starting another (the CLI's per-invocation process model gives this
//! for free; a long-lived service embedding this crate would need its
//! own per-project lock).

use std::collections::BTreeMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bundle;
use crate::config::ControllerConfig;
use crate::cost::{self, CostEstimate};
use crate::error::{Error, Result};
use crate::iac;
use crate::model::deployment::DeploymentMetadata;
use crate::model::loadtest::LoadTestPointer;
use crate::naming;
use crate::provider::Provider;
use crate::reconciler::{self, Stack};
use crate::store::{self, DeleteOutcome, VersionInfo};
use crate::time::now_unix_seconds;

/// Finds and binds an already-initialised project's bucket. Every
/// operation but `init` needs this first — a fresh process has no memory
/// of the random suffix `init` minted.
pub async fn bind_existing_project(
    provider: &mut dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let name = provider
        .resolve_project_bucket(base, cancel)
        .await?
        .ok_or_else(|| Error::not_found("project", base))?;
    provider.bind(&name);
    Ok(name)
}

/// Creates the project's bucket. Fails if a bucket for `base` already
/// exists.
pub async fn init(
    provider: &mut dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    naming::validate_base(base)?;
    if provider.project_exists(base, cancel).await? {
        return Err(Error::AlreadyExists {
            kind: "project",
            name: base.to_string(),
        });
    }
    provider.validate_credentials(cancel).await?;
    provider.init_project(base, cancel).await?;

    let storage_name = provider
        .bucket_name()
        .map(str::to_string)
        .ok_or_else(|| Error::not_found("bucket", "<unbound after init>"))?;

    let bucket_region = provider.get_bucket_region(&storage_name, cancel).await?;
    let current_region = provider.get_region().await?;
    if bucket_region != current_region {
        info!(bucket = %storage_name, bucket_region, current_region, "rebinding provider to bucket's actual region");
        provider.rebind_region(&bucket_region).await?;
    }

    Ok(storage_name)
}

/// Deploys (or re-deploys, idempotently) one stack.
pub async fn deploy(
    provider: &mut dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    project_id: &str,
    options: BTreeMap<String, Value>,
    cancel: &CancellationToken,
) -> Result<DeploymentMetadata> {
    let mut metadata = reconciler::read_deployment_metadata(provider, stack, cancel)
        .await?
        .unwrap_or_else(|| DeploymentMetadata::new(project_id));
    metadata.status = crate::model::deployment::DeploymentStatus::Deploying;
    reconciler::write_deployment_metadata(provider, stack, &metadata, cancel).await?;

    match iac::deploy(provider, config, stack, base, &options, cancel).await {
        Ok(outcome) => {
            metadata.status = crate::model::deployment::DeploymentStatus::Deployed;
            metadata.deployed_at = Some(now_unix_seconds());
            metadata.destroyed_at = None;
            metadata.infrastructure = outcome.infrastructure;
            metadata.options = options;
            metadata.outputs = outcome.outputs;
            metadata.extras.tfvars = Some(outcome.tfvars);
            reconciler::write_deployment_metadata(provider, stack, &metadata, cancel).await?;
            Ok(metadata)
        }
        Err(e) => {
            warn!(error = %e, base, ?stack, "deploy failed, marking stack as failed");
            reconciler::mark_status_best_effort(
                provider,
                stack,
                project_id,
                crate::model::deployment::DeploymentStatus::Failed,
                cancel,
            )
            .await;
            Err(e)
        }
    }
}

/// Tears a stack down and deletes its deployment-metadata document —
/// the document's absence *is* the "destroyed" state. A no-op if the
/// stack was never deployed.
pub async fn destroy(
    provider: &mut dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    project_id: &str,
    cancel: &CancellationToken,
) -> Result<DeploymentMetadata> {
    if let Err(e) = iac::destroy(provider, config, stack, base, cancel).await {
        warn!(error = %e, base, ?stack, "destroy failed, marking stack as failed");
        reconciler::mark_status_best_effort(
            provider,
            stack,
            project_id,
            crate::model::deployment::DeploymentStatus::Failed,
            cancel,
        )
        .await;
        return Err(e);
    }

    let mut metadata = reconciler::read_deployment_metadata(provider, stack, cancel)
        .await?
        .unwrap_or_else(|| DeploymentMetadata::new(project_id));
    metadata.status = crate::model::deployment::DeploymentStatus::Destroyed;
    metadata.destroyed_at = Some(now_unix_seconds());
    reconciler::delete_deployment_metadata(provider, stack, cancel).await?;
    Ok(metadata)
}

/// Rewrites `worker_desired_count` in the stack's saved tfvars and
/// re-applies. Fails with [`Error::MissingSavedTfvars`] if the stack has
/// never been deployed.
pub async fn scale(
    provider: &mut dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    project_id: &str,
    worker_desired_count: u32,
    cancel: &CancellationToken,
) -> Result<DeploymentMetadata> {
    let mut metadata = reconciler::read_deployment_metadata(provider, stack, cancel)
        .await?
        .ok_or(Error::MissingSavedTfvars)?;
    if !metadata.is_deployed() {
        return Err(Error::NotDeployed);
    }
    let saved_tfvars = metadata.extras.tfvars.clone();

    match iac::scale(
        provider,
        config,
        stack,
        base,
        saved_tfvars.as_deref(),
        worker_desired_count,
        cancel,
    )
    .await
    {
        Ok(outcome) => {
            metadata.infrastructure = outcome.infrastructure;
            metadata.outputs = outcome.outputs;
            metadata.extras.tfvars = Some(outcome.tfvars);
            reconciler::write_deployment_metadata(provider, stack, &metadata, cancel).await?;
            Ok(metadata)
        }
        Err(e) => {
            warn!(error = %e, base, ?stack, "scale failed, marking stack as failed");
            reconciler::mark_status_best_effort(
                provider,
                stack,
                project_id,
                crate::model::deployment::DeploymentStatus::Failed,
                cancel,
            )
            .await;
            Err(e)
        }
    }
}

/// Tears the load-test stack down if deployed, then removes every
/// load-test artifact and evaluates the bucket-removal coexistence check
///.
pub async fn purge_loadtest(
    provider: &mut dyn Provider,
    config: &ControllerConfig,
    base: &str,
    project_id: &str,
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    let loadtest_deployed = reconciler::read_deployment_metadata(provider, Stack::LoadTest, cancel)
        .await?
        .map(|m| m.is_deployed())
        .unwrap_or(false);
    if loadtest_deployed {
        destroy(provider, config, Stack::LoadTest, base, project_id, cancel).await?;
    }
    bundle::purge(provider, base, cancel).await
}

/// Full project delete: destroys both stacks if deployed, then runs the
/// staged artifact/bucket delete protocol.
pub async fn delete_project(
    provider: &mut dyn Provider,
    config: &ControllerConfig,
    base: &str,
    project_id: &str,
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    for stack in [Stack::Mock, Stack::LoadTest] {
        let deployed = reconciler::read_deployment_metadata(provider, stack, cancel)
            .await?
            .map(|m| m.is_deployed())
            .unwrap_or(false);
        if deployed {
            destroy(provider, config, stack, base, project_id, cancel).await?;
        }
    }
    store::staged_project_delete(provider, base, cancel).await
}

/// Aggregated read-only view for the `status` operation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProjectStatus {
    pub base: String,
    pub mock: Option<DeploymentMetadata>,
    pub loadtest: Option<DeploymentMetadata>,
    pub mock_config_version: Option<String>,
    pub mock_versions: Vec<VersionInfo>,
    pub loadtest_pointer: Option<LoadTestPointer>,
    pub estimated_cost: CostEstimate,
}

pub async fn status(
    provider: &dyn Provider,
    base: &str,
    cancel: &CancellationToken,
) -> Result<ProjectStatus> {
    let mock = reconciler::read_deployment_metadata(provider, Stack::Mock, cancel).await?;
    let loadtest = reconciler::read_deployment_metadata(provider, Stack::LoadTest, cancel).await?;

    let mock_config_version = match store::get_current_mock_config(provider, base, cancel).await {
        Ok(config) => Some(config.metadata.version),
        Err(Error::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };
    let mock_versions = store::list_mock_versions(provider, base, cancel).await.unwrap_or_default();
    let loadtest_pointer = bundle::get_current_pointer(provider, base, cancel).await?;

    let mut estimates = Vec::new();
    if let Some(m) = &mock {
        if m.is_deployed() {
            estimates.push(cost::estimate_stack("mock", &m.options));
        }
    }
    if let Some(lt) = &loadtest {
        if lt.is_deployed() {
            estimates.push(cost::estimate_stack("loadtest", &lt.options));
        }
    }
    let estimated_cost = cost::combine(estimates);

    Ok(ProjectStatus {
        base: base.to_string(),
        mock,
        loadtest,
        mock_config_version,
        mock_versions,
        loadtest_pointer,
        estimated_cost,
    })
}

/// Supplemented feature: extend a deployed stack's TTL without a full
/// redeploy.
pub async fn extend_ttl(
    provider: &dyn Provider,
    stack: Stack,
    additional_hours: u32,
    cancel: &CancellationToken,
) -> Result<DeploymentMetadata> {
    reconciler::extend_ttl(provider, stack, additional_hours, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fs::FsProvider;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn init_rejects_duplicate_project() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();

        // A second provider instance pointed at the same root simulates a
        // second process racing the same project name.
        let mut p2 = FsProvider::new(tmp.path(), "us-east-1");
        let err = init(&mut p2, "demo", &cancel()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn status_on_fresh_project_has_no_stacks() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();

        let s = status(&p, "demo", &cancel()).await.unwrap();
        assert!(s.mock.is_none());
        assert!(s.loadtest.is_none());
        assert!(s.mock_config_version.is_none());
        assert_eq!(s.estimated_cost.monthly_usd, 0.0);
    }

    #[tokio::test]
    async fn scale_without_prior_deploy_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();
        let config = ControllerConfig::default();

        let err = scale(&mut p, &config, Stack::Mock, "demo", "demo", 2, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSavedTfvars));
    }

    #[tokio::test]
    async fn purge_loadtest_with_no_bundle_is_a_clean_noop_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();
        let config = ControllerConfig::default();

        let outcome = purge_loadtest(&mut p, &config, "demo", "demo", &cancel()).await.unwrap();
        assert!(outcome.bucket_removed);
    }

    #[tokio::test]
    async fn destroy_deletes_the_metadata_document_rather_than_writing_destroyed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();
        let mut metadata = DeploymentMetadata::new("demo");
        metadata.status = crate::model::deployment::DeploymentStatus::Deployed;
        reconciler::write_deployment_metadata(&p, Stack::Mock, &metadata, &cancel())
            .await
            .unwrap();
        let config = ControllerConfig::default();

        destroy(&mut p, &config, Stack::Mock, "demo", "demo", &cancel())
            .await
            .unwrap();

        assert!(reconciler::read_deployment_metadata(&p, Stack::Mock, &cancel())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_project_fully_removes_the_bucket_after_a_deploy_destroy_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();
        let mut metadata = DeploymentMetadata::new("demo");
        metadata.status = crate::model::deployment::DeploymentStatus::Deployed;
        reconciler::write_deployment_metadata(&p, Stack::Mock, &metadata, &cancel())
            .await
            .unwrap();
        let config = ControllerConfig::default();

        destroy(&mut p, &config, Stack::Mock, "demo", "demo", &cancel())
            .await
            .unwrap();
        let outcome = delete_project(&mut p, &config, "demo", "demo", &cancel()).await.unwrap();
        assert!(outcome.bucket_removed);
    }

    #[tokio::test]
    async fn scale_on_a_destroyed_stack_fails_not_deployed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        init(&mut p, "demo", &cancel()).await.unwrap();
        let mut metadata = DeploymentMetadata::new("demo");
        metadata.status = crate::model::deployment::DeploymentStatus::Destroyed;
        metadata.extras.tfvars = Some("worker_desired_count = 2\n".to_string());
        reconciler::write_deployment_metadata(&p, Stack::LoadTest, &metadata, &cancel())
            .await
            .unwrap();
        let config = ControllerConfig::default();

        let err = scale(&mut p, &config, Stack::LoadTest, "demo", "demo", 3, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotDeployed));
    }
}
