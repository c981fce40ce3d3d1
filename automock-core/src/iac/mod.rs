//! IaC workspace orchestrator: spins up an ephemeral Terraform
//! workspace per operation, streams the subprocess, and wires the
//! workspace's `backend.tf` straight at the project bucket so Terraform's
//! own S3 backend owns state persistence and locking.

pub mod templates;
pub mod tfvars;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, IoContext, Result};
use crate::model::deployment::Infrastructure;
use crate::naming;
use crate::provider::Provider;
use crate::reconciler::Stack;

/// Every ephemeral workspace directory carries this prefix. [`cleanup_workspace`]
/// refuses to remove anything that doesn't, so a misconfigured `workdir_base`
/// can never cause this orchestrator to `rm -rf` an unrelated directory.
const WORKSPACE_PREFIX: &str = "automock-";

pub struct IacOutcome {
    pub outputs: BTreeMap<String, Value>,
    pub infrastructure: Infrastructure,
    /// The tfvars text this run applied, to be saved into deployment
    /// metadata `extras.tfvars` for a later scale call.
    pub tfvars: String,
}

fn workspace_name(stack: Stack, base: &str) -> String {
    let pid = std::process::id();
    match stack {
        Stack::Mock => format!("{WORKSPACE_PREFIX}{base}-{pid}"),
        Stack::LoadTest => format!("{WORKSPACE_PREFIX}lt-{base}-{pid}"),
    }
}

fn state_key_for(stack: Stack) -> String {
    match stack {
        Stack::Mock => naming::terraform_state_key(),
        Stack::LoadTest => naming::terraform_loadtest_state_key(),
    }
}

fn templates_for(stack: Stack) -> (&'static str, &'static str) {
    match stack {
        Stack::Mock => (templates::MOCK_MAIN_TF, templates::MOCK_OUTPUTS_TF),
        Stack::LoadTest => (templates::LOADTEST_MAIN_TF, templates::LOADTEST_OUTPUTS_TF),
    }
}

/// Reads the bucket and region this orchestration is bound to. Every
/// `backend.tf` is rendered against these, not against the CLI's default
/// region, so the remote state always lands next to the artifacts it
/// describes.
async fn bucket_and_region(provider: &dyn Provider) -> Result<(String, String)> {
    let bucket = provider
        .bucket_name()
        .map(str::to_string)
        .ok_or_else(|| Error::not_found("bucket", "<unbound provider>"))?;
    let region = provider.get_region().await?;
    Ok((bucket, region))
}

async fn prepare_workspace(
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    bucket: &str,
    region: &str,
) -> Result<PathBuf> {
    let dir = config.workdir_base.join(workspace_name(stack, base));
    tokio::fs::create_dir_all(&dir).await.with_path(&dir)?;

    let (main_tf, outputs_tf) = templates_for(stack);
    let main_path = dir.join("main.tf");
    tokio::fs::write(&main_path, main_tf).await.with_path(&main_path)?;
    let outputs_path = dir.join("outputs.tf");
    tokio::fs::write(&outputs_path, outputs_tf).await.with_path(&outputs_path)?;

    let backend = templates::render_backend_tf(bucket, &state_key_for(stack), region);
    let backend_path = dir.join("backend.tf");
    tokio::fs::write(&backend_path, backend).await.with_path(&backend_path)?;

    Ok(dir)
}

/// Removes an ephemeral workspace. Logs and ignores failures — a leftover
/// temp directory is a nuisance, never a reason to fail the operation that
/// already succeeded.
async fn cleanup_workspace(dir: &Path) {
    let safe = dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(WORKSPACE_PREFIX))
        .unwrap_or(false);
    if !safe {
        warn!(dir = %dir.display(), "refusing to remove workspace without the expected prefix");
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(error = %e, dir = %dir.display(), "failed to clean up ephemeral workspace, ignoring");
    }
}

/// Runs a single Terraform invocation, streaming stdout at `info` and
/// stderr at `warn`. Bounded by [`ControllerConfig::subprocess_timeout`]
/// and by `cancel` — whichever fires first kills the child (`kill_on_drop`
/// takes care of that once this future is dropped or returns early).
async fn run_terraform(
    config: &ControllerConfig,
    workdir: &Path,
    args: &[&str],
    cancel: &CancellationToken,
) -> Result<String> {
    let stage = args.first().copied().unwrap_or("terraform").to_string();

    let mut child = Command::new(&config.terraform_bin)
        .args(args)
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Io {
            path: config.terraform_bin.clone(),
            source: e,
        })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stage_out = stage.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut buf = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(stage = %stage_out, "{line}");
            buf.push_str(&line);
            buf.push('\n');
        }
        buf
    });
    let stage_err = stage.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(stage = %stage_err, "{line}");
        }
    });

    let wait = async {
        let status = child.wait().await;
        let output = stdout_task.await.unwrap_or_default();
        let _ = stderr_task.await;
        (status, output)
    };

    let (status, output) = tokio::select! {
        res = timeout(config.subprocess_timeout, wait) => match res {
            Ok(pair) => pair,
            Err(_) => return Err(Error::Transient { cause: format!("terraform {stage} timed out") }),
        },
        _ = cancel.cancelled() => {
            return Err(Error::Transient { cause: "operation cancelled".to_string() });
        }
    };

    let status = status.map_err(|e| Error::Io {
        path: workdir.to_path_buf(),
        source: e,
    })?;
    if !status.success() {
        return Err(Error::ExternalToolFailed {
            stage,
            exit_code: status.code(),
            output,
        });
    }
    Ok(output)
}

fn parse_outputs(raw: &str) -> Result<BTreeMap<String, Value>> {
    let parsed: BTreeMap<String, Value> = serde_json::from_str(raw).map_err(|e| Error::Json {
        context: "terraform output -json".to_string(),
        source: e,
    })?;
    Ok(parsed
        .into_iter()
        .filter_map(|(name, entry)| entry.get("value").cloned().map(|v| (name, v)))
        .collect())
}

fn extract_infrastructure(outputs: &BTreeMap<String, Value>, region: &str) -> Infrastructure {
    Infrastructure {
        cluster: outputs.get("cluster_name").and_then(Value::as_str).map(String::from),
        service: outputs.get("service_name").and_then(Value::as_str).map(String::from),
        alb_dns: outputs.get("alb_dns_name").and_then(Value::as_str).map(String::from),
        urls: outputs
            .get("urls")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
        vpc: outputs.get("vpc_id").and_then(Value::as_str).map(String::from),
        region: Some(region.to_string()),
    }
}

/// Full init/plan-implicit/apply/output pipeline for a fresh or
/// already-deployed stack. Idempotent: re-running against existing state
/// converges rather than duplicating resources.
pub async fn deploy(
    provider: &dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    options: &BTreeMap<String, Value>,
    cancel: &CancellationToken,
) -> Result<IacOutcome> {
    let (bucket, region) = bucket_and_region(provider).await?;
    let workdir = prepare_workspace(config, stack, base, &bucket, &region).await?;

    let tfvars = tfvars::render_tfvars(options)?;
    let tfvars_path = workdir.join("terraform.tfvars");
    tokio::fs::write(&tfvars_path, &tfvars).await.with_path(&tfvars_path)?;

    let result: Result<(BTreeMap<String, Value>, Infrastructure)> = async {
        run_terraform(config, &workdir, &["init", "-input=false"], cancel).await?;
        run_terraform(
            config,
            &workdir,
            &["apply", "-auto-approve", "-input=false", "-var-file=terraform.tfvars"],
            cancel,
        )
        .await?;
        let raw_outputs = run_terraform(config, &workdir, &["output", "-json"], cancel).await?;
        let outputs = parse_outputs(&raw_outputs)?;
        let infrastructure = extract_infrastructure(&outputs, &region);
        Ok((outputs, infrastructure))
    }
    .await;

    let (outputs, infrastructure) = match result {
        Ok(pair) => pair,
        Err(e) => {
            cleanup_workspace(&workdir).await;
            return Err(e);
        }
    };

    cleanup_workspace(&workdir).await;

    Ok(IacOutcome {
        outputs,
        infrastructure,
        tfvars,
    })
}

/// Tears a stack down. A no-op if no remote state was ever recorded
/// (never deployed, or already destroyed) — `destroy` is safe to call
/// speculatively.
pub async fn destroy(
    provider: &dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let state_key = state_key_for(stack);
    if !provider.head_object(&state_key, cancel).await? {
        return Ok(());
    }

    let (bucket, region) = bucket_and_region(provider).await?;
    let workdir = prepare_workspace(config, stack, base, &bucket, &region).await?;

    let result = async {
        run_terraform(config, &workdir, &["init", "-input=false"], cancel).await?;
        run_terraform(config, &workdir, &["destroy", "-auto-approve", "-input=false"], cancel).await
    }
    .await;

    if let Err(e) = result {
        cleanup_workspace(&workdir).await;
        return Err(e);
    }

    provider.delete_object(&state_key, cancel).await?;
    cleanup_workspace(&workdir).await;
    Ok(())
}

/// Scale procedure: rewrite `worker_desired_count` in the saved
/// tfvars and re-apply. Fails fast with [`Error::MissingSavedTfvars`] when
/// there is nothing saved to rewrite — scaling before a first deploy is
/// not a supported transition.
pub async fn scale(
    provider: &dyn Provider,
    config: &ControllerConfig,
    stack: Stack,
    base: &str,
    saved_tfvars: Option<&str>,
    worker_desired_count: u32,
    cancel: &CancellationToken,
) -> Result<IacOutcome> {
    let saved_tfvars = saved_tfvars.ok_or(Error::MissingSavedTfvars)?;
    let (bucket, region) = bucket_and_region(provider).await?;
    let workdir = prepare_workspace(config, stack, base, &bucket, &region).await?;

    let tfvars = tfvars::rewrite_worker_desired_count(saved_tfvars, worker_desired_count);
    let tfvars_path = workdir.join("terraform.tfvars");
    tokio::fs::write(&tfvars_path, &tfvars).await.with_path(&tfvars_path)?;

    let result: Result<(BTreeMap<String, Value>, Infrastructure)> = async {
        run_terraform(config, &workdir, &["init", "-input=false"], cancel).await?;
        run_terraform(
            config,
            &workdir,
            &["apply", "-auto-approve", "-input=false", "-var-file=terraform.tfvars"],
            cancel,
        )
        .await?;
        let raw_outputs = run_terraform(config, &workdir, &["output", "-json"], cancel).await?;
        let outputs = parse_outputs(&raw_outputs)?;
        let infrastructure = extract_infrastructure(&outputs, &region);
        Ok((outputs, infrastructure))
    }
    .await;

    let (outputs, infrastructure) = match result {
        Ok(pair) => pair,
        Err(e) => {
            cleanup_workspace(&workdir).await;
            return Err(e);
        }
    };

    cleanup_workspace(&workdir).await;

    Ok(IacOutcome {
        outputs,
        infrastructure,
        tfvars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fs::FsProvider;
    use serde_json::json;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn parses_terraform_output_json_shape() {
        let raw = r#"{"cluster_name":{"value":"demo-mock","type":"string","sensitive":false},"urls":{"value":["https://a"],"type":"list"}}"#;
        let outputs = parse_outputs(raw).unwrap();
        assert_eq!(outputs["cluster_name"], json!("demo-mock"));
        let infra = extract_infrastructure(&outputs, "us-east-1");
        assert_eq!(infra.cluster.as_deref(), Some("demo-mock"));
        assert_eq!(infra.urls, vec!["https://a".to_string()]);
        assert_eq!(infra.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn workspace_names_differ_by_stack_and_always_carry_the_prefix() {
        let mock = workspace_name(Stack::Mock, "demo");
        let lt = workspace_name(Stack::LoadTest, "demo");
        assert_ne!(mock, lt);
        assert!(mock.starts_with(WORKSPACE_PREFIX));
        assert!(lt.starts_with(WORKSPACE_PREFIX));
    }

    #[tokio::test]
    async fn cleanup_refuses_directories_without_the_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let stray = tmp.path().join("not-ours");
        tokio::fs::create_dir_all(&stray).await.unwrap();
        cleanup_workspace(&stray).await;
        assert!(stray.exists());
    }

    #[tokio::test]
    async fn prepare_workspace_wires_the_s3_backend_at_the_stack_state_key() {
        let config = ControllerConfig {
            workdir_base: tempfile::tempdir().unwrap().into_path(),
            ..Default::default()
        };
        let workdir = prepare_workspace(&config, Stack::Mock, "demo", "demo-bucket", "us-west-2")
            .await
            .unwrap();
        let backend = tokio::fs::read_to_string(workdir.join("backend.tf")).await.unwrap();
        assert!(backend.contains("backend \"s3\""));
        assert!(backend.contains("bucket  = \"demo-bucket\""));
        assert!(backend.contains(&format!("key     = \"{}\"", naming::terraform_state_key())));
        assert!(backend.contains("region  = \"us-west-2\""));
        assert!(backend.contains("encrypt = true"));
    }

    #[tokio::test]
    async fn destroy_is_a_noop_when_the_stack_was_never_deployed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        p.init_project("demo", &cancel()).await.unwrap();
        let config = ControllerConfig {
            workdir_base: tempfile::tempdir().unwrap().into_path(),
            ..Default::default()
        };

        destroy(&p, &config, Stack::Mock, "demo", &cancel()).await.unwrap();
    }

    #[tokio::test]
    async fn scale_without_saved_tfvars_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        p.init_project("demo", &cancel()).await.unwrap();
        let config = ControllerConfig {
            workdir_base: tempfile::tempdir().unwrap().into_path(),
            ..Default::default()
        };
        let err = scale(&p, &config, Stack::Mock, "demo", None, 3, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSavedTfvars));
    }
}
