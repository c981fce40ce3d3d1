//! `automock` CLI dispatch: wires a [`Cli`] invocation to the right
//! `automock_core` controller/bundle operation and prints the result. The
//! `clap` surface lives in this crate; the actual logic lives in the
//! library crates underneath it.

pub mod cli;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use automock_core::config::ControllerConfig;
use automock_core::provider::fs::FsProvider;
use automock_core::provider::Provider;
use automock_core::{bundle, controller};
use automock_provider_aws::AwsProvider;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use cli::Cli;

/// Installs a `tracing-subscriber` formatter reading `RUST_LOG`, defaulting
/// to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn build_provider(cli: &Cli) -> Result<Box<dyn Provider>> {
    let region = cli
        .region
        .clone()
        .or_else(|| std::env::var("AUTOMOCK_REGION").ok())
        .unwrap_or_else(|| "us-east-1".to_string());

    if let Some(dir) = &cli.local {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating local provider root {}", dir.display()))?;
        Ok(Box::new(FsProvider::new(dir, region)))
    } else {
        Ok(Box::new(AwsProvider::new(region).await))
    }
}

fn build_config(cli: &Cli) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    if let Some(region) = &cli.region {
        config.default_region = region.clone();
    }
    config
}

/// A `CancellationToken` tripped by Ctrl-C, so a long `terraform apply`
/// can be interrupted cleanly instead of leaving an orphaned workspace.
fn install_ctrl_c_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, cancelling in-flight operation");
            child.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_options(path: &Option<PathBuf>) -> Result<BTreeMap<String, serde_json::Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {} as a JSON object of tfvars", path.display()))
}

pub async fn run(cli: Cli) -> Result<()> {
    let cancel = install_ctrl_c_handler();
    let config = build_config(&cli);
    let mut provider = build_provider(&cli).await?;
    let base = cli.base.clone();

    match &cli.command {
        cli::Commands::Init => {
            let name = controller::init(provider.as_mut(), &base, &cancel).await?;
            println!("initialised project bucket: {name}");
        }

        cli::Commands::Deploy { stack, options } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let options = load_options(options)?;
            let metadata = controller::deploy(
                provider.as_mut(),
                &config,
                (*stack).into(),
                &base,
                &base,
                options,
                &cancel,
            )
            .await?;
            print_json(&metadata)?;
        }

        cli::Commands::Destroy { stack } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let metadata =
                controller::destroy(provider.as_mut(), &config, (*stack).into(), &base, &base, &cancel).await?;
            print_json(&metadata)?;
        }

        cli::Commands::Scale { stack, worker_desired_count } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let metadata = controller::scale(
                provider.as_mut(),
                &config,
                (*stack).into(),
                &base,
                &base,
                *worker_desired_count,
                &cancel,
            )
            .await?;
            print_json(&metadata)?;
        }

        cli::Commands::PurgeLoadtest => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let outcome = controller::purge_loadtest(provider.as_mut(), &config, &base, &base, &cancel).await?;
            print_json(&outcome)?;
        }

        cli::Commands::Delete => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let outcome = controller::delete_project(provider.as_mut(), &config, &base, &base, &cancel).await?;
            print_json(&outcome)?;
        }

        cli::Commands::Status => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let status = controller::status(provider.as_ref(), &base, &cancel).await?;
            print_json(&status)?;
        }

        cli::Commands::ExtendTtl { stack, hours } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let metadata = controller::extend_ttl(provider.as_ref(), (*stack).into(), *hours, &cancel).await?;
            print_json(&metadata)?;
        }

        cli::Commands::UploadLoadtest { dir } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let input = bundle::scan_bundle_dir(dir).await?;
            let (pointer, version) = bundle::upload_bundle(provider.as_ref(), &base, &base, input, &cancel).await?;
            println!("uploaded bundle {} (version {})", pointer.bundle_id, version.version);
        }

        cli::Commands::DownloadLoadtest { dest } => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let path = bundle::download_bundle(provider.as_ref(), &base, dest, &cancel).await?;
            println!("downloaded load-test bundle to {}", path.display());
        }

        cli::Commands::RollbackLoadtest => {
            controller::bind_existing_project(provider.as_mut(), &base, &cancel).await?;
            let (pointer, deleted) = bundle::delete_pointer_rollback(provider.as_ref(), &base, &cancel).await?;
            match pointer {
                Some(p) => {
                    println!("rolled back to bundle {} ({deleted} object(s) removed)", p.bundle_id);
                }
                None => {
                    println!("no predecessor bundle; active pointer cleared ({deleted} object(s) removed)");
                }
            }
        }
    }

    Ok(())
}
