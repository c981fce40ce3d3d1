//! Ambient configuration, loaded once at controller construction time: a
//! plain struct with defaults, overridable from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// `AUTOMOCK_NAME_PREFIX` default: the storage-name prefix.
pub const DEFAULT_NAME_PREFIX: &str = crate::naming::STORAGE_PREFIX;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Ambient credential profile environment variable name.
    pub credential_env_var: String,
    /// Optional region override environment variable name.
    pub region_env_var: String,
    /// Default region used when `region_env_var` is unset.
    pub default_region: String,
    /// Path to the IaC binary (`terraform` or `tofu`).
    pub terraform_bin: PathBuf,
    /// Base directory under which ephemeral IaC workspaces are created.
    pub workdir_base: PathBuf,
    /// Ceiling on how long a single subprocess invocation may run before
    /// the controller cancels it.
    pub subprocess_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            credential_env_var: "AWS_PROFILE".to_string(),
            region_env_var: "AUTOMOCK_REGION".to_string(),
            default_region: "us-east-1".to_string(),
            terraform_bin: env::var("AUTOMOCK_TERRAFORM_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("terraform")),
            workdir_base: env::var("AUTOMOCK_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            subprocess_timeout: Duration::from_secs(45 * 60),
        }
    }
}

impl ControllerConfig {
    /// Resolves the active region: `AUTOMOCK_REGION` env var if set, else
    /// `default_region`.
    pub fn resolve_region(&self) -> String {
        env::var(&self.region_env_var).unwrap_or_else(|_| self.default_region.clone())
    }
}
