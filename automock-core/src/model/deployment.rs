//! `DeploymentMetadata` — one per stack.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    None,
    Deploying,
    Deployed,
    Failed,
    Destroyed,
}

impl Default for DeploymentStatus {
    fn default() -> Self {
        DeploymentStatus::None
    }
}

/// Extracted infrastructure facts the controller pulls out of the IaC
/// output tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Infrastructure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alb_dns: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Accumulated `extras` bag. Only `tfvars` is load-bearing today (the
/// scale procedure reads it back verbatim); kept as an open map so a
/// future extra doesn't require a migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Extras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tfvars: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentMetadata {
    pub project_name: String,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroyed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_expiry: Option<u64>,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub extras: Extras,
}

impl DeploymentMetadata {
    pub fn new(project_name: impl Into<String>) -> Self {
        DeploymentMetadata {
            project_name: project_name.into(),
            ..Default::default()
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.status == DeploymentStatus::Deployed
    }

    /// Seconds remaining on the TTL, 0 if unset or already past.
    pub fn ttl_remaining(&self, now_unix: u64) -> u64 {
        match self.ttl_expiry {
            Some(expiry) if expiry > now_unix => expiry - now_unix,
            _ => 0,
        }
    }
}
