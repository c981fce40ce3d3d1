//! The narrow capability surface every component above this layer
//! consumes. Concrete cloud bindings (object storage, identity, STS) live
//! in their own crates and implement [`Provider`]; nothing in this crate
//! ever names an SDK type.
//!
//! One trait owning a transport handle, every fallible call mapped to
//! this crate's [`Error`] taxonomy rather than the transport's own.

pub mod fs;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A single object surfaced by a prefix listing, carrying the bits of
/// S3-style `ListObjectsV2` metadata the artifact store needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Unix seconds.
    pub last_modified: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub entries: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

/// Every method takes a [`CancellationToken`] so a blocking call can be
/// cancelled mid-flight instead of run to completion.
#[async_trait]
pub trait Provider: Send + Sync {
    // -- Bucket lifecycle -------------------------------------------------

    async fn init_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()>;
    async fn project_exists(&self, base: &str, cancel: &CancellationToken) -> Result<bool>;
    async fn delete_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()>;

    /// Finds the full storage name (`<prefix>-<base>-<suffix>`) for an
    /// already-initialised project, if one exists. Callers that did not
    /// just run `init_project` in this process (every CLI invocation after
    /// the first) need this to rebind to the right bucket.
    async fn resolve_project_bucket(&self, base: &str, cancel: &CancellationToken) -> Result<Option<String>>;

    /// Binds this provider to an already-existing bucket by its full
    /// storage name, without creating anything.
    fn bind(&mut self, storage_name: &str);

    // -- Region / identity --------------------------------------------------

    async fn get_region(&self) -> Result<String>;
    async fn get_caller_identity(&self, cancel: &CancellationToken) -> Result<String>;
    async fn validate_credentials(&self, cancel: &CancellationToken) -> Result<()>;

    /// Probes the bucket's actual region. On mismatch with the provider's
    /// current region, the caller must rebuild the client via
    /// [`Provider::rebind_region`] before any write.
    async fn get_bucket_region(&self, name: &str, cancel: &CancellationToken) -> Result<String>;

    /// Rebuilds the provider's internal client bound to `region`. A no-op
    /// for providers (like [`fs::FsProvider`]) with no notion of region.
    async fn rebind_region(&mut self, region: &str) -> Result<()>;

    // -- Object I/O -----------------------------------------------------

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn get_object(&self, key: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;

    async fn head_object(&self, key: &str, cancel: &CancellationToken) -> Result<bool>;

    async fn list_prefix(
        &self,
        prefix: &str,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ObjectPage>;

    async fn delete_object(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    /// Deletes every object (and, on backends with versioning, every
    /// version and delete marker) under `prefix`. Returns the count of
    /// objects removed.
    async fn delete_all_versions_with_prefix(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Deletes every version of a single key. Returns the count removed.
    async fn delete_all_versions_for_key(&self, key: &str, cancel: &CancellationToken) -> Result<u64>;

    /// Exhaustively lists every entry under `prefix`, following
    /// continuation tokens until the listing is complete.
    async fn list_prefix_all(&self, prefix: &str, cancel: &CancellationToken) -> Result<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_prefix(prefix, token.as_deref(), cancel).await?;
            entries.extend(page.entries);
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Convenience wrapper over [`Provider::list_prefix_all`] for callers
    /// that only need the keys.
    async fn list_keys_all(&self, prefix: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self
            .list_prefix_all(prefix, cancel)
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }

    /// Bucket currently bound to this provider, if any.
    fn bucket_name(&self) -> Option<&str>;
}
