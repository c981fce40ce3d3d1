//! `FsProvider` — a filesystem-backed [`Provider`] implementation.
//!
//! This is the reference/test double: every testable property here is
//! proved against this provider instead of a real cloud account. It is
//! also usable as a genuine local/offline backend (`--local` on the CLI),
//! not just a test stub — there is no feature flag segregating "real"
//! behaviour from it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, IoContext, Result};

use super::{ObjectEntry, ObjectPage, Provider};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// One bucket-equivalent directory tree per [`FsProvider`] instance.
pub struct FsProvider {
    root: PathBuf,
    bucket: Option<String>,
    region: String,
    page_size: usize,
    // Regions bucket directories were "created" in, keyed by bucket name,
    // so `get_bucket_region` can disagree with `region` until a rebind —
    // simulates the redirect-on-region-mismatch hazard real buckets exhibit.
    bucket_regions: Mutex<BTreeMap<String, String>>,
}

impl FsProvider {
    pub fn new(root: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        FsProvider {
            root: root.into(),
            bucket: None,
            region: region.into(),
            page_size: DEFAULT_PAGE_SIZE,
            bucket_regions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Test hook: records that `name` actually lives in `region`, whether
    /// or not this provider's own `region` field agrees.
    pub fn seed_bucket_region(&self, name: &str, region: &str) {
        self.bucket_regions
            .lock()
            .unwrap()
            .insert(name.to_string(), region.to_string());
    }

    fn bucket_dir(&self) -> Result<PathBuf> {
        let bucket = self
            .bucket
            .as_ref()
            .ok_or_else(|| Error::not_found("bucket", "<unbound>"))?;
        Ok(self.root.join(bucket))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir()?.join(key))
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Transient {
                cause: "operation cancelled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for FsProvider {
    async fn init_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        let name = crate::naming::generate_storage_name(base)?;
        let dir = self.root.join(&name);
        if dir.exists() {
            return Err(Error::AlreadyExists {
                kind: "bucket",
                name,
            });
        }
        tokio::fs::create_dir_all(&dir).await.with_path(&dir)?;
        self.bucket_regions
            .lock()
            .unwrap()
            .insert(name.clone(), self.region.clone());
        self.bucket = Some(name);
        Ok(())
    }

    async fn project_exists(&self, base: &str, cancel: &CancellationToken) -> Result<bool> {
        Self::check_cancelled(cancel)?;
        // Any directory whose extracted base matches is considered the project.
        let mut entries = tokio::fs::read_dir(&self.root).await.with_path(&self.root)?;
        while let Some(entry) = entries.next_entry().await.with_path(&self.root)? {
            if let Some(name) = entry.file_name().to_str() {
                if crate::naming::extract_base(name) == base {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn resolve_project_bucket(&self, base: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        Self::check_cancelled(cancel)?;
        let mut entries = tokio::fs::read_dir(&self.root).await.with_path(&self.root)?;
        while let Some(entry) = entries.next_entry().await.with_path(&self.root)? {
            if let Some(name) = entry.file_name().to_str() {
                if crate::naming::extract_base(name) == base {
                    return Ok(Some(name.to_string()));
                }
            }
        }
        Ok(None)
    }

    fn bind(&mut self, storage_name: &str) {
        self.bucket = Some(storage_name.to_string());
    }

    async fn delete_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        let dir = self.bucket_dir()?;
        let _ = base;
        tokio::fs::remove_dir_all(&dir).await.with_path(&dir)?;
        if let Some(bucket) = self.bucket.take() {
            self.bucket_regions.lock().unwrap().remove(&bucket);
        }
        Ok(())
    }

    async fn get_region(&self) -> Result<String> {
        Ok(self.region.clone())
    }

    async fn get_caller_identity(&self, cancel: &CancellationToken) -> Result<String> {
        Self::check_cancelled(cancel)?;
        Ok("arn:local:fs::000000000000:user/local-operator".to_string())
    }

    async fn validate_credentials(&self, cancel: &CancellationToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        Ok(())
    }

    async fn get_bucket_region(&self, name: &str, cancel: &CancellationToken) -> Result<String> {
        Self::check_cancelled(cancel)?;
        Ok(self
            .bucket_regions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.region.clone()))
    }

    async fn rebind_region(&mut self, region: &str) -> Result<()> {
        self.region = region.to_string();
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        Self::check_cancelled(cancel)?;
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_path(parent)?;
        }
        tokio::fs::write(&path, bytes).await.with_path(&path)
    }

    async fn get_object(&self, key: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        Self::check_cancelled(cancel)?;
        let path = self.key_path(key)?;
        if !path.exists() {
            return Err(Error::not_found("object", key));
        }
        tokio::fs::read(&path).await.with_path(&path)
    }

    async fn head_object(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        Self::check_cancelled(cancel)?;
        Ok(self.key_path(key)?.exists())
    }

    async fn list_prefix(
        &self,
        prefix: &str,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ObjectPage> {
        Self::check_cancelled(cancel)?;
        let bucket_dir = self.bucket_dir()?;
        let prefix_dir = bucket_dir.join(prefix);
        let mut all_entries = Vec::new();
        if prefix_dir.exists() {
            for entry in walkdir::WalkDir::new(&prefix_dir)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    if let Ok(rel) = entry.path().strip_prefix(&bucket_dir) {
                        let key = rel.to_string_lossy().replace('\\', "/");
                        let meta = entry.metadata().ok();
                        let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
                        let last_modified = meta
                            .and_then(|m| m.modified().ok())
                            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        all_entries.push(ObjectEntry {
                            key,
                            size,
                            last_modified,
                        });
                    }
                }
            }
        }
        all_entries.sort_by(|a, b| a.key.cmp(&b.key));

        let start = page_token
            .map(|t| t.parse::<usize>().unwrap_or(0))
            .unwrap_or(0);
        let end = (start + self.page_size).min(all_entries.len());
        let entries = all_entries.get(start..end).unwrap_or_default().to_vec();
        let next_token = if end < all_entries.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(ObjectPage { entries, next_token })
    }

    async fn delete_object(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        let path = self.key_path(key)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await.with_path(&path)?;
        }
        Ok(())
    }

    async fn delete_all_versions_with_prefix(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let entries = self.list_prefix_all(prefix, cancel).await?;
        let mut n = 0u64;
        for entry in entries {
            self.delete_object(&entry.key, cancel).await?;
            n += 1;
        }
        // Clean up now-empty directories so an empty-bucket check is accurate.
        let bucket_dir = self.bucket_dir()?;
        let prefix_dir = bucket_dir.join(prefix);
        if prefix_dir.exists() {
            remove_empty_dirs(&prefix_dir);
        }
        Ok(n)
    }

    async fn delete_all_versions_for_key(&self, key: &str, cancel: &CancellationToken) -> Result<u64> {
        Self::check_cancelled(cancel)?;
        if self.head_object(key, cancel).await? {
            self.delete_object(key, cancel).await?;
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn bucket_name(&self) -> Option<&str> {
        self.bucket.as_deref()
    }
}

fn remove_empty_dirs(dir: &Path) {
    if let Ok(mut entries) = std::fs::read_dir(dir) {
        let has_entries = entries.next().is_some();
        if !has_entries {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1");
        p.init_project("demo", &cancel()).await.unwrap();
        p.put_object("configs/demo/current.json", b"{}".to_vec(), "application/json", &cancel())
            .await
            .unwrap();
        let bytes = p.get_object("configs/demo/current.json", &cancel()).await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn list_prefix_paginates_exhaustively() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-east-1").with_page_size(3);
        p.init_project("demo", &cancel()).await.unwrap();
        for i in 0..10 {
            p.put_object(&format!("configs/demo/versions/v{i}.json"), b"{}".to_vec(), "application/json", &cancel())
                .await
                .unwrap();
        }
        let entries = p.list_prefix_all("configs/demo/versions/", &cancel()).await.unwrap();
        assert_eq!(entries.len(), 10);
    }

    #[tokio::test]
    async fn region_mismatch_requires_rebind() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = FsProvider::new(tmp.path(), "us-west-2");
        p.bind("auto-mock-demo-abcdef");
        p.seed_bucket_region("auto-mock-demo-abcdef", "eu-west-1");
        let actual = p.get_bucket_region("auto-mock-demo-abcdef", &cancel()).await.unwrap();
        assert_ne!(actual, p.get_region().await.unwrap());
        p.rebind_region(&actual).await.unwrap();
        assert_eq!(p.get_region().await.unwrap(), "eu-west-1");
    }
}
