//! AWS binding of `automock_core::Provider`: S3 for object storage and
//! bucket lifecycle, STS for identity. This is the only crate in the
//! workspace allowed to name an AWS SDK type — everything above `Provider`
//! stays cloud-agnostic.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier, ServerSideEncryption,
};
use aws_types::region::Region;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use automock_core::error::{Error, Result};
use automock_core::naming;
use automock_core::provider::{ObjectEntry, ObjectPage, Provider};

pub struct AwsProvider {
    s3_client: aws_sdk_s3::Client,
    sts_client: aws_sdk_sts::Client,
    region: String,
    bucket: Option<String>,
}

impl AwsProvider {
    pub async fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let shared_config = aws_config::from_env()
            .region(Region::new(region.clone()))
            .load()
            .await;
        AwsProvider {
            s3_client: aws_sdk_s3::Client::new(&shared_config),
            sts_client: aws_sdk_sts::Client::new(&shared_config),
            region,
            bucket: None,
        }
    }

    fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .ok_or_else(|| Error::not_found("bucket", "<unbound>"))
    }
}

/// Races an SDK call against cancellation and collapses its (verbose,
/// generic-heavy) error type into this crate's taxonomy. Nothing upstream
/// of this module ever sees an `aws_sdk_*` error type.
async fn call<F, T, E>(fut: F, cancel: &CancellationToken) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    tokio::select! {
        res = fut => res.map_err(|e| Error::Other(anyhow::anyhow!(e.to_string()))),
        _ = cancel.cancelled() => Err(Error::Transient { cause: "operation cancelled".to_string() }),
    }
}

fn is_not_found(e: &Error) -> bool {
    match e {
        Error::Other(inner) => {
            let msg = inner.to_string();
            msg.contains("NoSuchKey") || msg.contains("NotFound") || msg.contains("404")
        }
        _ => false,
    }
}

/// Pages through `list_object_versions` and collects an identifier for
/// every version and delete marker under `prefix` — on a versioned
/// bucket, deleting only the current-version listing leaves prior
/// versions behind (a plain `delete_objects` just adds another delete
/// marker).
async fn list_version_identifiers(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: &str,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectIdentifier>> {
    let mut identifiers = Vec::new();
    let mut key_marker: Option<String> = None;
    let mut version_id_marker: Option<String> = None;

    loop {
        let mut request = client.list_object_versions().bucket(bucket).prefix(prefix).max_keys(1000);
        if let Some(km) = &key_marker {
            request = request.key_marker(km);
        }
        if let Some(vm) = &version_id_marker {
            request = request.version_id_marker(vm);
        }
        let output = call(request.send(), cancel).await?;

        for v in output.versions() {
            let id = ObjectIdentifier::builder()
                .set_key(v.key().map(String::from))
                .set_version_id(v.version_id().map(String::from))
                .build()
                .map_err(|e| Error::Other(anyhow::anyhow!(e.to_string())))?;
            identifiers.push(id);
        }
        for m in output.delete_markers() {
            let id = ObjectIdentifier::builder()
                .set_key(m.key().map(String::from))
                .set_version_id(m.version_id().map(String::from))
                .build()
                .map_err(|e| Error::Other(anyhow::anyhow!(e.to_string())))?;
            identifiers.push(id);
        }

        if output.is_truncated().unwrap_or(false) {
            key_marker = output.next_key_marker().map(String::from);
            version_id_marker = output.next_version_id_marker().map(String::from);
        } else {
            break;
        }
    }

    Ok(identifiers)
}

async fn delete_identifiers(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    identifiers: Vec<ObjectIdentifier>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut deleted = 0u64;
    for chunk in identifiers.chunks(1000) {
        if chunk.is_empty() {
            continue;
        }
        let delete = Delete::builder()
            .set_objects(Some(chunk.to_vec()))
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!(e.to_string())))?;
        call(client.delete_objects().bucket(bucket).delete(delete).send(), cancel).await?;
        deleted += chunk.len() as u64;
    }
    Ok(deleted)
}

#[async_trait]
impl Provider for AwsProvider {
    async fn init_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()> {
        let name = naming::generate_storage_name(base)?;
        if self.project_exists(base, cancel).await? {
            return Err(Error::AlreadyExists {
                kind: "bucket",
                name,
            });
        }

        let mut request = self.s3_client.create_bucket().bucket(&name);
        if self.region != "us-east-1" {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let cfg = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            request = request.create_bucket_configuration(cfg);
        }
        call(request.send(), cancel).await?;
        debug!(bucket = %name, region = %self.region, "created project bucket");
        self.bucket = Some(name);
        Ok(())
    }

    async fn project_exists(&self, base: &str, cancel: &CancellationToken) -> Result<bool> {
        let output = call(self.s3_client.list_buckets().send(), cancel).await?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .any(|name| naming::extract_base(name) == base))
    }

    async fn resolve_project_bucket(&self, base: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let output = call(self.s3_client.list_buckets().send(), cancel).await?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .find(|name| naming::extract_base(name) == base)
            .map(str::to_string))
    }

    fn bind(&mut self, storage_name: &str) {
        self.bucket = Some(storage_name.to_string());
    }

    async fn delete_project(&mut self, base: &str, cancel: &CancellationToken) -> Result<()> {
        let _ = base;
        let bucket = self.require_bucket()?.to_string();
        call(self.s3_client.delete_bucket().bucket(&bucket).send(), cancel).await?;
        self.bucket = None;
        Ok(())
    }

    async fn get_region(&self) -> Result<String> {
        Ok(self.region.clone())
    }

    async fn get_caller_identity(&self, cancel: &CancellationToken) -> Result<String> {
        let output = call(self.sts_client.get_caller_identity().send(), cancel).await?;
        Ok(output.arn().unwrap_or_default().to_string())
    }

    async fn validate_credentials(&self, cancel: &CancellationToken) -> Result<()> {
        call(self.sts_client.get_caller_identity().send(), cancel).await?;
        Ok(())
    }

    async fn get_bucket_region(&self, name: &str, cancel: &CancellationToken) -> Result<String> {
        let output = call(self.s3_client.get_bucket_location().bucket(name).send(), cancel).await?;
        let region = output
            .location_constraint()
            .map(|c| c.as_str().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());
        Ok(region)
    }

    async fn rebind_region(&mut self, region: &str) -> Result<()> {
        let shared_config = aws_config::from_env()
            .region(Region::new(region.to_string()))
            .load()
            .await;
        self.s3_client = aws_sdk_s3::Client::new(&shared_config);
        self.sts_client = aws_sdk_sts::Client::new(&shared_config);
        self.region = region.to_string();
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bucket = self.require_bucket()?;
        call(
            self.s3_client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .server_side_encryption(ServerSideEncryption::Aes256)
                .body(ByteStream::from(bytes))
                .send(),
            cancel,
        )
        .await?;
        Ok(())
    }

    async fn get_object(&self, key: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let bucket = self.require_bucket()?;
        let output = match call(self.s3_client.get_object().bucket(bucket).key(key).send(), cancel).await {
            Ok(o) => o,
            Err(e) if is_not_found(&e) => return Err(Error::not_found("object", key)),
            Err(e) => return Err(e),
        };
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!(e.to_string())))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn head_object(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let bucket = self.require_bucket()?;
        match call(self.s3_client.head_object().bucket(bucket).key(key).send(), cancel).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_prefix(
        &self,
        prefix: &str,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ObjectPage> {
        let bucket = self.require_bucket()?;
        let mut request = self.s3_client.list_objects_v2().bucket(bucket).prefix(prefix).max_keys(1000);
        if let Some(token) = page_token {
            request = request.continuation_token(token);
        }
        let output = call(request.send(), cancel).await?;
        let entries = output
            .contents()
            .iter()
            .map(|o| ObjectEntry {
                key: o.key().unwrap_or_default().to_string(),
                size: o.size().unwrap_or(0).max(0) as u64,
                last_modified: o
                    .last_modified()
                    .and_then(|t| u64::try_from(t.secs()).ok())
                    .unwrap_or(0),
            })
            .collect();
        let next_token = output.next_continuation_token().map(String::from);
        Ok(ObjectPage { entries, next_token })
    }

    async fn delete_object(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let bucket = self.require_bucket()?;
        call(self.s3_client.delete_object().bucket(bucket).key(key).send(), cancel).await?;
        Ok(())
    }

    async fn delete_all_versions_with_prefix(&self, prefix: &str, cancel: &CancellationToken) -> Result<u64> {
        let bucket = self.require_bucket()?.to_string();
        let identifiers = list_version_identifiers(&self.s3_client, &bucket, prefix, cancel).await?;
        delete_identifiers(&self.s3_client, &bucket, identifiers, cancel).await
    }

    async fn delete_all_versions_for_key(&self, key: &str, cancel: &CancellationToken) -> Result<u64> {
        let bucket = self.require_bucket()?.to_string();
        let identifiers: Vec<_> = list_version_identifiers(&self.s3_client, &bucket, key, cancel)
            .await?
            .into_iter()
            .filter(|id| id.key() == Some(key))
            .collect();
        delete_identifiers(&self.s3_client, &bucket, identifiers, cancel).await
    }

    fn bucket_name(&self) -> Option<&str> {
        self.bucket.as_deref()
    }
}
