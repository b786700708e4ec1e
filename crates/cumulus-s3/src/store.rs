//! S3 implementation of the object-store port
//!
//! Presents the bucket+prefix namespace with integrity metadata:
//! - Content-MD5 on upload (base64 of the raw digest bytes)
//! - auxiliary object metadata: `original-path`, `upload-time`,
//!   `content-type`, `permissions`, `md5-hash`
//! - digest recovery from the strong entity tag on head/list/download when
//!   the object was uploaded in a single part
//!
//! Construction validates bucket reachability with a head-bucket call;
//! failure is fatal to the service.

use std::path::Path;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ServerSideEncryption, StorageClass};
use aws_sdk_s3::Client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

use cumulus_core::domain::{join_key, FileInfo, FileMetadata, SyncError};
use cumulus_core::ports::{ObjectBody, ObjectStore};

// ============================================================================
// Options
// ============================================================================

/// Connection settings for the S3 adapter.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    /// Override base URL for S3-compatible services (MinIO, etc.)
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Storage class for uploads; empty uses the bucket default
    pub storage_class: String,
    /// Request SSE-S3 encryption on every upload
    pub server_side_encryption: bool,
    /// Per-operation timeout; zero disables the explicit timeout
    pub timeout: Duration,
}

// ============================================================================
// S3ObjectStore
// ============================================================================

/// Object-store adapter over `aws-sdk-s3`.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
    storage_class: String,
    server_side_encryption: bool,
}

impl S3ObjectStore {
    /// Builds the client and verifies bucket access.
    ///
    /// Empty credentials defer to the SDK's environment/instance-role
    /// chain. An endpoint override switches to path-style addressing for
    /// S3-compatible services.
    pub async fn connect(options: S3Options) -> Result<Self, SyncError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if !options.region.is_empty() {
            loader = loader.region(Region::new(options.region.clone()));
        }
        if !options.access_key_id.is_empty() && !options.secret_access_key.is_empty() {
            let session_token =
                (!options.session_token.is_empty()).then(|| options.session_token.clone());
            loader = loader.credentials_provider(Credentials::new(
                &options.access_key_id,
                &options.secret_access_key,
                session_token,
                None,
                "cumulus",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if !options.endpoint.is_empty() {
            builder = builder
                .endpoint_url(&options.endpoint)
                .force_path_style(true);
        }
        if options.timeout > Duration::ZERO {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(options.timeout)
                    .build(),
            );
        }

        let store = Self {
            client: Client::from_conf(builder.build()),
            bucket: options.bucket,
            prefix: options.prefix,
            storage_class: options.storage_class,
            server_side_encryption: options.server_side_encryption,
        };

        store.verify_bucket_access().await?;
        Ok(store)
    }

    /// Head-bucket probe run once at startup.
    async fn verify_bucket_access(&self) -> Result<(), SyncError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                SyncError::Config(format!(
                    "cannot access bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(bucket = %self.bucket, "Verified bucket access");
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        metadata: &FileMetadata,
    ) -> Result<(), SyncError> {
        let full_key = self.full_key(key);

        let body = ByteStream::from_path(source).await.map_err(|e| {
            SyncError::local_io(
                source,
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(body)
            .content_length(metadata.size as i64)
            .metadata("original-path", &full_key)
            .metadata(
                "upload-time",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .metadata("content-type", &metadata.content_type)
            .metadata("permissions", &metadata.permissions)
            .metadata("md5-hash", &metadata.digest_hex);

        if !metadata.content_type.is_empty() {
            request = request.content_type(&metadata.content_type);
        }
        match content_md5_header(&metadata.digest_hex) {
            Some(header) => request = request.content_md5(header),
            None if !metadata.digest_hex.is_empty() => {
                warn!(
                    digest = %metadata.digest_hex,
                    "Invalid digest format, skipping Content-MD5 header"
                );
            }
            None => {}
        }
        if !self.storage_class.is_empty() {
            request = request.storage_class(StorageClass::from(self.storage_class.as_str()));
        }
        if self.server_side_encryption {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        request
            .send()
            .await
            .map_err(|e| map_sdk_error("upload", &full_key, e))?;

        info!(
            key = %full_key,
            size = metadata.size,
            digest = %metadata.digest_hex,
            "Uploaded object"
        );
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<(ObjectBody, FileMetadata), SyncError> {
        let full_key = self.full_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("download", &full_key, e))?;

        let permissions = response
            .metadata()
            .and_then(|m| m.get("permissions"))
            .cloned()
            .unwrap_or_default();

        let metadata = FileMetadata {
            size: response.content_length().unwrap_or(0) as u64,
            mtime: response.last_modified().and_then(to_chrono),
            digest_hex: etag_digest(response.e_tag()),
            content_type: response.content_type().unwrap_or_default().to_string(),
            permissions,
            encrypted: response.server_side_encryption().is_some(),
        };

        debug!(key = %full_key, size = metadata.size, "Downloading object");

        let body = Box::new(response.body.into_async_read());
        Ok((body, metadata))
    }

    async fn delete(&self, key: &str) -> Result<(), SyncError> {
        let full_key = self.full_key(key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete", &full_key, e))?;

        info!(key = %full_key, "Deleted object");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, SyncError> {
        let full_prefix = self.full_key(prefix);

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_prefix)
            .into_paginator()
            .send();

        let mut files = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_sdk_error("list", &full_prefix, e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let key = strip_key_prefix(&self.prefix, key);
                files.push(FileInfo {
                    size: object.size().unwrap_or(0) as u64,
                    mtime: object.last_modified().and_then(to_chrono),
                    digest_hex: etag_digest(object.e_tag()),
                    is_dir: key.ends_with('/'),
                    key,
                });
            }
        }

        debug!(prefix = %full_prefix, count = files.len(), "Listed objects");
        Ok(files)
    }

    async fn head(&self, key: &str) -> Result<FileMetadata, SyncError> {
        let full_key = self.full_key(key);

        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("head", &full_key, e))?;

        let permissions = response
            .metadata()
            .and_then(|m| m.get("permissions"))
            .cloned()
            .unwrap_or_default();

        Ok(FileMetadata {
            size: response.content_length().unwrap_or(0) as u64,
            mtime: response.last_modified().and_then(to_chrono),
            digest_hex: etag_digest(response.e_tag()),
            content_type: response.content_type().unwrap_or_default().to_string(),
            permissions,
            encrypted: response.server_side_encryption().is_some(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a hex digest into the base64 Content-MD5 header value.
///
/// Returns `None` when the digest is empty or not valid hex.
fn content_md5_header(digest_hex: &str) -> Option<String> {
    if digest_hex.is_empty() {
        return None;
    }
    hex::decode(digest_hex).ok().map(|raw| BASE64.encode(raw))
}

/// Extracts a usable digest from a strong entity tag.
///
/// Multipart uploads carry a dash-suffixed tag that is not a payload
/// digest; those yield an empty string.
fn etag_digest(etag: Option<&str>) -> String {
    let Some(etag) = etag else {
        return String::new();
    };
    let trimmed = etag.trim_matches('"');
    if trimmed.contains('-') {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Removes the adapter's configured prefix from a listed key.
fn strip_key_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    let trimmed = prefix.trim_end_matches('/');
    match key.strip_prefix(trimmed) {
        Some(rest) => rest.trim_start_matches('/').to_string(),
        None => key.to_string(),
    }
}

/// Converts an SDK timestamp to a UTC datetime.
fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Classifies an SDK error into the shared taxonomy.
///
/// Connection-level failures and 5xx/429 responses are transient; 404s
/// map to NotFound; everything else is permanent for the task.
fn map_sdk_error<E>(op: &str, key: &str, err: SdkError<E, HttpResponse>) -> SyncError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{op} {key}: {}", DisplayErrorContext(&err));

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            SyncError::Transport(message)
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let code = ctx.err().meta().code().unwrap_or_default();
            if status == 404 || code == "NoSuchKey" || code == "NotFound" {
                SyncError::NotFound(key.to_string())
            } else if status >= 500 || status == 429 {
                SyncError::Transport(message)
            } else {
                SyncError::Permanent(message)
            }
        }
        _ => SyncError::Permanent(message),
    }
}

// ============================================================================
// Unit tests
// ============================================================================
