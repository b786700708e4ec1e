//! Object store port (driven/secondary port)
//!
//! Presents a minimal, content-addressed view of a remote namespace rooted
//! at a bucket and key prefix. The primary implementation targets S3, but
//! the trait is provider-agnostic.
//!
//! ## Contract notes
//!
//! - Keys are forward-slash separated regardless of host OS; listing
//!   results come back with the adapter's configured prefix stripped.
//! - `upload` takes the source as a path so adapters can stream the file
//!   without buffering it; the caller has already computed size and digest
//!   into `metadata`.
//! - `download` hands back a byte stream the caller must drain; metadata
//!   is populated from response headers.
//! - Implementations classify failures into the [`SyncError`] taxonomy at
//!   this boundary; the retry policy never inspects provider error types.

use std::path::Path;

use tokio::io::AsyncRead;

use crate::domain::{FileInfo, FileMetadata, SyncError};

/// Streaming body returned by [`ObjectStore::download`].
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Port trait for object storage operations.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the file at `source` under `key`.
    ///
    /// The adapter sets Content-Length from `metadata.size`, the integrity
    /// header from `metadata.digest_hex` and stamps auxiliary metadata
    /// (upload time, original path, digest, permissions).
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        metadata: &FileMetadata,
    ) -> Result<(), SyncError>;

    /// Downloads the object at `key`, returning its body and metadata.
    ///
    /// `metadata.digest_hex` is derived from the strong entity tag when it
    /// denotes a single-part digest, otherwise left empty.
    async fn download(&self, key: &str) -> Result<(ObjectBody, FileMetadata), SyncError>;

    /// Removes the object at `key`.
    async fn delete(&self, key: &str) -> Result<(), SyncError>;

    /// Lists all objects under `prefix`, paginating transparently.
    ///
    /// Never returns a partial listing on success.
    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, SyncError>;

    /// Retrieves metadata for `key` without fetching the body.
    async fn head(&self, key: &str) -> Result<FileMetadata, SyncError>;

    /// Checks whether `key` exists.
    ///
    /// A not-found result maps to `Ok(false)`, not an error.
    async fn exists(&self, key: &str) -> Result<bool, SyncError> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal store whose head() always reports missing objects.
    struct EmptyStore;

    #[async_trait::async_trait]
    impl ObjectStore for EmptyStore {
        async fn upload(
            &self,
            _key: &str,
            _source: &Path,
            _metadata: &FileMetadata,
        ) -> Result<(), SyncError> {
            Ok(())
        }

        async fn download(&self, key: &str) -> Result<(ObjectBody, FileMetadata), SyncError> {
            Err(SyncError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), SyncError> {
            Ok(())
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<FileInfo>, SyncError> {
            Ok(Vec::new())
        }

        async fn head(&self, key: &str) -> Result<FileMetadata, SyncError> {
            Err(SyncError::NotFound(key.to_string()))
        }
    }

    #[tokio::test]
    async fn exists_maps_not_found_to_false() {
        let store = EmptyStore;
        assert!(!store.exists("backup/a.txt").await.unwrap());
    }

    /// Store whose head() fails with a transport error.
    struct BrokenStore;

    #[async_trait::async_trait]
    impl ObjectStore for BrokenStore {
        async fn upload(
            &self,
            _key: &str,
            _source: &Path,
            _metadata: &FileMetadata,
        ) -> Result<(), SyncError> {
            Err(SyncError::Transport("down".into()))
        }

        async fn download(&self, _key: &str) -> Result<(ObjectBody, FileMetadata), SyncError> {
            Err(SyncError::Transport("down".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), SyncError> {
            Err(SyncError::Transport("down".into()))
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<FileInfo>, SyncError> {
            Err(SyncError::Transport("down".into()))
        }

        async fn head(&self, _key: &str) -> Result<FileMetadata, SyncError> {
            Err(SyncError::Transport("down".into()))
        }
    }

    #[tokio::test]
    async fn exists_propagates_transport_errors() {
        let store = BrokenStore;
        let err = store.exists("backup/a.txt").await.unwrap_err();
        assert!(err.is_transient());
    }
}
