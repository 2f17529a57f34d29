use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use http::Uri;
use tokio::io;

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for object contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for object contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// Object metadata common to every driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// When the object was written.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides access to objects addressed by bucket and path.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver, used in errors and traces.
    fn name(&self) -> &'static str;

    /// The URL scheme which addresses objects held by this driver.
    fn scheme(&self) -> &str;

    /// Get the metadata for an object.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Write an object, reading its contents from `reader`.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Read an object into `writer`.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// Split a `<scheme>://<bucket>/<path>` url into its bucket and path.
    fn parse_url<'u>(&self, url: &'u Uri) -> Result<(&'u str, &'u Utf8Path), StorageError> {
        if url.scheme_str() != Some(self.scheme()) {
            return Err(StorageError::new(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!(
                    "invalid scheme: expected {expected}, got {actual}",
                    expected = self.scheme(),
                    actual = url.scheme_str().unwrap_or_default()
                ),
            ));
        }

        let bucket = url.host().ok_or_else(|| {
            StorageError::new(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("missing bucket in url {url}"),
            )
        })?;
        let remote = Utf8Path::new(url.path().trim_start_matches('/'));

        Ok((bucket, remote))
    }
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    fn scheme(&self) -> &str {
        self.deref().scheme()
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    static_assertions::assert_obj_safe!(Driver);

    #[test]
    fn parse_url_splits_bucket_and_path() {
        let driver = MemoryStorage::new();
        let url: Uri = "memory://artifacts/builds/42/deploy-manifest.json"
            .parse()
            .unwrap();
        let (bucket, remote) = driver.parse_url(&url).unwrap();
        assert_eq!(bucket, "artifacts");
        assert_eq!(remote, Utf8Path::new("builds/42/deploy-manifest.json"));
    }

    #[test]
    fn parse_url_rejects_other_schemes() {
        let driver = MemoryStorage::new();
        let url: Uri = "local://artifacts/x".parse().unwrap();
        let error = driver.parse_url(&url).unwrap_err();
        assert_eq!(error.kind(), StorageErrorKind::InvalidRequest);
    }
}
