//! # Object storage
//!
//! A small driver abstraction over bucket/path addressed object stores, with
//! an in-memory driver (tests, ephemeral runs) and a local-directory driver.
//! [`Storage`] is the cheaply clonable handle the rest of the workspace uses.

use std::sync::Arc;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use http::Uri;
use serde::Deserialize;
use tokio::io;

mod driver;
mod error;
mod local;
mod memory;

pub use driver::{Driver, Metadata, Reader, Writer};
pub use error::{StorageError, StorageErrorKind};
pub use local::LocalDriver;
pub use memory::MemoryStorage;

/// Configuration selecting a storage driver.
///
/// ```toml
/// [storage]
/// local = { path = "/var/lib/promoter/objects" }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep objects in memory, pre-creating the named buckets.
    Memory {
        /// Buckets to create up front.
        #[serde(default)]
        buckets: Vec<String>,
    },

    /// Keep objects below a local directory.
    Local {
        /// Root directory; each bucket is a subdirectory.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Build the configured storage handle.
    #[tracing::instrument]
    pub fn build(self) -> Storage {
        match self {
            StorageConfig::Memory { buckets } => {
                let names: Vec<&str> = buckets.iter().map(String::as_str).collect();
                MemoryStorage::with_buckets(&names).into()
            }
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
        }
    }
}

type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// Shared handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The driver name.
    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// The url scheme of the driver.
    pub fn scheme(&self) -> &str {
        self.driver.scheme()
    }

    /// A handle scoped to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }

    /// Object metadata.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, remote).await
    }

    /// Read an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {bucket}/{remote}");
        self.driver.download(bucket, remote, writer).await
    }

    /// Read an entire object into memory.
    pub async fn get(&self, bucket: &str, remote: &Utf8Path) -> Result<Bytes, StorageError> {
        let mut buf = Vec::new();
        self.download(bucket, remote, &mut buf).await?;
        Ok(buf.into())
    }

    /// Write an object from `reader`.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name()))]
    pub async fn upload<'d, R>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {bucket}/{remote}");
        self.driver.upload(bucket, remote, reader).await
    }

    /// Write an object from an in-memory buffer.
    pub async fn put(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut reader = io::BufReader::new(data);
        self.upload(bucket, remote, &mut reader).await
    }

    /// Read the object addressed by a `<scheme>://<bucket>/<path>` url into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download_url<'d, W>(&'d self, url: &Uri, writer: &mut W) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        let (bucket, remote) = self.driver.parse_url(url)?;
        self.driver.download(bucket, remote, writer).await
    }
}

/// A [`Storage`] handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// The bucket name.
    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// The url scheme of the driver.
    pub fn scheme(&self) -> &str {
        self.driver.scheme()
    }

    /// The url addressing `remote` in this bucket.
    pub fn url(&self, remote: &Utf8Path) -> Result<Uri, StorageError> {
        format!("{}://{}/{}", self.driver.scheme(), self.bucket, remote)
            .parse::<Uri>()
            .map_err(StorageError::with(
                self.driver.name(),
                StorageErrorKind::InvalidRequest,
            ))
    }

    /// Whether `remote` exists. Only a not-found error maps to `false`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn exists(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.driver.metadata(&self.bucket, remote).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Read an entire object into memory.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn get(&self, remote: &Utf8Path) -> Result<Bytes, StorageError> {
        let mut buf = Vec::new();
        self.driver.download(&self.bucket, remote, &mut buf).await?;
        Ok(buf.into())
    }

    /// Write an object from an in-memory buffer.
    #[tracing::instrument(skip(self, data), fields(driver=self.driver.name(), bucket=%self.bucket, size=data.len()))]
    pub async fn put(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = io::BufReader::new(data);
        self.driver.upload(&self.bucket, remote, &mut reader).await
    }
}
