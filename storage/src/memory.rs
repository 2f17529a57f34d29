use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::{StorageError, StorageErrorKind};

const MEMORY_STORAGE_NAME: &str = "memory";

#[derive(Debug)]
struct MemoryObject {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryObject {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryObject> for Metadata {
    fn from(value: &MemoryObject) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryObject>;

/// Storage driver that keeps objects in memory.
///
/// Writing to a bucket which does not exist creates it; reading from one
/// is a [`StorageErrorKind::NotFound`] error.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create an empty `MemoryStorage`, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `MemoryStorage` with the given (empty) buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), Bucket::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }

    fn missing_bucket(&self, bucket: &str) -> StorageError {
        StorageError::new(
            self.name(),
            StorageErrorKind::NotFound,
            format!("bucket not found: {bucket}"),
        )
        .with_bucket(bucket)
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        MEMORY_STORAGE_NAME
    }

    fn scheme(&self) -> &str {
        MEMORY_STORAGE_NAME
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;

        objects
            .get(remote)
            .map(Metadata::from)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        tokio::io::copy_buf(reader, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        tracing::trace!(%bucket, %remote, size = buf.len(), "memory upload");

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        let object = objects
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?;

        writer
            .write_all(&object.data)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        writer
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(())
    }
}
