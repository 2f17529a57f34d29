use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::{StorageError, StorageErrorKind};

const LOCAL_STORAGE_NAME: &str = "local";

/// Storage driver for objects kept under a directory on local disk.
///
/// Objects live at `<root>/<bucket>/<path>`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if bucket.is_empty()
            || bucket.contains('/')
            || remote
                .components()
                .any(|c| matches!(c, camino::Utf8Component::ParentDir))
        {
            return Err(StorageError::new(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("refusing to address {bucket}/{remote}"),
            ));
        }

        Ok(self.root.join(bucket).join(remote))
    }

    fn io_error(&self, bucket: &str, remote: &Utf8Path, error: std::io::Error) -> StorageError {
        let kind = error.kind().into();
        StorageError::new(self.name(), kind, error)
            .with_bucket(bucket)
            .with_path(remote.as_str())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        LOCAL_STORAGE_NAME
    }

    fn scheme(&self) -> &str {
        LOCAL_STORAGE_NAME
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        let created = metadata
            .modified()
            .map_err(|err| self.io_error(bucket, remote, err))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("create parent directory {parent}"))
                .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;
        }

        // Write beside the destination and rename, so readers never see a partial object.
        let staging = Utf8PathBuf::from(format!("{path}.partial"));
        let mut file = tokio::io::BufWriter::new(
            tokio::fs::File::create(&staging)
                .await
                .map_err(|err| self.io_error(bucket, remote, err))?,
        );
        tokio::io::copy_buf(reader, &mut file)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;
        file.shutdown()
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        tracing::trace!(%path, "local upload");
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        tokio::io::copy(&mut file, writer)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;
        writer
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, LocalDriver::new(root))
    }

    #[tokio::test]
    async fn round_trip_on_disk() {
        let (_dir, driver) = driver();
        let mut reader = std::io::Cursor::new(b"{\"images\":[]}".to_vec());
        driver
            .upload("bucket", Utf8Path::new("builds/7/deploy-manifest.json"), &mut reader)
            .await
            .unwrap();

        let mut buf = Vec::new();
        driver
            .download("bucket", Utf8Path::new("builds/7/deploy-manifest.json"), &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"{\"images\":[]}");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, driver) = driver();
        let error = driver
            .metadata("bucket", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let (_dir, driver) = driver();
        let error = driver
            .metadata("bucket", Utf8Path::new("../escape"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), StorageErrorKind::InvalidRequest);
    }
}
