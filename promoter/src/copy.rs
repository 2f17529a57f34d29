//! Copying a single blob from the source registry into a target registry.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use registry::{BlobFetcher, Digest, Outcome, Registry, RegistryError, RegistryErrorKind};

use crate::error::{PromotionError, TransferStage};

/// Largest part sent in one upload call: 5 GiB.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Split `len` bytes into consecutive ranges of at most `part_size` bytes.
///
/// An empty blob has no parts.
pub fn part_ranges(len: u64, part_size: u64) -> Vec<Range<u64>> {
    let part_size = part_size.clamp(1, MAX_PART_SIZE);
    let mut ranges = Vec::with_capacity(len.div_ceil(part_size) as usize);
    let mut start = 0;
    while start < len {
        let end = (start + part_size).min(len);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Recompute the digest of downloaded bytes and check it against the one requested.
pub fn verify_digest(expected: &Digest, data: &[u8]) -> Result<Digest, RegistryError> {
    let computed = Digest::sha256(data);
    if &computed == expected {
        Ok(computed)
    } else {
        Err(RegistryError::new(
            RegistryErrorKind::DigestMismatch,
            format!("expected {expected}, downloaded {computed}"),
        ))
    }
}

/// The result of copying one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedLayer {
    /// The blob copied.
    pub digest: Digest,

    /// Its size in bytes.
    pub size: u64,

    /// Whether the target already had it.
    pub outcome: Outcome,
}

/// Streams blobs out of the source registry and uploads them to a target.
#[derive(Debug, Clone)]
pub struct LayerCopier {
    source: Arc<dyn Registry>,
    fetcher: Arc<dyn BlobFetcher>,
}

impl LayerCopier {
    /// A copier reading from `source`, downloading through `fetcher`.
    pub fn new(source: Arc<dyn Registry>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self { source, fetcher }
    }

    /// Copy `digest` from `repository` at the source to the same repository at `target`.
    ///
    /// A target which already holds the blob is reported as
    /// [`Outcome::AlreadyExists`], not an error.
    #[tracing::instrument(skip(self, target), fields(from=self.source.name(), to=target.name()))]
    pub async fn copy(
        &self,
        target: &dyn Registry,
        repository: &str,
        digest: &Digest,
    ) -> Result<CopiedLayer, PromotionError> {
        let url = self
            .source
            .download_url(repository, digest)
            .await
            .map_err(PromotionError::transfer(digest, TransferStage::DownloadUrl, 0))?;

        let mut buf: Vec<u8> = Vec::new();
        let downloaded = match self.fetcher.fetch(&url, &mut buf).await {
            Ok(size) => size,
            Err(error) => {
                let bytes = buf.len() as u64;
                return Err(PromotionError::transfer(digest, TransferStage::Download, bytes)(error));
            }
        };
        tracing::trace!(size = downloaded, "downloaded blob");
        let data = Bytes::from(buf);
        let size = data.len() as u64;

        let computed = verify_digest(digest, &data)
            .map_err(PromotionError::transfer(digest, TransferStage::Verify, size))?;

        let session = target
            .initiate_upload(repository)
            .await
            .map_err(PromotionError::transfer(digest, TransferStage::Initiate, size))?;
        let part_size = session.part_size.unwrap_or(MAX_PART_SIZE).min(MAX_PART_SIZE);

        for range in part_ranges(size, part_size) {
            let part = data.slice(range.start as usize..range.end as usize);
            if let Err(error) = target
                .upload_part(
                    repository,
                    &session.upload_id,
                    range.start,
                    range.end - 1,
                    part,
                )
                .await
            {
                if let Err(abort) = target.abort_upload(repository, &session.upload_id).await {
                    tracing::warn!(upload_id = %session.upload_id, error = %abort, "abandoned upload session");
                }
                return Err(PromotionError::transfer(
                    digest,
                    TransferStage::Upload,
                    range.start,
                )(error));
            }
        }

        let outcome = target
            .complete_upload(repository, &session.upload_id, &computed)
            .await
            .map_err(PromotionError::transfer(digest, TransferStage::Complete, size))?;

        tracing::debug!(%outcome, size, "copied layer");
        Ok(CopiedLayer {
            digest: computed,
            size,
            outcome,
        })
    }
}
