//! Downloading blobs from registry download urls.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::Utc;
use http::Uri;
use storage::{Storage, Writer};
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use crate::api::BlobFetcher;
use crate::error::{RegistryError, RegistryErrorKind, RegistryResult};

/// Fetches blobs from urls issued by a [`StorageRegistry`](crate::StorageRegistry).
///
/// Urls carry an `expires` query parameter holding a unix timestamp; expired
/// urls are refused.
#[derive(Debug, Clone)]
pub struct StorageFetcher {
    storage: Storage,
}

impl StorageFetcher {
    /// Fetch through `storage`, which must be the storage the urls point into.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

fn expires(url: &Uri) -> Option<i64> {
    url.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("expires="))
        .and_then(|value| value.parse().ok())
}

/// Passes writes through to `inner`, counting the bytes accepted.
struct CountingWriter<'a, 'w> {
    inner: &'a mut Writer<'w>,
    written: u64,
}

impl AsyncWrite for CountingWriter<'_, '_> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written += *n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

#[async_trait::async_trait]
impl BlobFetcher for StorageFetcher {
    #[tracing::instrument(skip(self, writer), fields(driver=self.storage.name()))]
    async fn fetch(&self, url: &Uri, writer: &mut Writer<'_>) -> RegistryResult<u64> {
        let Some(expires) = expires(url) else {
            return Err(RegistryError::new(
                RegistryErrorKind::InvalidRequest,
                format!("{url} has no expiry"),
            ));
        };
        if Utc::now().timestamp() > expires {
            return Err(RegistryError::new(
                RegistryErrorKind::Expired,
                url.to_string(),
            ));
        }

        let mut counter = CountingWriter {
            inner: writer,
            written: 0,
        };
        if let Err(error) = self.storage.download_url(url, &mut counter).await {
            tracing::debug!(written = counter.written, "blob download interrupted");
            return Err(error.into());
        }
        counter.flush().await.map_err(|err| {
            RegistryError::new(RegistryErrorKind::Storage, url.to_string()).with_source(err)
        })?;

        tracing::trace!(size = counter.written, "fetched blob");
        Ok(counter.written)
    }
}
