//! The registry API consumed by promotion, and the types it exchanges.

use std::fmt;

use bytes::Bytes;
use http::Uri;
use storage::Writer;

use crate::digest::Digest;
use crate::error::RegistryResult;

/// Result of a mutation which may find its effect already in place.
///
/// Registries answer "already exists" for layers and manifests they already
/// hold; that is a successful outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The resource was created by this call.
    Created,

    /// The resource was already present, nothing changed.
    AlreadyExists,
}

impl Outcome {
    /// True if this call created the resource.
    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => f.write_str("created"),
            Outcome::AlreadyExists => f.write_str("already exists"),
        }
    }
}

/// An image fetched by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Repository holding the image.
    pub repository: String,

    /// Tag the image was fetched by.
    pub tag: String,

    /// Raw manifest document. A registry may report an image without one.
    pub manifest: Option<String>,

    /// Media type of the manifest, when known.
    pub media_type: Option<String>,
}

/// Availability of a single blob, as reported by a batched layer check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerAvailability {
    /// The blob is present.
    Available,

    /// The blob is absent.
    Unavailable,

    /// The registry could not answer for this digest.
    Failed {
        /// Service failure code.
        code: String,
        /// Service failure reason.
        reason: String,
    },
}

/// One entry of a batched layer check response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerCheck {
    /// The digest asked about.
    pub digest: Digest,

    /// What the registry said about it.
    pub availability: LayerAvailability,
}

/// An open blob upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Identifies the session in subsequent part and completion calls.
    pub upload_id: String,

    /// Largest part the registry accepts, if it states one.
    pub part_size: Option<u64>,
}

/// Operations on one container registry.
///
/// Implementations address a single registry (one account, one region). All
/// mutations are idempotent: re-doing a completed upload or manifest publish
/// yields [`Outcome::AlreadyExists`].
#[async_trait::async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// A short name for traces.
    fn name(&self) -> &str;

    /// Fetch an image by tag. `Ok(None)` when the repository has no such tag.
    async fn get_image(&self, repository: &str, tag: &str) -> RegistryResult<Option<Image>>;

    /// Check which of `digests` the repository holds.
    ///
    /// Registries cap the number of digests per call; see
    /// [`MAX_LAYER_CHECK`](crate::MAX_LAYER_CHECK).
    async fn check_layers(
        &self,
        repository: &str,
        digests: &[Digest],
    ) -> RegistryResult<Vec<LayerCheck>>;

    /// A time limited url from which the blob can be downloaded.
    async fn download_url(&self, repository: &str, digest: &Digest) -> RegistryResult<Uri>;

    /// Open an upload session.
    async fn initiate_upload(&self, repository: &str) -> RegistryResult<UploadSession>;

    /// Upload one part, covering bytes `first_byte..=last_byte` of the blob.
    ///
    /// Parts must arrive in order. Returns the last byte received.
    async fn upload_part(
        &self,
        repository: &str,
        upload_id: &str,
        first_byte: u64,
        last_byte: u64,
        part: Bytes,
    ) -> RegistryResult<u64>;

    /// Finish an upload, declaring the digest of everything uploaded.
    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &Digest,
    ) -> RegistryResult<Outcome>;

    /// Discard an open upload session and everything uploaded to it.
    ///
    /// Aborting a session which no longer exists succeeds.
    async fn abort_upload(&self, repository: &str, upload_id: &str) -> RegistryResult<()>;

    /// Publish a manifest under `tag`.
    async fn put_image(
        &self,
        repository: &str,
        tag: &str,
        manifest: &str,
        media_type: Option<&str>,
    ) -> RegistryResult<Outcome>;

    /// Whether the repository exists.
    async fn repository_exists(&self, repository: &str) -> RegistryResult<bool>;

    /// Create the repository.
    async fn create_repository(&self, repository: &str) -> RegistryResult<Outcome>;
}

/// Downloads blobs from the urls handed out by [`Registry::download_url`].
#[async_trait::async_trait]
pub trait BlobFetcher: fmt::Debug + Send + Sync {
    /// Stream the blob at `url` into `writer`, returning the number of bytes written.
    async fn fetch(&self, url: &Uri, writer: &mut Writer<'_>) -> RegistryResult<u64>;
}
