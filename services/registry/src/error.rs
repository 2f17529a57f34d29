//! Error types for the registry

use std::fmt;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// What went wrong in a registry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// The repository does not exist
    RepositoryNotFound,

    /// No image with the requested tag
    ImageNotFound,

    /// The blob is not present in the repository
    LayerNotFound,

    /// The upload session is unknown or belongs to another repository
    UploadNotFound,

    /// The digest is not a well formed `sha256:<hex>` string
    InvalidDigest,

    /// Uploaded bytes do not hash to the declared digest
    DigestMismatch,

    /// An upload part is out of sequence or larger than the session allows
    InvalidPart,

    /// A manifest references blobs the repository does not hold
    LayersNotFound,

    /// The manifest document could not be decoded
    InvalidManifest,

    /// A request exceeded a fixed service limit
    LimitExceeded,

    /// A download url has expired
    Expired,

    /// The request was malformed
    InvalidRequest,

    /// The backing store failed
    Storage,
}

impl RegistryErrorKind {
    /// Service error code for this kind, in the style of the registry API.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryErrorKind::RepositoryNotFound => "RepositoryNotFoundException",
            RegistryErrorKind::ImageNotFound => "ImageNotFoundException",
            RegistryErrorKind::LayerNotFound => "LayersNotFoundException",
            RegistryErrorKind::UploadNotFound => "UploadNotFoundException",
            RegistryErrorKind::InvalidDigest => "InvalidLayerDigest",
            RegistryErrorKind::DigestMismatch => "InvalidLayerException",
            RegistryErrorKind::InvalidPart => "InvalidLayerPartException",
            RegistryErrorKind::LayersNotFound => "LayersNotFoundException",
            RegistryErrorKind::InvalidManifest => "InvalidParameterException",
            RegistryErrorKind::LimitExceeded => "LimitExceededException",
            RegistryErrorKind::Expired => "ExpiredUrl",
            RegistryErrorKind::InvalidRequest => "InvalidParameterException",
            RegistryErrorKind::Storage => "ServerException",
        }
    }

    /// True for the kinds which mean "the thing is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryErrorKind::RepositoryNotFound
                | RegistryErrorKind::ImageNotFound
                | RegistryErrorKind::LayerNotFound
                | RegistryErrorKind::UploadNotFound
        )
    }
}

impl fmt::Display for RegistryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {context}")]
pub struct RegistryError {
    kind: RegistryErrorKind,
    context: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RegistryError {
    /// Create an error of `kind` described by `context`.
    pub fn new(kind: RegistryErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The error kind.
    pub fn kind(&self) -> RegistryErrorKind {
        self.kind
    }

    /// What the operation was acting on.
    pub fn context(&self) -> &str {
        &self.context
    }
}

impl From<storage::StorageError> for RegistryError {
    fn from(error: storage::StorageError) -> Self {
        let context = match (error.bucket(), error.path()) {
            (Some(bucket), Some(path)) => format!("{bucket}/{path}"),
            (Some(bucket), None) => bucket.to_owned(),
            _ => error.engine().to_owned(),
        };
        RegistryError::new(RegistryErrorKind::Storage, context).with_source(error)
    }
}
