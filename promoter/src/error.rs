//! Errors raised while promoting images.

use std::fmt;

use registry::{CredentialError, Digest, RegistryError};
use storage::StorageError;

/// The step of a layer copy which failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Requesting a download url from the source.
    DownloadUrl,

    /// Reading the blob from its download url.
    Download,

    /// Opening the upload session at the target.
    Initiate,

    /// Sending an upload part.
    Upload,

    /// Checking the downloaded bytes against the requested digest.
    Verify,

    /// Completing the upload.
    Complete,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TransferStage::DownloadUrl => "download url",
            TransferStage::Download => "download",
            TransferStage::Initiate => "upload initiation",
            TransferStage::Upload => "part upload",
            TransferStage::Verify => "digest verification",
            TransferStage::Complete => "upload completion",
        };
        f.write_str(stage)
    }
}

/// A promotion failure.
///
/// Every variant is fatal for the batch. Conditions which are not failures,
/// like a missing promotion manifest or a blob the target already holds, never
/// surface as a `PromotionError`.
#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    /// The request or an image entry is malformed. Raised before any network call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The source registry has no such image.
    #[error("source image not found: {image}")]
    UpstreamNotFound {
        /// `repository:tag`
        image: String,
    },

    /// The source registry returned the image without a manifest document.
    #[error("manifest is nil for {image}")]
    MissingManifest {
        /// `repository:tag`
        image: String,
    },

    /// Copying one blob failed.
    #[error("transfer of {digest} failed during {stage} after {bytes} bytes")]
    Transfer {
        /// The blob being copied.
        digest: Digest,
        /// Bytes moved before the failure.
        bytes: u64,
        /// Where the copy stopped.
        stage: TransferStage,
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },

    /// Asking the target which layers it holds failed.
    #[error("checking layers of {repository}")]
    LayerCheck {
        /// Target repository.
        repository: String,
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },

    /// The promotion manifest could not be read.
    #[error("reading promotion manifest {bucket}/{key}")]
    ManifestRead {
        /// Bucket holding the manifest.
        bucket: String,
        /// Object key of the manifest.
        key: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// The promotion manifest is not valid JSON of the expected shape.
    #[error("decoding promotion manifest {bucket}/{key}")]
    ManifestFormat {
        /// Bucket holding the manifest.
        bucket: String,
        /// Object key of the manifest.
        key: String,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// An image manifest could not be decoded into its blobs.
    #[error("decoding image manifest of {image}")]
    ImageManifest {
        /// `repository:tag`
        image: String,
        /// Decoding error.
        #[source]
        source: RegistryError,
    },

    /// No client could be obtained for the target account.
    #[error("resolving registry for account {account}")]
    Credentials {
        /// The target account.
        account: String,
        /// Credential failure.
        #[source]
        source: CredentialError,
    },

    /// Any other registry operation failed.
    #[error("{operation} on {registry}")]
    Registry {
        /// The operation attempted.
        operation: &'static str,
        /// Registry name.
        registry: String,
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },

    /// Promotion of one image failed; wraps the cause with the image identity.
    #[error("promoting {image}")]
    Image {
        /// `repository:tag`
        image: String,
        /// Why the image failed.
        #[source]
        source: Box<PromotionError>,
    },
}

impl PromotionError {
    pub(crate) fn registry(
        operation: &'static str,
        registry: &str,
    ) -> impl FnOnce(RegistryError) -> PromotionError + use<> {
        let registry = registry.to_owned();
        move |source| PromotionError::Registry {
            operation,
            registry,
            source,
        }
    }

    pub(crate) fn transfer(
        digest: &Digest,
        stage: TransferStage,
        bytes: u64,
    ) -> impl FnOnce(RegistryError) -> PromotionError + use<> {
        let digest = digest.clone();
        move |source| PromotionError::Transfer {
            digest,
            bytes,
            stage,
            source,
        }
    }

    /// The innermost promotion error, looking through [`PromotionError::Image`].
    pub fn root(&self) -> &PromotionError {
        match self {
            PromotionError::Image { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors raised by input validation.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self.root(), PromotionError::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::RegistryErrorKind;

    #[test]
    fn transfer_display() {
        let digest = Digest::sha256(b"hello world");
        let error = PromotionError::transfer(&digest, TransferStage::Upload, 42)(
            RegistryError::new(RegistryErrorKind::InvalidPart, "upload 1"),
        );
        assert_eq!(
            error.to_string(),
            format!("transfer of {digest} failed during part upload after 42 bytes")
        );
    }

    #[test]
    fn image_wrapper_exposes_root() {
        let error = PromotionError::Image {
            image: "myapp/api:1.0.0".into(),
            source: Box::new(PromotionError::InvalidInput("empty tag".into())),
        };
        assert_eq!(error.to_string(), "promoting myapp/api:1.0.0");
        assert!(error.is_invalid_input());
        assert!(std::error::Error::source(&error).is_some());
    }
}
