//! # Container registries
//!
//! The registry side of image promotion: content digests, image manifest
//! decoding, the [`Registry`] operations a promotion needs, and cross-account
//! credentials.
//!
//! [`StorageRegistry`] implements [`Registry`] on top of the `storage` crate,
//! so a whole promotion can run against local or in-memory objects.
//!
//! ## Example
//!
//! ```no_run
//! use registry::{Registry, StorageRegistry};
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::new().into();
//! let registry = StorageRegistry::for_account(&storage, "123456789012", "eu-west-1");
//!
//! registry.create_repository("myapp/api").await?;
//! let digest = registry.put_blob("myapp/api", b"layer").await?;
//! println!("stored {digest}");
//! # Ok(())
//! # }
//! ```

mod api;
mod credentials;
mod digest;
mod error;
mod fetch;
pub mod manifest;
mod local;

pub use api::{
    BlobFetcher, Image, LayerAvailability, LayerCheck, Outcome, Registry, UploadSession,
};
pub use credentials::{
    validate_account, CredentialError, CredentialProvider, LocalCredentialProvider,
    RegistryConnector, RoleArn, Secret, StorageConnector, TemporaryCredentials,
};
pub use digest::Digest;
pub use error::{RegistryError, RegistryErrorKind, RegistryResult};
pub use fetch::StorageFetcher;
pub use manifest::ImageManifest;
pub use local::{DEFAULT_UPLOAD_TTL, DEFAULT_URL_TTL, MAX_URL_TTL, StorageRegistry};

/// Most digests a single layer availability check may ask about.
pub const MAX_LAYER_CHECK: usize = 100;
