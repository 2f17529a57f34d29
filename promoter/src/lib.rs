//! # Container image promotion
//!
//! Replicates the images a build produced from the source registry to the
//! registry of a deployment target, possibly in another account and region.
//!
//! A promotion reads the build's promotion manifest from object storage,
//! resolves a client for the target registry once, then promotes each listed
//! image in order. For cross-account targets the blobs the target lacks are
//! copied first, so the manifest is only published once everything it
//! references is in place. Every mutation tolerates already being done, so a
//! failed promotion can simply be run again.
//!
//! ```no_run
//! # async fn example(coordinator: promoter::Coordinator) -> Result<(), promoter::PromotionError> {
//! use promoter::PromotionRequest;
//!
//! let request = PromotionRequest {
//!     source_bucket: "artifacts".into(),
//!     source_key_prefix: "builds/42/".into(),
//!     target_account: Some("123456789012".into()),
//!     ..Default::default()
//! };
//! let result = coordinator.promote(&request).await?;
//! println!("promoted {} images", result.images_promoted);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod coordinator;
pub mod copy;
pub mod diff;
mod error;
pub mod manifest;
pub mod promote;
mod request;
pub mod target;

pub use config::{ConfigError, PromoterConfig};
pub use coordinator::{BuildError, Coordinator, CoordinatorBuilder};
pub use error::{PromotionError, TransferStage};
pub use manifest::{ImageSpec, PromotionManifest};
pub use request::{PromotionRequest, PromotionResult};
pub use target::TargetContext;
