//! The promotion request and its result, as exchanged with the invoking workflow.

use serde::{Deserialize, Serialize};

use crate::target::TargetContext;

/// One promotion invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    /// Deployment environment, carried for tracing.
    #[serde(default)]
    pub env: String,

    /// Source code repository of the build, carried for tracing.
    #[serde(default)]
    pub repository: String,

    /// Build identifier, carried for tracing.
    #[serde(default)]
    pub build_id: String,

    /// Bucket holding the promotion manifest.
    pub source_bucket: String,

    /// Key prefix under which the promotion manifest lives.
    #[serde(default)]
    pub source_key_prefix: String,

    /// Account to promote into; absent for same-account promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_account: Option<String>,

    /// Region to promote into; defaults to the invoking region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_region: Option<String>,
}

impl PromotionRequest {
    /// The target described by this request.
    pub fn target(&self) -> TargetContext {
        TargetContext {
            account: self.target_account.clone().filter(|a| !a.is_empty()),
            region: self.target_region.clone().filter(|r| !r.is_empty()),
        }
    }
}

/// What a promotion did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionResult {
    /// Number of images promoted.
    pub images_promoted: usize,

    /// Pull references of the promoted images, in manifest order.
    pub images: Vec<String>,

    /// True when there was no manifest, or it listed no images.
    pub skipped: bool,
}

impl PromotionResult {
    /// Nothing to promote.
    pub fn skipped() -> Self {
        Self {
            images_promoted: 0,
            images: Vec::new(),
            skipped: true,
        }
    }

    /// Every image in `images` was promoted.
    pub fn promoted(images: Vec<String>) -> Self {
        Self {
            images_promoted: images.len(),
            images,
            skipped: false,
        }
    }
}
