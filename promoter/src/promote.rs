//! Promotion of a single image.

use std::sync::Arc;

use futures::{StreamExt as _, TryStreamExt as _};
use registry::{ImageManifest, Outcome, Registry};

use crate::copy::{CopiedLayer, LayerCopier};
use crate::diff::diff_layers;
use crate::error::PromotionError;
use crate::manifest::ImageSpec;
use crate::target::ResolvedTarget;

/// Layer copies in flight per image unless configured otherwise.
pub const DEFAULT_LAYER_CONCURRENCY: usize = 4;

/// Promotes one image from the source registry to a resolved target.
#[derive(Debug, Clone)]
pub struct ImagePromoter {
    source: Arc<dyn Registry>,
    copier: LayerCopier,
    layer_concurrency: usize,
}

impl ImagePromoter {
    /// A promoter reading images from `source`.
    pub fn new(source: Arc<dyn Registry>, copier: LayerCopier) -> Self {
        Self {
            source,
            copier,
            layer_concurrency: DEFAULT_LAYER_CONCURRENCY,
        }
    }

    /// Copy at most `concurrency` layers of an image at once.
    pub fn with_layer_concurrency(mut self, concurrency: usize) -> Self {
        self.layer_concurrency = concurrency.max(1);
        self
    }

    /// Promote `image` to `target`, returning the reference it can be pulled by.
    ///
    /// For a cross-account target every blob of the image is present at the
    /// target before the manifest is published there.
    #[tracing::instrument(skip(self, target), fields(%image, cross_account=target.is_cross_account()))]
    pub async fn promote(
        &self,
        image: &ImageSpec,
        target: &ResolvedTarget,
    ) -> Result<String, PromotionError> {
        image.validate()?;

        let source_image = self
            .source
            .get_image(&image.repository, &image.tag)
            .await
            .map_err(|error| {
                if error.kind().is_not_found() {
                    PromotionError::UpstreamNotFound {
                        image: image.to_string(),
                    }
                } else {
                    PromotionError::registry("get_image", self.source.name())(error)
                }
            })?
            .ok_or_else(|| PromotionError::UpstreamNotFound {
                image: image.to_string(),
            })?;

        let Some(manifest) = source_image.manifest else {
            return Err(PromotionError::MissingManifest {
                image: image.to_string(),
            });
        };

        if target.is_cross_account() {
            self.replicate_layers(image, &manifest, target.registry())
                .await?;
        }

        let outcome = target
            .registry()
            .put_image(
                &image.repository,
                &image.tag,
                &manifest,
                source_image.media_type.as_deref(),
            )
            .await
            .map_err(PromotionError::registry(
                "put_image",
                target.registry().name(),
            ))?;

        let uri = target.image_uri(image);
        tracing::info!(%outcome, %uri, "promoted image");
        Ok(uri)
    }

    async fn replicate_layers(
        &self,
        image: &ImageSpec,
        manifest: &str,
        target: &dyn Registry,
    ) -> Result<(), PromotionError> {
        let digests = ImageManifest::parse(manifest.as_bytes())
            .map_err(|source| PromotionError::ImageManifest {
                image: image.to_string(),
                source,
            })?
            .digests();

        ensure_repository(target, &image.repository).await?;

        let diff = diff_layers(target, &image.repository, &digests).await?;
        if diff.missing.is_empty() {
            tracing::debug!(layers = diff.present.len(), "target holds every layer");
            return Ok(());
        }

        let copied: Vec<CopiedLayer> = futures::stream::iter(
            diff.missing
                .iter()
                .map(|digest| self.copier.copy(target, &image.repository, digest)),
        )
        .buffer_unordered(self.layer_concurrency)
        .try_collect()
        .await?;

        let created = copied.iter().filter(|c| c.outcome.is_created()).count();
        let bytes: u64 = copied.iter().map(|c| c.size).sum();
        tracing::debug!(
            copied = copied.len(),
            created,
            bytes,
            "replicated missing layers"
        );
        Ok(())
    }
}

/// Create `repository` at `registry` unless it already exists.
pub async fn ensure_repository(
    registry: &dyn Registry,
    repository: &str,
) -> Result<Outcome, PromotionError> {
    let exists = registry
        .repository_exists(repository)
        .await
        .map_err(PromotionError::registry("repository_exists", registry.name()))?;
    if exists {
        return Ok(Outcome::AlreadyExists);
    }

    let outcome = registry
        .create_repository(repository)
        .await
        .map_err(PromotionError::registry("create_repository", registry.name()))?;
    tracing::debug!(%repository, %outcome, "ensured target repository");
    Ok(outcome)
}
