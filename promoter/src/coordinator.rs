//! Entry point for promoting every image of a build.

use std::sync::Arc;

use registry::{BlobFetcher, CredentialProvider, Registry, RegistryConnector};
use storage::Storage;

use crate::copy::LayerCopier;
use crate::error::PromotionError;
use crate::manifest::{read_manifest, ImageSpec};
use crate::promote::{ImagePromoter, DEFAULT_LAYER_CONCURRENCY};
use crate::request::{PromotionRequest, PromotionResult};
use crate::target::{ResolvedTarget, TargetResolver, DEFAULT_ROLE_NAME};

/// A [`CoordinatorBuilder`] was missing a collaborator.
#[derive(Debug, thiserror::Error)]
#[error("coordinator is missing its {0}")]
pub struct BuildError(&'static str);

/// Promotes the images listed in a build's promotion manifest.
#[derive(Debug, Clone)]
pub struct Coordinator {
    storage: Storage,
    resolver: TargetResolver,
    promoter: ImagePromoter,
}

impl Coordinator {
    /// Start building a coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Run one promotion.
    ///
    /// Images are promoted one at a time in manifest order. The first failure
    /// stops the batch and is returned wrapped with the image it belongs to.
    #[tracing::instrument(
        skip(self, request),
        fields(
            env=%request.env,
            build=%request.build_id,
            bucket=%request.source_bucket,
            prefix=%request.source_key_prefix,
        )
    )]
    pub async fn promote(
        &self,
        request: &PromotionRequest,
    ) -> Result<PromotionResult, PromotionError> {
        let manifest = read_manifest(
            &self.storage,
            &request.source_bucket,
            &request.source_key_prefix,
        )
        .await?;

        let Some(manifest) = manifest.filter(|m| !m.is_empty()) else {
            tracing::info!("nothing to promote");
            return Ok(PromotionResult::skipped());
        };

        let context = request.target();
        let target = self.resolver.resolve(&context).await?;

        let mut images = Vec::with_capacity(manifest.images.len());
        for image in &manifest.images {
            match self.promoter.promote(image, &target).await {
                Ok(uri) => images.push(uri),
                Err(error) => {
                    promotion_breadcrumb(image, &target, &error);
                    return Err(PromotionError::Image {
                        image: image.to_string(),
                        source: Box::new(error),
                    });
                }
            }
        }

        tracing::info!(promoted = images.len(), "promotion complete");
        Ok(PromotionResult::promoted(images))
    }
}

fn promotion_breadcrumb(image: &ImageSpec, target: &ResolvedTarget, error: &PromotionError) {
    use crate::target::TargetScope;
    use sentry::protocol::{Breadcrumb, Level, Map};

    let breadcrumb = Breadcrumb {
        ty: "error".into(),
        category: Some("promotion".into()),
        level: Level::Error,
        message: Some(error.to_string()),
        data: {
            let mut map = Map::new();
            map.insert("image".into(), image.to_string().into());
            map.insert("registry".into(), target.registry().name().into());
            if let TargetScope::CrossAccount { account, region } = target.scope() {
                map.insert("account".into(), account.as_str().into());
                map.insert("region".into(), region.as_str().into());
            }
            map
        },
        ..Default::default()
    };

    sentry::add_breadcrumb(breadcrumb);
}

/// Assembles a [`Coordinator`] from its collaborators.
#[derive(Debug)]
pub struct CoordinatorBuilder {
    storage: Option<Storage>,
    source: Option<Arc<dyn Registry>>,
    fetcher: Option<Arc<dyn BlobFetcher>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    connector: Option<Arc<dyn RegistryConnector>>,
    region: Option<String>,
    role_name: String,
    layer_concurrency: usize,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    /// A builder with no collaborators set.
    pub fn new() -> Self {
        Self {
            storage: None,
            source: None,
            fetcher: None,
            credentials: None,
            connector: None,
            region: None,
            role_name: DEFAULT_ROLE_NAME.to_owned(),
            layer_concurrency: DEFAULT_LAYER_CONCURRENCY,
        }
    }

    /// Object storage holding promotion manifests.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The source registry, also the target for same-account promotion.
    pub fn source(mut self, source: Arc<dyn Registry>) -> Self {
        self.source = Some(source);
        self
    }

    /// Downloads blobs from source download urls.
    pub fn fetcher(mut self, fetcher: Arc<dyn BlobFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Assumes roles in target accounts.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Builds target registry clients from assumed credentials.
    pub fn connector(mut self, connector: Arc<dyn RegistryConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// The invoking region, used when a request names no target region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// The role assumed in target accounts.
    pub fn role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    /// Layer copies in flight per image.
    pub fn layer_concurrency(mut self, concurrency: usize) -> Self {
        self.layer_concurrency = concurrency;
        self
    }

    /// Build the coordinator.
    pub fn build(self) -> Result<Coordinator, BuildError> {
        let storage = self.storage.ok_or(BuildError("manifest storage"))?;
        let source = self.source.ok_or(BuildError("source registry"))?;
        let fetcher = self.fetcher.ok_or(BuildError("blob fetcher"))?;
        let credentials = self.credentials.ok_or(BuildError("credential provider"))?;
        let connector = self.connector.ok_or(BuildError("registry connector"))?;
        let region = self.region.ok_or(BuildError("region"))?;

        let resolver = TargetResolver::new(source.clone(), credentials, connector, region)
            .with_role_name(self.role_name);
        let copier = LayerCopier::new(source.clone(), fetcher);
        let promoter =
            ImagePromoter::new(source, copier).with_layer_concurrency(self.layer_concurrency);

        Ok(Coordinator {
            storage,
            resolver,
            promoter,
        })
    }
}
