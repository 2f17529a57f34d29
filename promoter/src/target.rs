//! Resolving the registry images are promoted into.

use std::sync::Arc;

use registry::{CredentialProvider, Registry, RegistryConnector, RoleArn};

use crate::error::PromotionError;
use crate::manifest::ImageSpec;

/// Role assumed in target accounts unless configured otherwise.
pub const DEFAULT_ROLE_NAME: &str = "DeploymentPipelineCrossAccountRole";

/// Where images should land. An absent account means the source account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetContext {
    /// Target account id.
    pub account: Option<String>,

    /// Target region, defaulting to the invoking region.
    pub region: Option<String>,
}

impl TargetContext {
    /// Promote within the source account.
    pub fn same_account() -> Self {
        Self::default()
    }

    /// Promote into `account`, optionally in another region.
    pub fn cross_account(account: impl Into<String>, region: Option<String>) -> Self {
        Self {
            account: Some(account.into()),
            region,
        }
    }
}

/// Whether a resolved target is the source registry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
    /// Images stay in the source registry.
    SameAccount,

    /// Images are copied to a registry in another account.
    CrossAccount {
        /// Target account id.
        account: String,
        /// Target region.
        region: String,
    },
}

/// A registry client for the promotion target.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    registry: Arc<dyn Registry>,
    scope: TargetScope,
}

impl ResolvedTarget {
    /// A target reached through `registry`.
    pub fn new(registry: Arc<dyn Registry>, scope: TargetScope) -> Self {
        Self { registry, scope }
    }

    /// The target registry client.
    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Same or cross account.
    pub fn scope(&self) -> &TargetScope {
        &self.scope
    }

    /// True when layers must be copied.
    pub fn is_cross_account(&self) -> bool {
        matches!(self.scope, TargetScope::CrossAccount { .. })
    }

    /// The reference by which the promoted image can be pulled.
    pub fn image_uri(&self, image: &ImageSpec) -> String {
        match &self.scope {
            TargetScope::SameAccount => image.to_string(),
            TargetScope::CrossAccount { account, region } => {
                format!("{account}.dkr.ecr.{region}.amazonaws.com/{image}")
            }
        }
    }
}

/// Produces target registry clients, assuming a role for cross-account targets.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    source: Arc<dyn Registry>,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn RegistryConnector>,
    role_name: String,
    region: String,
}

impl TargetResolver {
    /// A resolver which reuses `source` for same-account targets.
    pub fn new(
        source: Arc<dyn Registry>,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn RegistryConnector>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            source,
            credentials,
            connector,
            role_name: DEFAULT_ROLE_NAME.to_owned(),
            region: region.into(),
        }
    }

    /// Assume `role_name` instead of the default role.
    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    /// Resolve the registry for `context`.
    ///
    /// Empty account or region strings count as absent.
    #[tracing::instrument(skip(self), fields(role=%self.role_name))]
    pub async fn resolve(&self, context: &TargetContext) -> Result<ResolvedTarget, PromotionError> {
        let Some(account) = context.account.as_deref().filter(|a| !a.is_empty()) else {
            tracing::debug!(registry = self.source.name(), "same-account target");
            return Ok(ResolvedTarget::new(
                self.source.clone(),
                TargetScope::SameAccount,
            ));
        };
        let region = context
            .region
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.region);

        let credentials_error = |source| PromotionError::Credentials {
            account: account.to_owned(),
            source,
        };

        let role = RoleArn::new(account, &self.role_name).map_err(credentials_error)?;
        let credentials = self
            .credentials
            .assume_role(&role, "image-promotion")
            .await
            .map_err(credentials_error)?;
        let registry = self
            .connector
            .connect(account, region, &credentials)
            .await
            .map_err(credentials_error)?;

        tracing::debug!(registry = registry.name(), %region, "cross-account target");
        Ok(ResolvedTarget::new(
            registry,
            TargetScope::CrossAccount {
                account: account.to_owned(),
                region: region.to_owned(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::{CredentialError, LocalCredentialProvider, StorageConnector, StorageRegistry};
    use storage::{MemoryStorage, Storage};

    fn resolver(provider: LocalCredentialProvider) -> TargetResolver {
        let storage: Storage = MemoryStorage::new().into();
        let source = StorageRegistry::for_account(&storage, "000000000000", "us-east-1");
        TargetResolver::new(
            Arc::new(source),
            Arc::new(provider),
            Arc::new(StorageConnector::new(storage)),
            "us-east-1",
        )
    }

    #[test]
    fn image_uri_shapes() {
        let storage: Storage = MemoryStorage::new().into();
        let registry: Arc<dyn Registry> = Arc::new(StorageRegistry::for_account(
            &storage,
            "123456789012",
            "eu-west-1",
        ));
        let image = ImageSpec::new("myapp/api", "1.0.0");

        let cross = ResolvedTarget::new(
            registry.clone(),
            TargetScope::CrossAccount {
                account: "123456789012".into(),
                region: "eu-west-1".into(),
            },
        );
        assert_eq!(
            cross.image_uri(&image),
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com/myapp/api:1.0.0"
        );

        let same = ResolvedTarget::new(registry, TargetScope::SameAccount);
        assert_eq!(same.image_uri(&image), "myapp/api:1.0.0");
    }

    #[tokio::test]
    async fn same_account_reuses_source() {
        let resolver = resolver(LocalCredentialProvider::new());
        for context in [
            TargetContext::same_account(),
            TargetContext::cross_account("", Some("eu-west-1".into())),
        ] {
            let target = resolver.resolve(&context).await.unwrap();
            assert_eq!(target.scope(), &TargetScope::SameAccount);
            assert_eq!(target.registry().name(), "000000000000-us-east-1");
        }
    }

    #[tokio::test]
    async fn cross_account_defaults_region() {
        let resolver = resolver(LocalCredentialProvider::new());
        let target = resolver
            .resolve(&TargetContext::cross_account("123456789012", None))
            .await
            .unwrap();
        assert!(target.is_cross_account());
        assert_eq!(target.registry().name(), "123456789012-us-east-1");

        let target = resolver
            .resolve(&TargetContext::cross_account(
                "123456789012",
                Some("eu-west-1".into()),
            ))
            .await
            .unwrap();
        assert_eq!(target.registry().name(), "123456789012-eu-west-1");
    }

    #[tokio::test]
    async fn credential_failures_are_fatal() {
        let resolver = resolver(LocalCredentialProvider::new().deny_account("123456789012"));
        let error = resolver
            .resolve(&TargetContext::cross_account("123456789012", None))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            PromotionError::Credentials {
                source: CredentialError::AccessDenied(_),
                ..
            }
        ));

        let error = resolver
            .resolve(&TargetContext::cross_account("not-an-account", None))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            PromotionError::Credentials {
                source: CredentialError::InvalidAccount(_),
                ..
            }
        ));
    }
}
