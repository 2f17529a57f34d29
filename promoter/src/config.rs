//! Configuration for the `promote` binary.
//!
//! ```toml
//! region = "us-east-1"
//! account = "000000000000"
//! role-name = "DeploymentPipelineCrossAccountRole"
//! layer-concurrency = 4
//! download-url-ttl-seconds = 3600
//!
//! [storage]
//! local = { path = "/var/lib/promoter/objects" }
//!
//! [registry]
//! local = { path = "/var/lib/promoter/registries" }
//! ```

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use registry::{
    LocalCredentialProvider, StorageConnector, StorageFetcher, StorageRegistry, validate_account,
};
use serde::Deserialize;
use storage::StorageConfig;

use crate::coordinator::{BuildError, Coordinator};
use crate::promote::DEFAULT_LAYER_CONCURRENCY;
use crate::target::DEFAULT_ROLE_NAME;

/// Problems loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}")]
    Io {
        /// Configuration file.
        path: Utf8PathBuf,
        /// Read error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML of the expected shape.
    #[error("parsing configuration")]
    Parse(#[from] toml_edit::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The coordinator could not be assembled.
    #[error(transparent)]
    Build(#[from] BuildError),
}

fn default_account() -> String {
    "000000000000".to_owned()
}

fn default_role_name() -> String {
    DEFAULT_ROLE_NAME.to_owned()
}

fn default_layer_concurrency() -> usize {
    DEFAULT_LAYER_CONCURRENCY
}

fn default_url_ttl() -> u64 {
    registry::DEFAULT_URL_TTL.as_secs()
}

/// Promoter configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PromoterConfig {
    /// The invoking region.
    pub region: String,

    /// The source account.
    #[serde(default = "default_account")]
    pub account: String,

    /// Role assumed in target accounts.
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Layer copies in flight per image.
    #[serde(default = "default_layer_concurrency")]
    pub layer_concurrency: usize,

    /// Lifetime of blob download urls.
    #[serde(default = "default_url_ttl")]
    pub download_url_ttl_seconds: u64,

    /// Storage holding promotion manifests.
    pub storage: StorageConfig,

    /// Storage backing the registries. Defaults to the manifest storage.
    #[serde(default)]
    pub registry: Option<StorageConfig>,
}

impl PromoterConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let config: PromoterConfig = toml_edit::de::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        Self::from_toml(&document)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".into()));
        }
        validate_account(&self.account).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.role_name.is_empty() {
            return Err(ConfigError::Invalid("role-name must not be empty".into()));
        }
        if self.layer_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "layer-concurrency must be at least 1".into(),
            ));
        }
        if self.download_url_ttl_seconds == 0
            || self.download_url_ttl() > registry::MAX_URL_TTL
        {
            return Err(ConfigError::Invalid(format!(
                "download-url-ttl-seconds must be between 1 and {}",
                registry::MAX_URL_TTL.as_secs()
            )));
        }
        Ok(())
    }

    /// Lifetime of blob download urls.
    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_seconds)
    }

    /// Assemble a coordinator over storage-backed registries.
    pub fn coordinator(&self) -> Result<Coordinator, ConfigError> {
        let storage = self.storage.clone().build();
        let registries = self
            .registry
            .clone()
            .map(StorageConfig::build)
            .unwrap_or_else(|| storage.clone());
        let ttl = self.download_url_ttl();

        let source = StorageRegistry::for_account(&registries, &self.account, &self.region)
            .with_url_ttl(ttl);

        Ok(Coordinator::builder()
            .storage(storage)
            .source(Arc::new(source))
            .fetcher(Arc::new(StorageFetcher::new(registries.clone())))
            .credentials(Arc::new(LocalCredentialProvider::new()))
            .connector(Arc::new(StorageConnector::new(registries).with_url_ttl(ttl)))
            .region(&self.region)
            .role_name(&self.role_name)
            .layer_concurrency(self.layer_concurrency)
            .build()?)
    }
}
