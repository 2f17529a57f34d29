//! Reading the promotion manifest, the list of images a build wants promoted.

use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use storage::Storage;

use crate::error::PromotionError;

/// Object name of the promotion manifest below the request's key prefix.
pub const MANIFEST_FILE_NAME: &str = "deploy-manifest.json";

/// One image to promote.
///
/// Missing fields decode as empty strings and are rejected by
/// [`ImageSpec::validate`], so a malformed entry fails the promotion rather
/// than the manifest read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Repository name, e.g. `myapp/api`.
    #[serde(default)]
    pub repository: String,

    /// Image tag.
    #[serde(default)]
    pub tag: String,
}

impl ImageSpec {
    /// An image spec for `repository:tag`.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Both fields must be non-empty.
    pub fn validate(&self) -> Result<(), PromotionError> {
        if self.repository.is_empty() {
            return Err(PromotionError::InvalidInput(format!(
                "image with tag {:?} has no repository",
                self.tag
            )));
        }
        if self.tag.is_empty() {
            return Err(PromotionError::InvalidInput(format!(
                "image in repository {:?} has no tag",
                self.repository
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// The ordered list of images produced by a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionManifest {
    /// Images in promotion order.
    #[serde(default)]
    pub images: Vec<ImageSpec>,
}

impl PromotionManifest {
    /// True when there is nothing to promote.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// The manifest object key for `prefix`, with any trailing slash dropped.
pub fn manifest_key(prefix: &str) -> Utf8PathBuf {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        Utf8PathBuf::from(MANIFEST_FILE_NAME)
    } else {
        Utf8PathBuf::from(format!("{prefix}/{MANIFEST_FILE_NAME}"))
    }
}

/// Fetch and decode the promotion manifest under `prefix` in `bucket`.
///
/// Returns `Ok(None)` when there is no manifest object. An object with no
/// content decodes as an empty manifest.
#[tracing::instrument(skip(storage), fields(driver=storage.name()))]
pub async fn read_manifest(
    storage: &Storage,
    bucket: &str,
    prefix: &str,
) -> Result<Option<PromotionManifest>, PromotionError> {
    let key = manifest_key(prefix);

    let data = match storage.get(bucket, &key).await {
        Ok(data) => data,
        Err(error) if error.is_not_found() => {
            tracing::debug!(%key, "no promotion manifest");
            return Ok(None);
        }
        Err(error) => {
            return Err(PromotionError::ManifestRead {
                bucket: bucket.to_owned(),
                key: key.into_string(),
                source: error,
            });
        }
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(PromotionManifest::default()));
    }

    let manifest: PromotionManifest =
        serde_json::from_slice(&data).map_err(|source| PromotionError::ManifestFormat {
            bucket: bucket.to_owned(),
            key: key.to_string(),
            source,
        })?;

    tracing::debug!(images = manifest.images.len(), "read promotion manifest");
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use storage::MemoryStorage;

    #[test]
    fn key_strips_trailing_slash() {
        assert_eq!(
            manifest_key("builds/42/").as_str(),
            "builds/42/deploy-manifest.json"
        );
        assert_eq!(
            manifest_key("builds/42").as_str(),
            "builds/42/deploy-manifest.json"
        );
        assert_eq!(manifest_key("").as_str(), "deploy-manifest.json");
    }

    #[test]
    fn validate_requires_both_fields() {
        assert!(ImageSpec::new("myapp/api", "1.0.0").validate().is_ok());
        assert!(ImageSpec::new("", "1.0.0").validate().is_err());
        assert!(ImageSpec::new("myapp/api", "").validate().is_err());
        assert_eq!(
            ImageSpec::new("myapp/api", "1.0.0").to_string(),
            "myapp/api:1.0.0"
        );
    }

    #[tokio::test]
    async fn missing_manifest_is_none() {
        let storage: Storage = MemoryStorage::with_buckets(&["artifacts"]).into();
        assert!(
            read_manifest(&storage, "artifacts", "builds/1/")
                .await
                .unwrap()
                .is_none()
        );
        // A missing bucket is just as absent.
        assert!(
            read_manifest(&storage, "elsewhere", "builds/1/")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn reads_images_in_order() {
        let storage: Storage = MemoryStorage::new().into();
        let doc = indoc! {r#"
            {
                "images": [
                    { "repository": "myapp/api", "tag": "1.0.0" },
                    { "repository": "myapp/worker", "tag": "1.0.0" },
                    { "repository": "myapp/web" }
                ]
            }
        "#};
        storage
            .put("artifacts", &manifest_key("builds/1"), doc.as_bytes())
            .await
            .unwrap();

        let manifest = read_manifest(&storage, "artifacts", "builds/1/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            manifest.images,
            vec![
                ImageSpec::new("myapp/api", "1.0.0"),
                ImageSpec::new("myapp/worker", "1.0.0"),
                ImageSpec::new("myapp/web", ""),
            ]
        );
    }

    #[tokio::test]
    async fn empty_documents() {
        let storage: Storage = MemoryStorage::new().into();
        for (prefix, doc) in [("a", "{}"), ("b", r#"{"images": []}"#), ("c", "")] {
            storage
                .put("artifacts", &manifest_key(prefix), doc.as_bytes())
                .await
                .unwrap();
            let manifest = read_manifest(&storage, "artifacts", prefix)
                .await
                .unwrap()
                .unwrap();
            assert!(manifest.is_empty(), "{prefix}");
        }
    }

    #[tokio::test]
    async fn malformed_manifest_is_fatal() {
        let storage: Storage = MemoryStorage::new().into();
        storage
            .put("artifacts", &manifest_key("x"), b"{\"images\": 3}")
            .await
            .unwrap();
        let error = read_manifest(&storage, "artifacts", "x").await.unwrap_err();
        assert!(matches!(error, PromotionError::ManifestFormat { .. }));
    }
}
