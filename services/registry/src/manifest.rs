//! Decoding of image manifests into the blobs they reference.
//!
//! Three document shapes are understood:
//!
//! - Docker schema 2 and OCI image manifests, with a typed `config`
//!   descriptor and an ordered `layers` list.
//! - Docker schema 1 manifests, with a flat `fsLayers` list of `blobSum`s.
//! - Manifest lists / OCI indexes, which are recognized but not expanded.

use serde::Deserialize;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryErrorKind, RegistryResult};

/// Docker schema 1 manifest.
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Signed docker schema 1 manifest.
pub const DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Docker schema 2 manifest.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    digest: Digest,
}

#[derive(Debug, Deserialize)]
struct BlobSum {
    #[serde(rename = "blobSum")]
    blob_sum: Digest,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    schema_version: Option<u64>,
    media_type: Option<String>,
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    fs_layers: Vec<BlobSum>,
    manifests: Option<Vec<serde_json::Value>>,
}

/// A decoded image manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    media_type: String,
    config: Option<Digest>,
    layers: Vec<Digest>,
    blob_sums: Vec<Digest>,
    index: bool,
}

impl ImageManifest {
    /// Decode a manifest document.
    ///
    /// The document must be a JSON object. An object with none of the known
    /// fields is a valid, empty manifest.
    pub fn parse(data: &[u8]) -> RegistryResult<Self> {
        let invalid = |err: serde_json::Error| {
            RegistryError::new(RegistryErrorKind::InvalidManifest, "decoding image manifest")
                .with_source(err)
        };

        let value: serde_json::Value = serde_json::from_slice(data).map_err(invalid)?;
        if !value.is_object() {
            return Err(RegistryError::new(
                RegistryErrorKind::InvalidManifest,
                "image manifest is not a JSON object",
            ));
        }
        let raw: RawManifest = serde_json::from_value(value).map_err(invalid)?;

        let index = raw.manifests.is_some();
        let media_type = raw
            .media_type
            .clone()
            .unwrap_or_else(|| media_type_for(raw.schema_version, index).to_owned());

        Ok(ImageManifest {
            media_type,
            config: raw.config.map(|c| c.digest),
            layers: raw.layers.into_iter().map(|l| l.digest).collect(),
            blob_sums: raw.fs_layers.into_iter().map(|l| l.blob_sum).collect(),
            index,
        })
    }

    /// Every blob the manifest references, in declaration order.
    ///
    /// Typed manifests yield the config digest followed by the layers. Schema 1
    /// manifests yield their blob sums. Indexes yield nothing, as they reference
    /// other manifests rather than blobs.
    pub fn digests(&self) -> Vec<Digest> {
        if self.config.is_none() && self.layers.is_empty() {
            return self.blob_sums.clone();
        }

        self.config
            .iter()
            .chain(self.layers.iter())
            .cloned()
            .collect()
    }

    /// The declared media type, or the one implied by the document shape.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// True for manifest lists and OCI indexes.
    pub fn is_index(&self) -> bool {
        self.index
    }
}

fn media_type_for(schema_version: Option<u64>, index: bool) -> &'static str {
    match (schema_version, index) {
        (Some(1), _) => DOCKER_MANIFEST_V1,
        (Some(2), true) => DOCKER_MANIFEST_LIST,
        (Some(2), false) => DOCKER_MANIFEST_V2,
        (_, true) => OCI_INDEX,
        _ => OCI_MANIFEST,
    }
}

/// Detect the media type of a manifest document, falling back to OCI when
/// the document cannot be decoded.
pub fn detect_media_type(data: &[u8]) -> String {
    ImageManifest::parse(data)
        .map(|m| m.media_type)
        .unwrap_or_else(|_| OCI_MANIFEST.to_owned())
}

/// Whether `media_type` names a manifest document this registry accepts.
pub fn is_manifest_type(media_type: &str) -> bool {
    matches!(
        media_type,
        DOCKER_MANIFEST_V1
            | DOCKER_MANIFEST_V1_SIGNED
            | DOCKER_MANIFEST_V2
            | DOCKER_MANIFEST_LIST
            | OCI_MANIFEST
            | OCI_INDEX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::formatdoc;

    fn d(n: u8) -> Digest {
        Digest::sha256(&[n])
    }

    #[test]
    fn schema2_config_then_layers() {
        let doc = formatdoc! {r#"
            {{
                "schemaVersion": 2,
                "mediaType": "{DOCKER_MANIFEST_V2}",
                "config": {{ "mediaType": "application/vnd.docker.container.image.v1+json", "size": 7, "digest": "{c}" }},
                "layers": [
                    {{ "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 1, "digest": "{l1}" }},
                    {{ "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 2, "digest": "{l2}" }}
                ]
            }}"#,
            c = d(0), l1 = d(1), l2 = d(2),
        };

        let manifest = ImageManifest::parse(doc.as_bytes()).unwrap();
        assert_eq!(manifest.digests(), vec![d(0), d(1), d(2)]);
        assert_eq!(manifest.media_type(), DOCKER_MANIFEST_V2);
        assert!(!manifest.is_index());
    }

    #[test]
    fn schema2_without_media_type_is_detected() {
        let doc = formatdoc! {r#"
            {{
                "schemaVersion": 2,
                "config": {{ "digest": "{c}" }},
                "layers": [{{ "digest": "{l1}" }}]
            }}"#,
            c = d(0), l1 = d(1),
        };

        let manifest = ImageManifest::parse(doc.as_bytes()).unwrap();
        assert_eq!(manifest.digests(), vec![d(0), d(1)]);
        assert_eq!(manifest.media_type(), DOCKER_MANIFEST_V2);
    }

    #[test]
    fn schema1_blob_sums_in_order() {
        let doc = formatdoc! {r#"
            {{
                "schemaVersion": 1,
                "name": "myapp/api",
                "tag": "1.0.0",
                "architecture": "amd64",
                "fsLayers": [{{ "blobSum": "{l1}" }}, {{ "blobSum": "{l2}" }}]
            }}"#,
            l1 = d(1), l2 = d(2),
        };

        let manifest = ImageManifest::parse(doc.as_bytes()).unwrap();
        assert_eq!(manifest.digests(), vec![d(1), d(2)]);
        assert_eq!(manifest.media_type(), DOCKER_MANIFEST_V1);
    }

    #[test]
    fn empty_object_is_empty() {
        let manifest = ImageManifest::parse(b"{}").unwrap();
        assert!(manifest.digests().is_empty());
        assert_eq!(manifest.media_type(), OCI_MANIFEST);
    }

    #[test]
    fn index_is_not_expanded() {
        let doc = formatdoc! {r#"
            {{
                "schemaVersion": 2,
                "mediaType": "{OCI_INDEX}",
                "manifests": [{{ "digest": "{m}", "platform": {{ "os": "linux" }} }}]
            }}"#,
            m = d(9),
        };

        let manifest = ImageManifest::parse(doc.as_bytes()).unwrap();
        assert!(manifest.is_index());
        assert!(manifest.digests().is_empty());
    }

    #[test]
    fn structurally_invalid_documents() {
        for doc in [
            &b"not json"[..],
            b"[]",
            b"\"manifest\"",
            b"{\"layers\": {}}",
            b"{\"config\": {\"size\": 3}}",
            b"{\"layers\": [{\"digest\": \"sha256:short\"}]}",
        ] {
            let error = ImageManifest::parse(doc).unwrap_err();
            assert_eq!(
                error.kind(),
                RegistryErrorKind::InvalidManifest,
                "{}",
                String::from_utf8_lossy(doc)
            );
        }
    }

    #[test]
    fn detect_falls_back_to_oci() {
        assert_eq!(detect_media_type(b"garbage"), OCI_MANIFEST);
        assert_eq!(
            detect_media_type(br#"{"schemaVersion": 2, "manifests": []}"#),
            DOCKER_MANIFEST_LIST
        );
        assert!(is_manifest_type(OCI_INDEX));
        assert!(!is_manifest_type("text/plain"));
    }
}
