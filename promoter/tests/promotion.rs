use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use camino::Utf8Path;
use http::Uri;
use parking_lot::Mutex;

use promoter::manifest::manifest_key;
use promoter::{Coordinator, PromotionError, PromotionRequest, PromotionResult};
use registry::{
    CredentialError, Digest, Image, LayerCheck, LocalCredentialProvider, Outcome, Registry,
    RegistryConnector, RegistryResult, StorageFetcher, StorageRegistry, TemporaryCredentials,
    UploadSession,
};
use storage::{MemoryStorage, Storage};

const BUCKET: &str = "artifacts";
const PREFIX: &str = "builds/42/";
const TARGET_ACCOUNT: &str = "123456789012";

/// Wraps a registry, counting calls per operation.
#[derive(Debug)]
struct CountingRegistry {
    inner: StorageRegistry,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl CountingRegistry {
    fn new(inner: StorageRegistry) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::default(),
        })
    }

    fn record(&self, operation: &'static str) {
        *self.calls.lock().entry(operation).or_default() += 1;
    }

    fn count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or_default()
    }

    fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait::async_trait]
impl Registry for CountingRegistry {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_image(&self, repository: &str, tag: &str) -> RegistryResult<Option<Image>> {
        self.record("get_image");
        self.inner.get_image(repository, tag).await
    }

    async fn check_layers(
        &self,
        repository: &str,
        digests: &[Digest],
    ) -> RegistryResult<Vec<LayerCheck>> {
        self.record("check_layers");
        self.inner.check_layers(repository, digests).await
    }

    async fn download_url(&self, repository: &str, digest: &Digest) -> RegistryResult<Uri> {
        self.record("download_url");
        self.inner.download_url(repository, digest).await
    }

    async fn initiate_upload(&self, repository: &str) -> RegistryResult<UploadSession> {
        self.record("initiate_upload");
        self.inner.initiate_upload(repository).await
    }

    async fn upload_part(
        &self,
        repository: &str,
        upload_id: &str,
        first_byte: u64,
        last_byte: u64,
        part: Bytes,
    ) -> RegistryResult<u64> {
        self.record("upload_part");
        self.inner
            .upload_part(repository, upload_id, first_byte, last_byte, part)
            .await
    }

    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &Digest,
    ) -> RegistryResult<Outcome> {
        self.record("complete_upload");
        self.inner
            .complete_upload(repository, upload_id, digest)
            .await
    }

    async fn abort_upload(&self, repository: &str, upload_id: &str) -> RegistryResult<()> {
        self.record("abort_upload");
        self.inner.abort_upload(repository, upload_id).await
    }

    async fn put_image(
        &self,
        repository: &str,
        tag: &str,
        manifest: &str,
        media_type: Option<&str>,
    ) -> RegistryResult<Outcome> {
        self.record("put_image");
        self.inner
            .put_image(repository, tag, manifest, media_type)
            .await
    }

    async fn repository_exists(&self, repository: &str) -> RegistryResult<bool> {
        self.record("repository_exists");
        self.inner.repository_exists(repository).await
    }

    async fn create_repository(&self, repository: &str) -> RegistryResult<Outcome> {
        self.record("create_repository");
        self.inner.create_repository(repository).await
    }
}

/// Hands out the same target registry for any account.
#[derive(Debug)]
struct FixedConnector {
    target: Arc<CountingRegistry>,
}

#[async_trait::async_trait]
impl RegistryConnector for FixedConnector {
    async fn connect(
        &self,
        _account: &str,
        _region: &str,
        _credentials: &TemporaryCredentials,
    ) -> Result<Arc<dyn Registry>, CredentialError> {
        Ok(self.target.clone())
    }
}

struct Harness {
    storage: Storage,
    source: Arc<CountingRegistry>,
    target: Arc<CountingRegistry>,
    coordinator: Coordinator,
}

impl Harness {
    fn new() -> Self {
        Self::with_credentials(LocalCredentialProvider::new())
    }

    fn with_credentials(credentials: LocalCredentialProvider) -> Self {
        let storage: Storage = MemoryStorage::new().into();
        let source = CountingRegistry::new(StorageRegistry::for_account(
            &storage,
            "000000000000",
            "us-east-1",
        ));
        let target = CountingRegistry::new(
            StorageRegistry::for_account(&storage, TARGET_ACCOUNT, "eu-west-1").with_part_size(3),
        );

        let coordinator = Coordinator::builder()
            .storage(storage.clone())
            .source(source.clone())
            .fetcher(Arc::new(StorageFetcher::new(storage.clone())))
            .credentials(Arc::new(credentials))
            .connector(Arc::new(FixedConnector {
                target: target.clone(),
            }))
            .region("us-east-1")
            .layer_concurrency(2)
            .build()
            .unwrap();

        Self {
            storage,
            source,
            target,
            coordinator,
        }
    }

    async fn write_manifest(&self, document: &str) {
        self.storage
            .put(BUCKET, &manifest_key(PREFIX), document.as_bytes())
            .await
            .unwrap();
    }

    /// Push an image to the source with a config blob and `layers`.
    async fn seed_image(&self, repository: &str, tag: &str, layers: &[&[u8]]) -> Vec<Digest> {
        let source = &self.source.inner;
        source.create_repository(repository).await.unwrap();

        let mut digests = vec![
            source
                .put_blob(repository, format!("config {tag}").as_bytes())
                .await
                .unwrap(),
        ];
        for layer in layers {
            digests.push(source.put_blob(repository, layer).await.unwrap());
        }

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": registry::manifest::OCI_MANIFEST,
            "config": { "digest": digests[0] },
            "layers": digests[1..]
                .iter()
                .map(|d| serde_json::json!({ "digest": d }))
                .collect::<Vec<_>>(),
        })
        .to_string();
        source
            .put_image(repository, tag, &manifest, None)
            .await
            .unwrap();
        self.source.reset();
        digests
    }

    fn same_account(&self) -> PromotionRequest {
        PromotionRequest {
            env: "test".into(),
            build_id: "42".into(),
            source_bucket: BUCKET.into(),
            source_key_prefix: PREFIX.into(),
            ..Default::default()
        }
    }

    fn cross_account(&self) -> PromotionRequest {
        PromotionRequest {
            target_account: Some(TARGET_ACCOUNT.into()),
            target_region: Some("eu-west-1".into()),
            ..self.same_account()
        }
    }
}

#[tokio::test]
async fn same_account_end_to_end() {
    let harness = Harness::new();
    harness.seed_image("myapp/api", "1.0.0", &[b"layer"]).await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    let result = harness
        .coordinator
        .promote(&harness.same_account())
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({
            "images_promoted": 1,
            "images": ["myapp/api:1.0.0"],
            "skipped": false,
        })
    );

    // Same-account promotion never copies blobs.
    assert_eq!(harness.source.count("download_url"), 0);
    assert_eq!(harness.source.count("check_layers"), 0);
    assert_eq!(harness.target.total(), 0);
}

#[tokio::test]
async fn missing_manifest_is_skipped_without_registry_calls() {
    let harness = Harness::new();
    let result = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();
    assert_eq!(result, PromotionResult::skipped());
    assert_eq!(harness.source.total(), 0);
    assert_eq!(harness.target.total(), 0);
}

#[tokio::test]
async fn empty_manifest_is_skipped_without_registry_calls() {
    let harness = Harness::new();
    harness.write_manifest(r#"{"images": []}"#).await;
    let result = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();
    assert_eq!(result, PromotionResult::skipped());
    assert_eq!(harness.source.total(), 0);
    assert_eq!(harness.target.total(), 0);
}

#[tokio::test]
async fn cross_account_copies_every_layer_then_publishes() {
    let harness = Harness::new();
    let digests = harness
        .seed_image("myapp/api", "1.0.0", &[b"first layer", b"second layer"])
        .await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    let result = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();
    assert_eq!(
        result.images,
        vec!["123456789012.dkr.ecr.eu-west-1.amazonaws.com/myapp/api:1.0.0"]
    );

    assert_eq!(harness.target.count("create_repository"), 1);
    assert_eq!(harness.source.count("download_url"), digests.len());
    assert_eq!(harness.target.count("initiate_upload"), digests.len());
    assert_eq!(harness.target.count("complete_upload"), digests.len());
    // Parts are limited to three bytes by the target.
    assert!(harness.target.count("upload_part") > digests.len());
    assert_eq!(harness.target.count("put_image"), 1);

    let published = harness
        .target
        .inner
        .get_image("myapp/api", "1.0.0")
        .await
        .unwrap()
        .unwrap();
    let source = harness
        .source
        .inner
        .get_image("myapp/api", "1.0.0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.manifest, source.manifest);
}

#[tokio::test]
async fn only_missing_layers_are_copied() {
    let harness = Harness::new();
    let digests = harness
        .seed_image("myapp/api", "1.0.0", &[b"base", b"deps", b"app"])
        .await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    // The target already shares the config and base layer.
    let target = &harness.target.inner;
    target.create_repository("myapp/api").await.unwrap();
    target.put_blob("myapp/api", b"config 1.0.0").await.unwrap();
    target.put_blob("myapp/api", b"base").await.unwrap();

    harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();

    let missing = digests.len() - 2;
    assert_eq!(harness.source.count("download_url"), missing);
    assert_eq!(harness.target.count("initiate_upload"), missing);
    assert_eq!(harness.target.count("complete_upload"), missing);
    assert_eq!(harness.target.count("create_repository"), 0);
}

#[tokio::test]
async fn rerun_is_idempotent_and_copies_nothing() {
    let harness = Harness::new();
    harness
        .seed_image("myapp/api", "1.0.0", &[b"one", b"two"])
        .await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    let first = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();

    harness.source.reset();
    harness.target.reset();

    let second = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second.images_promoted, 1);

    assert_eq!(harness.target.count("check_layers"), 1);
    assert_eq!(harness.source.count("download_url"), 0);
    assert_eq!(harness.target.count("initiate_upload"), 0);
    assert_eq!(harness.target.count("upload_part"), 0);
    assert_eq!(harness.target.count("put_image"), 1);
}

#[tokio::test]
async fn repeated_digests_are_copied_once() {
    let harness = Harness::new();
    harness
        .seed_image("myapp/api", "1.0.0", &[b"same", b"same", b"other"])
        .await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();

    // config, "same" and "other"
    assert_eq!(harness.target.count("initiate_upload"), 3);
}

#[tokio::test]
async fn schema1_manifest_is_replicated() {
    let harness = Harness::new();
    let source = &harness.source.inner;
    source.create_repository("legacy/app").await.unwrap();
    let l1 = source.put_blob("legacy/app", b"legacy one").await.unwrap();
    let l2 = source.put_blob("legacy/app", b"legacy two").await.unwrap();
    let manifest = serde_json::json!({
        "schemaVersion": 1,
        "name": "legacy/app",
        "tag": "0.1",
        "fsLayers": [{ "blobSum": l1 }, { "blobSum": l2 }],
    })
    .to_string();
    source
        .put_image("legacy/app", "0.1", &manifest, None)
        .await
        .unwrap();
    harness.source.reset();
    harness
        .write_manifest(r#"{"images":[{"repository":"legacy/app","tag":"0.1"}]}"#)
        .await;

    let result = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap();
    assert_eq!(result.images_promoted, 1);
    assert_eq!(harness.target.count("initiate_upload"), 2);

    let published = harness
        .target
        .inner
        .get_image("legacy/app", "0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        published.media_type.as_deref(),
        Some(registry::manifest::DOCKER_MANIFEST_V1)
    );
}

#[tokio::test]
async fn invalid_image_fails_before_any_registry_call() {
    let harness = Harness::new();
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api"}]}"#)
        .await;

    let error = harness
        .coordinator
        .promote(&harness.same_account())
        .await
        .unwrap_err();
    assert!(error.is_invalid_input());
    assert!(matches!(error, PromotionError::Image { ref image, .. } if image == "myapp/api:"));
    assert_eq!(harness.source.total(), 0);
}

#[tokio::test]
async fn first_failure_stops_the_batch() {
    let harness = Harness::new();
    harness.seed_image("myapp/api", "1.0.0", &[b"a"]).await;
    harness.seed_image("myapp/web", "1.0.0", &[b"b"]).await;
    harness
        .write_manifest(
            r#"{"images":[
                {"repository":"myapp/api","tag":"1.0.0"},
                {"repository":"myapp/worker","tag":"1.0.0"},
                {"repository":"myapp/web","tag":"1.0.0"}
            ]}"#,
        )
        .await;

    let error = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap_err();

    match &error {
        PromotionError::Image { image, source } => {
            assert_eq!(image, "myapp/worker:1.0.0");
            assert!(matches!(**source, PromotionError::UpstreamNotFound { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The third image is never attempted.
    assert_eq!(harness.source.count("get_image"), 2);
    assert!(
        harness
            .target
            .inner
            .get_image("myapp/web", "1.0.0")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn credential_failure_aborts_before_any_image() {
    let harness =
        Harness::with_credentials(LocalCredentialProvider::new().deny_account(TARGET_ACCOUNT));
    harness.seed_image("myapp/api", "1.0.0", &[b"a"]).await;
    harness
        .write_manifest(r#"{"images":[{"repository":"myapp/api","tag":"1.0.0"}]}"#)
        .await;

    let error = harness
        .coordinator
        .promote(&harness.cross_account())
        .await
        .unwrap_err();
    assert!(matches!(error, PromotionError::Credentials { .. }));
    assert_eq!(harness.source.total(), 0);
    assert_eq!(harness.target.total(), 0);
}

#[tokio::test]
async fn malformed_promotion_manifest_is_fatal() {
    let harness = Harness::new();
    harness.write_manifest("{\"images\": {}}").await;
    let error = harness
        .coordinator
        .promote(&harness.same_account())
        .await
        .unwrap_err();
    assert!(matches!(error, PromotionError::ManifestFormat { .. }));

    // The manifest object lives where the key prefix says.
    assert!(
        harness
            .storage
            .get(BUCKET, Utf8Path::new("builds/42/deploy-manifest.json"))
            .await
            .is_ok()
    );
}
