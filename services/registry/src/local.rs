//! A registry kept in object storage.
//!
//! Layout inside the registry bucket:
//!
//! ```text
//! repositories/<repository>/_repository                  creation marker
//! repositories/<repository>/_layers/<algorithm>/<hex>     blob contents
//! repositories/<repository>/_manifests/<algorithm>/<hex>  manifest documents by digest
//! repositories/<repository>/_tags/<tag>                   JSON tag record (digest + media type)
//! ```
//!
//! Repository path components never start with `_`, so a nested repository
//! cannot collide with the entries of its parent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use http::Uri;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use storage::{Storage, StorageBucket};

use crate::api::{Image, LayerAvailability, LayerCheck, Outcome, Registry, UploadSession};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryErrorKind, RegistryResult};
use crate::manifest::{detect_media_type, is_manifest_type, ImageManifest};
use crate::MAX_LAYER_CHECK;

/// How long download urls stay valid unless configured otherwise.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(3600);

/// The longest lifetime a download url may be given: 7 days.
pub const MAX_URL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Upload sessions left open longer than this are discarded.
pub const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagRecord {
    digest: Digest,
    media_type: String,
}

#[derive(Debug)]
struct PendingUpload {
    repository: String,
    opened: DateTime<Utc>,
    data: Vec<u8>,
}

/// A [`Registry`] stored in a single storage bucket.
///
/// Upload sessions are held in memory by the instance (and its clones) which
/// opened them. Sessions which are neither completed nor aborted are dropped
/// once they outlive the upload ttl, the next time a session is opened.
#[derive(Debug, Clone)]
pub struct StorageRegistry {
    name: String,
    bucket: StorageBucket,
    uploads: Arc<Mutex<HashMap<String, PendingUpload>>>,
    part_size: Option<u64>,
    url_ttl: Duration,
    upload_ttl: Duration,
}

impl StorageRegistry {
    /// Create a registry named `name`, stored in `bucket`.
    pub fn new(name: impl Into<String>, bucket: StorageBucket) -> Self {
        Self {
            name: name.into(),
            bucket,
            uploads: Default::default(),
            part_size: None,
            url_ttl: DEFAULT_URL_TTL,
            upload_ttl: DEFAULT_UPLOAD_TTL,
        }
    }

    /// The registry of `account` in `region`, kept in the bucket `<account>-<region>`.
    pub fn for_account(storage: &Storage, account: &str, region: &str) -> Self {
        let name = format!("{account}-{region}");
        Self::new(name.clone(), storage.bucket(name))
    }

    /// Limit upload parts to `part_size` bytes, advertised on each session.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Set how long download urls remain valid.
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Discard upload sessions idle for longer than `ttl`.
    pub fn with_upload_ttl(mut self, ttl: Duration) -> Self {
        self.upload_ttl = ttl;
        self
    }

    /// Number of upload sessions currently open.
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    fn repository_path(&self, repository: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("repositories/{repository}/_repository"))
    }

    fn blob_path(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("repositories/{repository}/_layers")).join(digest.path())
    }

    fn manifest_path(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("repositories/{repository}/_manifests")).join(digest.path())
    }

    fn tag_path(&self, repository: &str, tag: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("repositories/{repository}/_tags/{tag}"))
    }

    fn expire_uploads(&self, uploads: &mut HashMap<String, PendingUpload>, now: DateTime<Utc>) {
        uploads.retain(|upload_id, pending| {
            let live = now
                .signed_duration_since(pending.opened)
                .to_std()
                .map_or(true, |age| age < self.upload_ttl);
            if !live {
                tracing::debug!(%upload_id, repository = %pending.repository, "upload session expired");
            }
            live
        });
    }

    async fn require_repository(&self, repository: &str) -> RegistryResult<()> {
        validate_repository(repository)?;
        if self.bucket.exists(&self.repository_path(repository)).await? {
            Ok(())
        } else {
            Err(RegistryError::new(
                RegistryErrorKind::RepositoryNotFound,
                format!("{}/{repository}", self.name),
            ))
        }
    }

    async fn read_tag(&self, repository: &str, tag: &str) -> RegistryResult<Option<TagRecord>> {
        let path = self.tag_path(repository, tag);
        let data = match self.bucket.get(&path).await {
            Ok(data) => data,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let record = serde_json::from_slice(&data).map_err(|err| {
            RegistryError::new(RegistryErrorKind::Storage, format!("corrupt tag record {path}"))
                .with_source(err)
        })?;
        Ok(Some(record))
    }

    /// Store a blob directly, bypassing upload sessions.
    #[tracing::instrument(skip(self, data), fields(registry=%self.name, size=data.len()))]
    pub async fn put_blob(&self, repository: &str, data: &[u8]) -> RegistryResult<Digest> {
        self.require_repository(repository).await?;
        let digest = Digest::sha256(data);
        self.bucket
            .put(&self.blob_path(repository, &digest), data)
            .await?;
        Ok(digest)
    }
}

#[async_trait::async_trait]
impl Registry for StorageRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn get_image(&self, repository: &str, tag: &str) -> RegistryResult<Option<Image>> {
        self.require_repository(repository).await?;

        let Some(record) = self.read_tag(repository, tag).await? else {
            tracing::trace!("no such tag");
            return Ok(None);
        };

        let manifest = match self
            .bucket
            .get(&self.manifest_path(repository, &record.digest))
            .await
        {
            Ok(data) => Some(String::from_utf8_lossy(&data).into_owned()),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error.into()),
        };

        Ok(Some(Image {
            repository: repository.to_owned(),
            tag: tag.to_owned(),
            manifest,
            media_type: Some(record.media_type),
        }))
    }

    #[tracing::instrument(skip(self, digests), fields(registry=%self.name, count=digests.len()))]
    async fn check_layers(
        &self,
        repository: &str,
        digests: &[Digest],
    ) -> RegistryResult<Vec<LayerCheck>> {
        if digests.len() > MAX_LAYER_CHECK {
            return Err(RegistryError::new(
                RegistryErrorKind::LimitExceeded,
                format!(
                    "{} digests requested, at most {MAX_LAYER_CHECK} per call",
                    digests.len()
                ),
            ));
        }
        self.require_repository(repository).await?;

        let mut checks = Vec::with_capacity(digests.len());
        for digest in digests {
            let availability = match self.bucket.exists(&self.blob_path(repository, digest)).await {
                Ok(true) => LayerAvailability::Available,
                Ok(false) => LayerAvailability::Unavailable,
                Err(error) => LayerAvailability::Failed {
                    code: RegistryErrorKind::Storage.code().to_owned(),
                    reason: error.to_string(),
                },
            };
            checks.push(LayerCheck {
                digest: digest.clone(),
                availability,
            });
        }

        Ok(checks)
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn download_url(&self, repository: &str, digest: &Digest) -> RegistryResult<Uri> {
        self.require_repository(repository).await?;

        let path = self.blob_path(repository, digest);
        if !self.bucket.exists(&path).await? {
            return Err(RegistryError::new(
                RegistryErrorKind::LayerNotFound,
                format!("{repository}@{digest}"),
            ));
        }

        let expires = i64::try_from(self.url_ttl.as_secs())
            .ok()
            .and_then(|ttl| Utc::now().timestamp().checked_add(ttl))
            .ok_or_else(|| {
                RegistryError::new(
                    RegistryErrorKind::InvalidRequest,
                    format!("download url ttl of {}s is out of range", self.url_ttl.as_secs()),
                )
            })?;
        let url = format!(
            "{}://{}/{path}?expires={expires}",
            self.bucket.scheme(),
            self.bucket.name()
        );
        url.parse::<Uri>().map_err(|err| {
            RegistryError::new(RegistryErrorKind::InvalidRequest, url).with_source(err)
        })
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn initiate_upload(&self, repository: &str) -> RegistryResult<UploadSession> {
        self.require_repository(repository).await?;

        let upload_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        {
            let mut uploads = self.uploads.lock();
            self.expire_uploads(&mut uploads, now);
            uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    repository: repository.to_owned(),
                    opened: now,
                    data: Vec::new(),
                },
            );
        }
        tracing::trace!(%upload_id, "upload session opened");

        Ok(UploadSession {
            upload_id,
            part_size: self.part_size,
        })
    }

    #[tracing::instrument(skip(self, part), fields(registry=%self.name, size=part.len()))]
    async fn upload_part(
        &self,
        repository: &str,
        upload_id: &str,
        first_byte: u64,
        last_byte: u64,
        part: Bytes,
    ) -> RegistryResult<u64> {
        let invalid_part = |message: String| {
            RegistryError::new(
                RegistryErrorKind::InvalidPart,
                format!("upload {upload_id}: {message}"),
            )
        };

        if last_byte.checked_sub(first_byte).map(|n| n + 1) != Some(part.len() as u64) {
            return Err(invalid_part(format!(
                "range {first_byte}-{last_byte} does not match {} bytes",
                part.len()
            )));
        }
        if let Some(limit) = self.part_size {
            if part.len() as u64 > limit {
                return Err(invalid_part(format!(
                    "part of {} bytes exceeds {limit}",
                    part.len()
                )));
            }
        }

        let mut uploads = self.uploads.lock();
        let pending = uploads
            .get_mut(upload_id)
            .filter(|pending| pending.repository == repository)
            .ok_or_else(|| {
                RegistryError::new(
                    RegistryErrorKind::UploadNotFound,
                    format!("{repository} upload {upload_id}"),
                )
            })?;

        if pending.data.len() as u64 != first_byte {
            return Err(invalid_part(format!(
                "expected part starting at {}, got {first_byte}",
                pending.data.len()
            )));
        }
        pending.data.extend_from_slice(&part);

        Ok(last_byte)
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &Digest,
    ) -> RegistryResult<Outcome> {
        let pending = {
            let mut uploads = self.uploads.lock();
            match uploads.get(upload_id) {
                Some(pending) if pending.repository == repository => uploads.remove(upload_id),
                _ => None,
            }
        }
        .ok_or_else(|| {
            RegistryError::new(
                RegistryErrorKind::UploadNotFound,
                format!("{repository} upload {upload_id}"),
            )
        })?;

        let path = self.blob_path(repository, digest);
        if self.bucket.exists(&path).await? {
            tracing::debug!(%digest, "layer already exists");
            return Ok(Outcome::AlreadyExists);
        }

        let computed = Digest::sha256(&pending.data);
        if &computed != digest {
            return Err(RegistryError::new(
                RegistryErrorKind::DigestMismatch,
                format!("expected {digest}, got {computed}"),
            ));
        }

        self.bucket.put(&path, &pending.data).await?;
        tracing::debug!(%digest, size = pending.data.len(), "layer stored");
        Ok(Outcome::Created)
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn abort_upload(&self, repository: &str, upload_id: &str) -> RegistryResult<()> {
        let mut uploads = self.uploads.lock();
        if uploads
            .get(upload_id)
            .is_some_and(|pending| pending.repository == repository)
        {
            uploads.remove(upload_id);
            tracing::trace!(%upload_id, "upload session aborted");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, manifest), fields(registry=%self.name))]
    async fn put_image(
        &self,
        repository: &str,
        tag: &str,
        manifest: &str,
        media_type: Option<&str>,
    ) -> RegistryResult<Outcome> {
        self.require_repository(repository).await?;
        validate_tag(tag)?;

        let media_type = media_type
            .map(str::to_owned)
            .unwrap_or_else(|| detect_media_type(manifest.as_bytes()));
        if !is_manifest_type(&media_type) {
            return Err(RegistryError::new(
                RegistryErrorKind::InvalidManifest,
                format!("unsupported manifest type {media_type}"),
            ));
        }

        let decoded = ImageManifest::parse(manifest.as_bytes())?;
        let mut missing = Vec::new();
        for digest in decoded.digests() {
            if !self.bucket.exists(&self.blob_path(repository, &digest)).await? {
                missing.push(digest.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::new(
                RegistryErrorKind::LayersNotFound,
                format!("{repository}:{tag} references {}", missing.join(", ")),
            ));
        }

        let digest = Digest::sha256(manifest.as_bytes());
        if let Some(existing) = self.read_tag(repository, tag).await? {
            if existing.digest == digest {
                tracing::debug!(%digest, "image already exists");
                return Ok(Outcome::AlreadyExists);
            }
        }

        self.bucket
            .put(&self.manifest_path(repository, &digest), manifest.as_bytes())
            .await?;

        let record = serde_json::to_vec(&TagRecord {
            digest: digest.clone(),
            media_type,
        })
        .map_err(|err| {
            RegistryError::new(RegistryErrorKind::Storage, "encoding tag record").with_source(err)
        })?;
        self.bucket
            .put(&self.tag_path(repository, tag), &record)
            .await?;

        tracing::debug!(%digest, "image published");
        Ok(Outcome::Created)
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn repository_exists(&self, repository: &str) -> RegistryResult<bool> {
        validate_repository(repository)?;
        Ok(self.bucket.exists(&self.repository_path(repository)).await?)
    }

    #[tracing::instrument(skip(self), fields(registry=%self.name))]
    async fn create_repository(&self, repository: &str) -> RegistryResult<Outcome> {
        validate_repository(repository)?;

        let path = self.repository_path(repository);
        if self.bucket.exists(&path).await? {
            return Ok(Outcome::AlreadyExists);
        }

        self.bucket
            .put(&path, Utc::now().to_rfc3339().as_bytes())
            .await?;
        tracing::debug!(%repository, "repository created");
        Ok(Outcome::Created)
    }
}

/// Validate repository name: `/` separated components, each starting with a
/// letter or digit.
fn validate_repository(name: &str) -> RegistryResult<()> {
    if name.is_empty()
        || name.split('/').any(|part| {
            !part
                .chars()
                .next()
                .is_some_and(|first| first.is_ascii_alphanumeric())
        })
    {
        return Err(RegistryError::new(
            RegistryErrorKind::InvalidRequest,
            format!("invalid repository name {name:?}"),
        ));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> RegistryResult<()> {
    if tag.is_empty() || tag.contains('/') || tag.starts_with('.') {
        return Err(RegistryError::new(
            RegistryErrorKind::InvalidRequest,
            format!("invalid tag {tag:?}"),
        ));
    }
    Ok(())
}
