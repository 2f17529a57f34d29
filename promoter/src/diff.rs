//! Working out which blobs a target repository lacks.

use std::collections::{HashMap, HashSet};

use registry::{Digest, LayerAvailability, MAX_LAYER_CHECK, Registry};

use crate::error::PromotionError;

/// Digests of one image split by presence at the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerDiff {
    /// Blobs the target already holds.
    pub present: Vec<Digest>,

    /// Blobs which must be copied, in first-seen order.
    pub missing: Vec<Digest>,
}

/// Drop repeated digests, keeping the first occurrence.
pub fn dedup_digests(digests: &[Digest]) -> Vec<Digest> {
    let mut seen = HashSet::with_capacity(digests.len());
    digests
        .iter()
        .filter(|digest| seen.insert(*digest))
        .cloned()
        .collect()
}

/// Ask `registry` which of `digests` `repository` is missing.
///
/// Queries go out in chunks of [`MAX_LAYER_CHECK`]. A digest counts as present
/// only when the registry explicitly reports it available; unavailable, failed,
/// and unreported digests are all missing.
#[tracing::instrument(skip(registry, digests), fields(registry=registry.name(), count=digests.len()))]
pub async fn diff_layers(
    registry: &dyn Registry,
    repository: &str,
    digests: &[Digest],
) -> Result<LayerDiff, PromotionError> {
    let digests = dedup_digests(digests);
    let mut diff = LayerDiff::default();

    for chunk in digests.chunks(MAX_LAYER_CHECK) {
        let checks = registry
            .check_layers(repository, chunk)
            .await
            .map_err(|source| PromotionError::LayerCheck {
                repository: repository.to_owned(),
                source,
            })?;

        let reported: HashMap<&Digest, &LayerAvailability> = checks
            .iter()
            .map(|check| (&check.digest, &check.availability))
            .collect();

        for digest in chunk {
            match reported.get(digest) {
                Some(LayerAvailability::Available) => diff.present.push(digest.clone()),
                Some(LayerAvailability::Failed { code, reason }) => {
                    tracing::debug!(%digest, %code, %reason, "layer check failed, copying");
                    diff.missing.push(digest.clone());
                }
                Some(LayerAvailability::Unavailable) | None => diff.missing.push(digest.clone()),
            }
        }
    }

    tracing::debug!(
        present = diff.present.len(),
        missing = diff.missing.len(),
        "layer diff"
    );
    Ok(diff)
}
