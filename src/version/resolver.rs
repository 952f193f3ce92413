//! Update decision for one image
//!
//! Combines the registry's view (tag list, digest of the current tag) with the local
//! digest into a [`VersionInfo`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reference::ImageReference;
use crate::version::registry::ManifestDescriptor;
use crate::version::semver::{find_best_version, is_newer, variant};

/// Result of checking one image for updates; the unit of cache storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Image string as used by the workload; the cache key
    pub image: String,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub current_digest: Option<String>,
    pub latest_digest: Option<String>,
    pub update_available: bool,
    pub source_url: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Decide whether `reference` has an update.
///
/// * `tags` - all tags of the repository
/// * `current_digest` - digest of the image the workload runs, if known
/// * `latest` - registry descriptor for the reference's current tag, if it exists
///
/// An update is available when the registry digest for the current tag drifted away
/// from the local digest, or when a strictly greater semver tag exists. Only tags with the
/// same variant suffix as the current tag are candidates, so `1.25-alpine` moves to
/// `1.27-alpine` and never to `1.27`.
pub fn resolve(
    image: &str,
    reference: &ImageReference,
    tags: &[String],
    current_digest: Option<&str>,
    latest: Option<&ManifestDescriptor>,
) -> VersionInfo {
    let digest_drift = match (current_digest, latest) {
        (Some(current), Some(descriptor)) => !descriptor.matches(current),
        _ => false,
    };

    let current_variant = reference.tag.as_deref().and_then(variant);
    let candidates: Vec<String> = tags
        .iter()
        .filter(|tag| variant(tag) == current_variant)
        .cloned()
        .collect();
    let latest_version = find_best_version(&candidates);
    let newer_tag = match (&reference.tag, &latest_version) {
        (Some(current), Some(best)) => is_newer(current, best),
        _ => false,
    };

    VersionInfo {
        image: image.to_string(),
        current_version: reference.tag.clone(),
        latest_version,
        current_digest: current_digest.map(str::to_string),
        latest_digest: latest.map(|d| d.digest.clone()),
        update_available: digest_drift || newer_tag,
        source_url: None,
        checked_at: Utc::now(),
    }
}
