//! Artifact discovery
//!
//! A backend that reports "done" may still be materializing its output, so
//! the raw video is located by listing the output location and picking the
//! first object with the media suffix instead of trusting a fixed path.

use avatar_storage::{layout, ArtifactKey, ObjectStore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of one discovery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found(ArtifactKey),
    /// Listing was empty
    NotYetVisible,
    /// Listing had objects but none with the media suffix
    Unmatched { listed: usize },
}

/// Listable prefix for a job's raw output
///
/// The backend's location hint wins when it lies inside the artifact store;
/// otherwise the prefix derived from the job id is used.
pub fn resolve_prefix(artifacts: &dyn ObjectStore, job_id: Uuid, hint: Option<&str>) -> String {
    match hint.filter(|h| !h.is_empty()) {
        Some(hint) => match artifacts.prefix_from_location(hint) {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => {
                warn!(
                    "Job {}: output location {} is outside the artifact store, using derived prefix",
                    job_id, hint
                );
                layout::raw_video_prefix(job_id)
            }
        },
        None => layout::raw_video_prefix(job_id),
    }
}

/// First key (lexicographically) ending with `suffix`, case-insensitive
pub fn select_media(keys: &[ArtifactKey], suffix: &str) -> Discovery {
    let objects: Vec<&ArtifactKey> = keys
        .iter()
        .filter(|k| !k.as_str().ends_with('/'))
        .collect();
    if objects.is_empty() {
        return Discovery::NotYetVisible;
    }

    let suffix = suffix.to_ascii_lowercase();
    objects
        .iter()
        .filter(|k| k.as_str().to_ascii_lowercase().ends_with(&suffix))
        .min()
        .map(|k| Discovery::Found((*k).clone()))
        .unwrap_or(Discovery::Unmatched {
            listed: objects.len(),
        })
}

/// List `prefix` and select the media object
pub async fn discover(
    artifacts: &dyn ObjectStore,
    prefix: &str,
    suffix: &str,
) -> avatar_storage::Result<Discovery> {
    let keys = artifacts.list(prefix).await?;
    let result = select_media(&keys, suffix);
    debug!("Discovery under {}: {} keys -> {:?}", prefix, keys.len(), result);
    Ok(result)
}
