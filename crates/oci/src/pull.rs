//! Pulling images, resolving multi-platform indexes first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::platform::{Platform, PlatformFilter};
use crate::reference::ContainerReference;
use crate::schema::validate_image_index;
use crate::transport::RegistryTransport;
use crate::{Error, IMAGE_INDEX_MEDIA_TYPE, Result};

/// Options controlling platform selection on pull.
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Platform to select instead of the host platform.
    pub platform: Option<Platform>,
    /// Fail when an image index has no entry for the platform.
    pub strict_platform: bool,
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOutcome {
    /// Files written below `path`.
    pub files: Vec<PathBuf>,
    /// Destination directory.
    pub path: PathBuf,
}

/// Digest of the first index entry whose `platform` matches `platform`.
///
/// Entries without a `platform` object match any platform.
#[must_use]
pub fn select_platform_manifest(index: &Value, platform: &Platform) -> Option<String> {
    index
        .get("manifests")?
        .as_array()?
        .iter()
        .find(|entry| {
            let filter: PlatformFilter = entry
                .get("platform")
                .and_then(|p| serde_json::from_value(p.clone()).ok())
                .unwrap_or_default();
            platform.matches(&filter)
        })
        .and_then(|entry| entry.get("digest"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Pull `target` into `destination`.
///
/// When `target` resolves to an image index, the entry for the host
/// platform (or `options.platform`) is pulled by digest. Without a
/// matching entry the original reference is pulled, unless
/// `options.strict_platform` is set.
pub async fn pull_image(
    transport: &dyn RegistryTransport,
    target: &str,
    destination: impl AsRef<Path>,
    options: &PullOptions,
) -> Result<PullOutcome> {
    let destination = destination.as_ref();
    let mut reference = ContainerReference::parse(target)?;
    info!(%reference, ?destination, "Pulling image");

    transport.load_auth_config(&reference).await?;

    match fetch_index(transport, &reference).await {
        Ok(index) => {
            let platform = match &options.platform {
                Some(platform) => platform.clone(),
                None => Platform::detect_host()?,
            };

            if let Some(digest) = select_platform_manifest(&index, &platform) {
                debug!(%platform, %digest, "Selected platform manifest");
                reference = reference.with_digest(digest);
            } else if options.strict_platform {
                return Err(Error::no_matching_platform(
                    reference.to_string(),
                    platform.to_string(),
                ));
            } else {
                warn!(%reference, %platform, "No manifest in image index matches platform, pulling as-is");
            }
        }
        Err(e) => debug!(error = %e, "Not an image index"),
    }

    let files = transport.pull(&reference, destination).await?;
    info!(%reference, file_count = files.len(), "Pulled image");

    Ok(PullOutcome {
        files,
        path: destination.to_path_buf(),
    })
}

async fn fetch_index(
    transport: &dyn RegistryTransport,
    reference: &ContainerReference,
) -> Result<Value> {
    let index = transport
        .fetch_manifest(reference, &[IMAGE_INDEX_MEDIA_TYPE])
        .await?;
    validate_image_index(&index)?;
    Ok(index)
}
