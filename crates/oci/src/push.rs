//! Pushing single-platform and multi-platform images.
//!
//! Every push ends with an image index uploaded under the tag, so pull
//! always finds an index. A flat layer list yields a one-entry index
//! without platform; per-platform layer lists yield one manifest per
//! platform, each with its own image config.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::archive::diff_id_prefixed;
use crate::image::{Descriptor, ImageConfig, Manifest, build_image_index, empty_config};
use crate::platform::Platform;
use crate::reference::ContainerReference;
use crate::schema::{validate_image_index, validate_manifest};
use crate::transport::{RegistryTransport, UploadResponse};
use crate::{
    Error, IMAGE_CONFIG_MEDIA_TYPE, IMAGE_INDEX_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE,
    LAYER_MEDIA_TYPE, Result, TITLE_ANNOTATION,
};

/// Layers of one platform's image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLayers {
    /// Target platform.
    pub platform: Platform,
    /// `.tar.gz` layer archives, base layer first.
    pub layers: Vec<PathBuf>,
}

/// Layers to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSet {
    /// One platform-less manifest.
    Flat(Vec<PathBuf>),
    /// One manifest per platform, in order.
    PerPlatform(Vec<PlatformLayers>),
}

impl LayerSet {
    /// Interpret a JSON array of paths or of `{platform, layers}` objects.
    ///
    /// An empty array is an empty flat set. Mixed arrays are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::InvalidLayerSet("expected an array".to_string()))?;

        if items.iter().all(Value::is_string) {
            let paths = items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect();
            return Ok(Self::Flat(paths));
        }

        if items.iter().all(Value::is_object) {
            let records = items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone())
                        .map_err(|e| Error::InvalidLayerSet(e.to_string()))
                })
                .collect::<Result<Vec<PlatformLayers>>>()?;
            return Ok(Self::PerPlatform(records));
        }

        Err(Error::InvalidLayerSet(
            "expected either all paths or all {platform, layers} objects".to_string(),
        ))
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    /// Image name as given.
    pub name: String,
    /// Tag as given.
    pub tag: String,
    /// Fully qualified `registry/repository:tag`.
    #[serde(rename = "image")]
    pub reference: String,
    /// Digest of the uploaded image index.
    pub digest: String,
}

/// Manifest digest reported by an upload.
///
/// Prefers the digest header, then the last path segment of the location.
pub fn extract_digest(response: &UploadResponse) -> Result<String> {
    if let Some(digest) = response.content_digest.as_deref().filter(|d| !d.is_empty()) {
        return Ok(digest.to_string());
    }

    response
        .location
        .as_deref()
        .map(|location| location.split(['?', '#']).next().unwrap_or(location))
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .ok_or(Error::DigestNotFound)
}

/// Push `layers` as `name:tag`, finishing with an image index.
pub async fn push_image(
    transport: &dyn RegistryTransport,
    name: &str,
    tag: &str,
    layers: &LayerSet,
) -> Result<PushOutcome> {
    let container = ContainerReference::parse(&format!("{name}:{tag}"))?;
    info!(%container, "Pushing image");

    let mut manifests = Vec::new();
    match layers {
        LayerSet::Flat(paths) => {
            manifests.push(push_flat(transport, &container, paths).await?);
        }
        LayerSet::PerPlatform(records) => {
            for record in records {
                manifests.push(push_platform(transport, &container, record).await?);
            }
        }
    }

    let index = serde_json::to_value(build_image_index(&manifests))?;
    validate_image_index(&index)?;

    // Registries may resolve the empty descriptor as a blob.
    upload_empty_config(transport, &container).await?;

    let response = transport
        .upload_manifest(&container, &index, IMAGE_INDEX_MEDIA_TYPE)
        .await?;
    let digest = extract_digest(&response)?;
    info!(%container, %digest, manifest_count = manifests.len(), "Pushed image index");

    Ok(PushOutcome {
        name: name.to_string(),
        tag: tag.to_string(),
        reference: container.to_string(),
        digest,
    })
}

async fn push_flat(
    transport: &dyn RegistryTransport,
    container: &ContainerReference,
    paths: &[PathBuf],
) -> Result<Map<String, Value>> {
    let layers = upload_layers(transport, container, paths).await?;
    let config = upload_empty_config(transport, container).await?;

    let (digest, response, mut manifest) =
        upload_and_read_back(transport, container, Manifest::new(config, layers)).await?;

    manifest.insert("digest".to_string(), Value::from(digest));
    manifest.insert(
        "size".to_string(),
        Value::from(response.content_length.unwrap_or(0)),
    );
    Ok(manifest)
}

async fn push_platform(
    transport: &dyn RegistryTransport,
    container: &ContainerReference,
    record: &PlatformLayers,
) -> Result<Map<String, Value>> {
    debug!(platform = %record.platform, layer_count = record.layers.len(), "Pushing platform manifest");

    let diff_ids = record
        .layers
        .iter()
        .map(|layer| diff_id_prefixed(layer))
        .collect::<Result<Vec<_>>>()?;
    let config = serde_json::to_vec(&ImageConfig::for_layers(record.platform.clone(), diff_ids))?;

    let layers = upload_layers(transport, container, &record.layers).await?;
    let config_descriptor = Descriptor::for_data(IMAGE_CONFIG_MEDIA_TYPE, &config);
    transport
        .upload_blob(container, &config_descriptor, &config)
        .await?;

    let (digest, response, mut manifest) =
        upload_and_read_back(transport, container, Manifest::new(config_descriptor, layers))
            .await?;

    let size = match response.content_length {
        Some(length) => length,
        None => serde_json::to_vec(&manifest)?.len() as u64,
    };
    manifest.insert("size".to_string(), Value::from(size));
    manifest.insert("digest".to_string(), Value::from(digest));
    manifest.insert(
        "platform".to_string(),
        serde_json::to_value(&record.platform)?,
    );
    Ok(manifest)
}

/// Upload `manifest` under the tag, then fetch it back by digest.
async fn upload_and_read_back(
    transport: &dyn RegistryTransport,
    container: &ContainerReference,
    manifest: Manifest,
) -> Result<(String, UploadResponse, Map<String, Value>)> {
    let manifest = serde_json::to_value(&manifest)?;
    validate_manifest(&manifest)?;

    let response = transport
        .upload_manifest(container, &manifest, IMAGE_MANIFEST_MEDIA_TYPE)
        .await?;
    let digest = extract_digest(&response)?;
    debug!(%digest, "Uploaded manifest");

    let stored = transport
        .fetch_manifest(&container.with_digest(&digest), &[IMAGE_MANIFEST_MEDIA_TYPE])
        .await?;
    validate_manifest(&stored)?;

    let Value::Object(mut stored) = stored else {
        return Err(Error::schema_invalid("manifest", "not a JSON object"));
    };
    stored
        .entry("mediaType")
        .or_insert_with(|| Value::from(IMAGE_MANIFEST_MEDIA_TYPE));
    Ok((digest, response, stored))
}

async fn upload_layers(
    transport: &dyn RegistryTransport,
    container: &ContainerReference,
    paths: &[PathBuf],
) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::file(path, e))?;
        let descriptor = Descriptor::for_data(LAYER_MEDIA_TYPE, &data)
            .with_annotation(TITLE_ANNOTATION, layer_title(path));
        transport.upload_blob(container, &descriptor, &data).await?;
        debug!(?path, digest = %descriptor.digest, "Uploaded layer");
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

async fn upload_empty_config(
    transport: &dyn RegistryTransport,
    container: &ContainerReference,
) -> Result<Descriptor> {
    let config = empty_config();
    transport.upload_blob(container, &config, b"{}").await?;
    Ok(config)
}

fn layer_title(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}
