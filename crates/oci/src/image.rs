//! OCI manifest, image index and image config documents.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::archive::sha256_digest;
use crate::platform::Platform;
use crate::{EMPTY_MEDIA_TYPE, IMAGE_INDEX_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE};

/// Keys an image index entry must not carry.
const INDEX_EXCLUDED_KEYS: [&str; 3] = ["schemaVersion", "layers", "config"];

/// A reference to content-addressed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the referenced content (`sha256:<hex>`).
    pub digest: String,
    /// Size of the referenced content in bytes.
    pub size: u64,
    /// Platform, for index entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Arbitrary annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Base64 embedded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Descriptor {
    /// Create a descriptor for `data` with the given media type.
    #[must_use]
    pub fn for_data(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(data),
            size: data.len() as u64,
            platform: None,
            annotations: None,
            data: None,
        }
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Whether both descriptors address the same content.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

/// An OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always 2.
    pub schema_version: u32,
    /// Manifest media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Image config descriptor.
    pub config: Descriptor,
    /// Layer descriptors, base layer first.
    pub layers: Vec<Descriptor>,
    /// Arbitrary annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Create an image manifest for `config` and `layers`.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations: BTreeMap::new(),
        }
    }
}

/// An OCI image index.
///
/// Entries are kept as JSON objects so fields the registry returned for a
/// manifest (annotations, artifact type, ...) carry over into the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Always 2.
    pub schema_version: u32,
    /// Always the image index media type.
    pub media_type: String,
    /// Child manifest descriptors, in push order.
    pub manifests: Vec<Map<String, Value>>,
    /// Arbitrary annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: IMAGE_INDEX_MEDIA_TYPE.to_string(),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Image config pushed as the config blob of a platform manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Target platform fields (`os`, `architecture`, `variant`).
    #[serde(flatten)]
    pub platform: Platform,
    /// Layer diff IDs.
    pub rootfs: RootFs,
}

/// The `rootfs` section of an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Always "layers".
    #[serde(rename = "type")]
    pub fs_type: String,
    /// `sha256:<hex>` of each uncompressed layer, in layer order.
    pub diff_ids: Vec<String>,
}

impl ImageConfig {
    /// Config for `platform` whose layers have the given diff IDs.
    #[must_use]
    pub fn for_layers(platform: Platform, diff_ids: Vec<String>) -> Self {
        Self {
            platform,
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids,
            },
        }
    }
}

/// Build an image index listing `manifests` in order.
///
/// Every key except `schemaVersion`, `layers` and `config` is copied into
/// the entry. Entries are not deduplicated.
#[must_use]
pub fn build_image_index(manifests: &[Map<String, Value>]) -> ImageIndex {
    let mut index = ImageIndex::default();

    for manifest in manifests {
        let entry = manifest
            .iter()
            .filter(|(key, _)| !INDEX_EXCLUDED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        index.manifests.push(entry);
    }

    index
}

/// Descriptor for the empty `{}` config, with the content embedded.
///
/// Embedding spares the registry round trip for the config blob where the
/// registry supports descriptor `data`.
#[must_use]
pub fn empty_config() -> Descriptor {
    let mut descriptor = Descriptor::for_data(EMPTY_MEDIA_TYPE, b"{}");
    descriptor.data = Some(STANDARD.encode(b"{}"));
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn platform_manifest(digest: &str, arch: &str) -> Map<String, Value> {
        object(json!({
            "schemaVersion": 2,
            "mediaType": IMAGE_MANIFEST_MEDIA_TYPE,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:c", "size": 10},
            "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:l", "size": 20}],
            "digest": digest,
            "size": 321,
            "platform": {"os": "linux", "architecture": arch},
        }))
    }

    #[test]
    fn test_build_image_index_strips_manifest_fields() {
        let index = build_image_index(&[
            platform_manifest("sha256:a", "amd64"),
            platform_manifest("sha256:b", "arm64"),
        ]);

        assert_eq!(index.schema_version, 2);
        assert_eq!(index.media_type, IMAGE_INDEX_MEDIA_TYPE);
        assert_eq!(index.manifests.len(), 2);
        for entry in &index.manifests {
            assert!(!entry.contains_key("layers"));
            assert!(!entry.contains_key("config"));
            assert!(!entry.contains_key("schemaVersion"));
            assert!(entry.contains_key("platform"));
            assert_eq!(entry["mediaType"], IMAGE_MANIFEST_MEDIA_TYPE);
        }
    }

    #[test]
    fn test_build_image_index_preserves_order_and_duplicates() {
        let index = build_image_index(&[
            platform_manifest("sha256:b", "arm64"),
            platform_manifest("sha256:a", "amd64"),
            platform_manifest("sha256:a", "amd64"),
        ]);

        let digests: Vec<&str> = index
            .manifests
            .iter()
            .map(|entry| entry["digest"].as_str().unwrap())
            .collect();
        assert_eq!(digests, vec!["sha256:b", "sha256:a", "sha256:a"]);
    }

    #[test]
    fn test_build_image_index_empty() {
        let index = build_image_index(&[]);
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(
            json,
            json!({
                "schemaVersion": 2,
                "mediaType": IMAGE_INDEX_MEDIA_TYPE,
                "manifests": [],
                "annotations": {},
            })
        );
    }

    #[test]
    fn test_empty_config() {
        let config = empty_config();
        assert_eq!(config.media_type, EMPTY_MEDIA_TYPE);
        assert_eq!(
            config.digest,
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_eq!(config.size, 2);
        assert_eq!(config.data.as_deref(), Some("e30="));
    }

    #[test]
    fn test_image_config_serialization() {
        let config = ImageConfig::for_layers(
            Platform::new("linux", "arm64").with_variant("v8"),
            vec!["sha256:aaa".to_string(), "sha256:bbb".to_string()],
        );
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({
                "os": "linux",
                "architecture": "arm64",
                "variant": "v8",
                "rootfs": {"type": "layers", "diff_ids": ["sha256:aaa", "sha256:bbb"]},
            })
        );
    }

    #[test]
    fn test_descriptor_same_content() {
        let a = Descriptor::for_data("application/octet-stream", b"abc");
        let b = a.clone().with_annotation("org.opencontainers.image.title", "abc.txt");
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_manifest_serialization_is_camel_case() {
        let manifest = Manifest::new(empty_config(), vec![]);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], IMAGE_MANIFEST_MEDIA_TYPE);
        assert_eq!(json["config"]["mediaType"], EMPTY_MEDIA_TYPE);
        assert!(json.get("annotations").is_none());
    }
}
