//! Pull and push against an in-memory registry.

use async_trait::async_trait;
use ocideploy_oci::{
    ContainerReference, Descriptor, Error, IMAGE_CONFIG_MEDIA_TYPE, IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE, LayerSet, Platform, PlatformLayers, PullOptions,
    RegistryTransport, Result, UploadResponse, build_archive, diff_id_prefixed, pull_image,
    push_image, sha256_digest,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const AMD_DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
const ARM_DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

#[derive(Default)]
struct FakeTransport {
    manifests: Mutex<HashMap<String, Value>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    manifest_uploads: Mutex<Vec<String>>,
    pulled: Mutex<Vec<ContainerReference>>,
    omit_digest_header: bool,
}

impl FakeTransport {
    fn with_manifest(self, version: &str, manifest: Value) -> Self {
        self.manifests
            .lock()
            .unwrap()
            .insert(version.to_string(), manifest);
        self
    }

    fn manifest(&self, version: &str) -> Value {
        self.manifests.lock().unwrap()[version].clone()
    }

    fn blob_json(&self, digest: &str) -> Value {
        serde_json::from_slice(&self.blobs.lock().unwrap()[digest]).unwrap()
    }

    fn pulled(&self) -> Vec<ContainerReference> {
        self.pulled.lock().unwrap().clone()
    }

    fn uploads(&self) -> Vec<String> {
        self.manifest_uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryTransport for FakeTransport {
    async fn fetch_manifest(
        &self,
        reference: &ContainerReference,
        _media_types: &[&str],
    ) -> Result<Value> {
        let version = reference.version().unwrap_or("latest");
        self.manifests
            .lock()
            .unwrap()
            .get(version)
            .cloned()
            .ok_or_else(|| Error::registry(format!("manifest unknown: {version}")))
    }

    async fn upload_manifest(
        &self,
        reference: &ContainerReference,
        manifest: &Value,
        media_type: &str,
    ) -> Result<UploadResponse> {
        let body = serde_json::to_vec(manifest)?;
        let digest = sha256_digest(&body);

        let mut manifests = self.manifests.lock().unwrap();
        manifests.insert(digest.clone(), manifest.clone());
        if let Some(tag) = &reference.tag {
            manifests.insert(tag.clone(), manifest.clone());
        }
        self.manifest_uploads
            .lock()
            .unwrap()
            .push(media_type.to_string());

        Ok(UploadResponse {
            location: Some(format!(
                "/v2/{}/manifests/{digest}",
                reference.repository
            )),
            content_digest: (!self.omit_digest_header).then(|| digest.clone()),
            content_length: Some(body.len() as u64),
        })
    }

    async fn upload_blob(
        &self,
        _reference: &ContainerReference,
        descriptor: &Descriptor,
        data: &[u8],
    ) -> Result<UploadResponse> {
        assert_eq!(descriptor.digest, sha256_digest(data));
        self.blobs
            .lock()
            .unwrap()
            .insert(descriptor.digest.clone(), data.to_vec());
        Ok(UploadResponse {
            content_digest: Some(descriptor.digest.clone()),
            ..Default::default()
        })
    }

    async fn pull(
        &self,
        reference: &ContainerReference,
        destination: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.pulled.lock().unwrap().push(reference.clone());
        std::fs::create_dir_all(destination)?;
        let path = destination.join("pulled.txt");
        std::fs::write(&path, reference.to_string())?;
        Ok(vec![path])
    }
}

fn multi_platform_index() -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": IMAGE_INDEX_MEDIA_TYPE,
        "manifests": [
            {
                "mediaType": IMAGE_MANIFEST_MEDIA_TYPE,
                "digest": AMD_DIGEST,
                "size": 500,
                "platform": {"os": "linux", "architecture": "amd64"}
            },
            {
                "mediaType": IMAGE_MANIFEST_MEDIA_TYPE,
                "digest": ARM_DIGEST,
                "size": 500,
                "platform": {"os": "linux", "architecture": "arm64"}
            }
        ]
    })
}

fn options(platform: &str, strict: bool) -> PullOptions {
    PullOptions {
        platform: Some(platform.parse().unwrap()),
        strict_platform: strict,
    }
}

fn layer(dir: &Path, name: &str, content: &str) -> PathBuf {
    let source = dir.join(format!("{name}.py"));
    std::fs::write(&source, content).unwrap();
    build_archive(
        [&source],
        &dir.join(format!("{name}.tar.gz")),
        dir,
        Some("app"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_pull_selects_platform_manifest() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_manifest("v1", multi_platform_index());

    let outcome = pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path(),
        &options("linux/amd64", false),
    )
    .await
    .unwrap();

    let pulled = transport.pulled();
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].digest.as_deref(), Some(AMD_DIGEST));
    assert_eq!(pulled[0].tag, None);
    assert_eq!(pulled[0].repository, "acme/flows");
    assert_eq!(outcome.path, temp.path());
    assert_eq!(outcome.files, vec![temp.path().join("pulled.txt")]);
}

#[tokio::test]
async fn test_pull_without_match_keeps_reference() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_manifest("v1", multi_platform_index());

    pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path(),
        &options("windows/amd64", false),
    )
    .await
    .unwrap();

    let pulled = transport.pulled();
    assert_eq!(pulled[0].tag.as_deref(), Some("v1"));
    assert_eq!(pulled[0].digest, None);
}

#[tokio::test]
async fn test_pull_strict_platform_fails_without_match() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_manifest("v1", multi_platform_index());

    let err = pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path(),
        &options("linux/s390x", true),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::NoMatchingPlatform { .. }));
    assert!(transport.pulled().is_empty());
}

#[tokio::test]
async fn test_pull_plain_manifest_is_pulled_as_is() {
    let temp = TempDir::new().unwrap();
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": IMAGE_MANIFEST_MEDIA_TYPE,
        "config": serde_json::to_value(ocideploy_oci::empty_config()).unwrap(),
        "layers": []
    });
    let transport = FakeTransport::default().with_manifest("v1", manifest);

    pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path(),
        &options("linux/amd64", true),
    )
    .await
    .unwrap();

    assert_eq!(transport.pulled()[0].tag.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_pull_missing_manifest_still_pulls() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default();

    pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path(),
        &PullOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(transport.pulled().len(), 1);
}

#[tokio::test]
async fn test_pull_invalid_reference() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default();

    let err = pull_image(&transport, "not a reference!!", temp.path(), &PullOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReference(..)));
}

#[tokio::test]
async fn test_push_multi_platform_builds_index() {
    let temp = TempDir::new().unwrap();
    let amd = layer(temp.path(), "amd", "print('amd64')");
    let arm = layer(temp.path(), "arm", "print('arm64')");
    let transport = FakeTransport::default();

    let layers = LayerSet::PerPlatform(vec![
        PlatformLayers {
            platform: Platform::new("linux", "amd64"),
            layers: vec![amd.clone()],
        },
        PlatformLayers {
            platform: Platform::new("linux", "arm64").with_variant("v8"),
            layers: vec![arm.clone()],
        },
    ]);

    let outcome = push_image(&transport, "localhost:5000/acme/flows", "v1", &layers)
        .await
        .unwrap();

    assert_eq!(outcome.name, "localhost:5000/acme/flows");
    assert_eq!(outcome.tag, "v1");
    assert_eq!(outcome.reference, "localhost:5000/acme/flows:v1");
    assert_eq!(
        transport.uploads(),
        vec![
            IMAGE_MANIFEST_MEDIA_TYPE,
            IMAGE_MANIFEST_MEDIA_TYPE,
            IMAGE_INDEX_MEDIA_TYPE
        ]
    );

    let index = transport.manifest("v1");
    assert_eq!(transport.manifest(&outcome.digest), index);
    assert_eq!(index["mediaType"], IMAGE_INDEX_MEDIA_TYPE);

    let entries = index["manifests"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert!(entry.get("layers").is_none());
        assert!(entry.get("config").is_none());
        assert!(entry.get("schemaVersion").is_none());
        assert_eq!(entry["mediaType"], IMAGE_MANIFEST_MEDIA_TYPE);
        assert!(entry["size"].as_u64().unwrap() > 0);
    }
    assert_eq!(
        entries[0]["platform"],
        json!({"os": "linux", "architecture": "amd64"})
    );
    assert_eq!(
        entries[1]["platform"],
        json!({"os": "linux", "architecture": "arm64", "variant": "v8"})
    );

    // Each platform manifest points at an image config listing its diff IDs.
    let amd_manifest = transport.manifest(entries[0]["digest"].as_str().unwrap());
    assert_eq!(amd_manifest["config"]["mediaType"], IMAGE_CONFIG_MEDIA_TYPE);
    let config = transport.blob_json(amd_manifest["config"]["digest"].as_str().unwrap());
    assert_eq!(
        config,
        json!({
            "os": "linux",
            "architecture": "amd64",
            "rootfs": {"type": "layers", "diff_ids": [diff_id_prefixed(&amd).unwrap()]}
        })
    );
    assert_eq!(
        amd_manifest["layers"][0]["annotations"]["org.opencontainers.image.title"],
        "amd.tar.gz"
    );
}

#[tokio::test]
async fn test_push_flat_builds_single_entry_index() {
    let temp = TempDir::new().unwrap();
    let code = layer(temp.path(), "code", "print('hello')");
    let transport = FakeTransport::default();

    let outcome = push_image(
        &transport,
        "localhost:5000/acme/flows",
        "v2",
        &LayerSet::Flat(vec![code]),
    )
    .await
    .unwrap();

    let index = transport.manifest("v2");
    let entries = index["manifests"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].get("platform").is_none());
    assert!(entries[0].get("layers").is_none());

    let manifest_digest = entries[0]["digest"].as_str().unwrap();
    let manifest = transport.manifest(manifest_digest);
    assert_eq!(
        entries[0]["size"].as_u64().unwrap(),
        serde_json::to_vec(&manifest).unwrap().len() as u64
    );
    assert_eq!(
        manifest["config"]["mediaType"],
        ocideploy_oci::EMPTY_MEDIA_TYPE
    );

    // The empty config blob is uploaded even though it is embedded.
    assert_eq!(
        transport.blob_json(manifest["config"]["digest"].as_str().unwrap()),
        json!({})
    );
    assert!(outcome.digest.starts_with("sha256:"));
}

#[tokio::test]
async fn test_push_uses_location_when_digest_header_missing() {
    let temp = TempDir::new().unwrap();
    let code = layer(temp.path(), "code", "print('hello')");
    let transport = FakeTransport {
        omit_digest_header: true,
        ..Default::default()
    };

    let outcome = push_image(
        &transport,
        "localhost:5000/acme/flows",
        "v3",
        &LayerSet::Flat(vec![code]),
    )
    .await
    .unwrap();

    assert_eq!(transport.manifest(&outcome.digest), transport.manifest("v3"));
}

#[tokio::test]
async fn test_push_missing_layer_file() {
    let temp = TempDir::new().unwrap();
    let transport = FakeTransport::default();

    let err = push_image(
        &transport,
        "localhost:5000/acme/flows",
        "v1",
        &LayerSet::Flat(vec![temp.path().join("missing.tar.gz")]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::File { .. }));
    assert!(transport.uploads().is_empty());
}

#[tokio::test]
async fn test_push_then_pull_selects_pushed_platform() {
    let temp = TempDir::new().unwrap();
    let amd = layer(temp.path(), "amd", "a");
    let arm = layer(temp.path(), "arm", "b");
    let transport = FakeTransport::default();

    push_image(
        &transport,
        "localhost:5000/acme/flows",
        "v1",
        &LayerSet::PerPlatform(vec![
            PlatformLayers {
                platform: Platform::new("linux", "amd64"),
                layers: vec![amd],
            },
            PlatformLayers {
                platform: Platform::new("linux", "arm64"),
                layers: vec![arm],
            },
        ]),
    )
    .await
    .unwrap();

    let arm_digest = transport.manifest("v1")["manifests"][1]["digest"]
        .as_str()
        .unwrap()
        .to_string();

    pull_image(
        &transport,
        "localhost:5000/acme/flows:v1",
        temp.path().join("out"),
        &options("linux/arm64", true),
    )
    .await
    .unwrap();

    assert_eq!(transport.pulled()[0].digest.as_deref(), Some(arm_digest.as_str()));
}
