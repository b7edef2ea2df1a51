//! Registry transport backed by `oci-distribution`.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciImageIndex, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use super::{RegistryTransport, UploadResponse, unpack_layer};
use crate::archive::sha256_digest;
use crate::credentials::ResolvedCredentials;
use crate::docker_config::DockerConfigAuth;
use crate::image::Descriptor;
use crate::reference::ContainerReference;
use crate::{
    Error, IMAGE_INDEX_MEDIA_TYPE, LAYER_MEDIA_TYPE, LAYER_TAR_MEDIA_TYPE, Result,
    TITLE_ANNOTATION,
};

/// Layer media types accepted on pull.
const PULL_MEDIA_TYPES: [&str; 4] = [
    LAYER_MEDIA_TYPE,
    LAYER_TAR_MEDIA_TYPE,
    "application/vnd.docker.image.rootfs.diff.tar.gzip",
    "application/octet-stream",
];

/// [`RegistryTransport`] over the `oci-distribution` client.
pub struct DistributionTransport {
    client: Client,
    auth: RwLock<RegistryAuth>,
}

impl Default for DistributionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionTransport {
    /// Create an HTTPS transport with anonymous access.
    #[must_use]
    pub fn new() -> Self {
        Self::with_protocol(ClientProtocol::Https)
    }

    /// Create a transport, using plain HTTP when `insecure` is set.
    #[must_use]
    pub fn insecure(insecure: bool) -> Self {
        if insecure {
            Self::with_protocol(ClientProtocol::Http)
        } else {
            Self::new()
        }
    }

    /// Create a transport speaking `protocol`.
    #[must_use]
    pub fn with_protocol(protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth: RwLock::new(RegistryAuth::Anonymous),
        }
    }

    /// Authenticate with resolved credentials.
    #[must_use]
    pub fn with_credentials(self, credentials: &ResolvedCredentials) -> Self {
        debug!(
            registry = credentials.registry.as_deref(),
            backend = %credentials.backend,
            "Configuring registry credentials"
        );
        Self {
            auth: RwLock::new(credentials.registry_auth()),
            ..self
        }
    }

    async fn current_auth(&self) -> RegistryAuth {
        self.auth.read().await.clone()
    }

    async fn authenticate_push(&self, reference: &Reference) -> Result<()> {
        let auth = self.current_auth().await;
        self.client
            .auth(reference, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| Error::registry(format!("authentication for {reference} failed: {e}")))?;
        Ok(())
    }
}

fn to_oci_manifest(manifest: &Value, media_type: &str) -> Result<OciManifest> {
    if media_type == IMAGE_INDEX_MEDIA_TYPE {
        let index: OciImageIndex = serde_json::from_value(manifest.clone())?;
        Ok(OciManifest::ImageIndex(index))
    } else {
        let image: OciImageManifest = serde_json::from_value(manifest.clone())?;
        Ok(OciManifest::Image(image))
    }
}

/// Digest in the last segment of a manifest URL, if it is addressed by digest.
fn digest_from_location(location: &str) -> Option<String> {
    location
        .split(['?', '#'])
        .next()?
        .rsplit('/')
        .next()
        .filter(|segment| segment.starts_with("sha256:"))
        .map(ToString::to_string)
}

#[async_trait]
impl RegistryTransport for DistributionTransport {
    async fn fetch_manifest(
        &self,
        reference: &ContainerReference,
        media_types: &[&str],
    ) -> Result<Value> {
        let target = reference.to_distribution();
        let auth = self.current_auth().await;
        trace!(%target, ?media_types, "Fetching manifest");

        let (raw, digest) = self
            .client
            .pull_manifest_raw(&target, &auth, media_types)
            .await
            .map_err(|e| Error::registry(format!("failed to fetch manifest {target}: {e}")))?;

        debug!(%target, %digest, "Fetched manifest");
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn upload_manifest(
        &self,
        reference: &ContainerReference,
        manifest: &Value,
        media_type: &str,
    ) -> Result<UploadResponse> {
        let target = reference.to_distribution();
        let oci_manifest = to_oci_manifest(manifest, media_type)?;
        // The client sends canonical JSON: sorted keys, no whitespace.
        let body = serde_json::to_vec(&serde_json::to_value(&oci_manifest)?)?;

        self.authenticate_push(&target).await?;
        let location = self
            .client
            .push_manifest(&target, &oci_manifest)
            .await
            .map_err(|e| Error::registry(format!("failed to upload manifest {target}: {e}")))?;

        let digest = digest_from_location(&location).unwrap_or_else(|| sha256_digest(&body));
        info!(%target, %location, %digest, "Uploaded manifest");
        Ok(UploadResponse {
            location: Some(location),
            content_digest: Some(digest),
            content_length: Some(body.len() as u64),
        })
    }

    async fn upload_blob(
        &self,
        reference: &ContainerReference,
        descriptor: &Descriptor,
        data: &[u8],
    ) -> Result<UploadResponse> {
        let computed = sha256_digest(data);
        if computed != descriptor.digest {
            return Err(Error::registry(format!(
                "blob digest mismatch: descriptor says {}, content is {computed}",
                descriptor.digest
            )));
        }

        let target = reference.to_distribution();
        self.authenticate_push(&target).await?;
        let location = self
            .client
            .push_blob(&target, data, &descriptor.digest)
            .await
            .map_err(|e| {
                Error::registry(format!("failed to upload blob {}: {e}", descriptor.digest))
            })?;

        debug!(digest = %descriptor.digest, size = data.len(), "Uploaded blob");
        Ok(UploadResponse {
            location: Some(location),
            content_digest: Some(descriptor.digest.clone()),
            content_length: Some(data.len() as u64),
        })
    }

    async fn pull(
        &self,
        reference: &ContainerReference,
        destination: &Path,
    ) -> Result<Vec<PathBuf>> {
        let target = reference.to_distribution();
        let auth = self.current_auth().await;
        info!(%target, ?destination, "Pulling artifact");

        let image = self
            .client
            .pull(&target, &auth, PULL_MEDIA_TYPES.to_vec())
            .await
            .map_err(|e| Error::registry(format!("failed to pull {target}: {e}")))?;

        let mut files = Vec::new();
        for layer in &image.layers {
            let title = layer
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(TITLE_ANNOTATION))
                .cloned()
                .unwrap_or_else(|| sha256_digest(&layer.data).replace(':', "-"));
            files.extend(unpack_layer(
                &layer.data,
                &layer.media_type,
                &title,
                destination,
            )?);
        }

        debug!(%target, file_count = files.len(), "Pulled artifact");
        Ok(files)
    }

    async fn load_auth_config(&self, reference: &ContainerReference) -> Result<()> {
        if !matches!(*self.auth.read().await, RegistryAuth::Anonymous) {
            return Ok(());
        }

        let config = match DockerConfigAuth::load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable docker config");
                return Ok(());
            }
        };

        if let Some(auth) = config.registry_auth(&reference.registry) {
            *self.auth.write().await = auth;
        }
        Ok(())
    }
}
