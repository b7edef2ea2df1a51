//! Registry transport abstraction.
//!
//! The pull and push orchestrators only talk to a registry through
//! [`RegistryTransport`]. [`DistributionTransport`] implements it on top of
//! `oci-distribution`; tests substitute an in-memory implementation.

mod distribution;
mod unpack;

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::image::Descriptor;
use crate::reference::ContainerReference;

pub use distribution::DistributionTransport;
pub use unpack::unpack_layer;

/// What a registry reported for an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResponse {
    /// The `Location` header.
    pub location: Option<String>,
    /// The `Docker-Content-Digest` header.
    pub content_digest: Option<String>,
    /// The `Content-Length` header.
    pub content_length: Option<u64>,
}

/// Operations the orchestrators need from a registry.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch a manifest or image index, accepting `media_types`.
    async fn fetch_manifest(
        &self,
        reference: &ContainerReference,
        media_types: &[&str],
    ) -> Result<Value>;

    /// Upload a manifest or image index under the reference's tag or digest.
    async fn upload_manifest(
        &self,
        reference: &ContainerReference,
        manifest: &Value,
        media_type: &str,
    ) -> Result<UploadResponse>;

    /// Upload a blob to the reference's repository.
    async fn upload_blob(
        &self,
        reference: &ContainerReference,
        descriptor: &Descriptor,
        data: &[u8],
    ) -> Result<UploadResponse>;

    /// Download the artifact at `reference` into `destination`.
    ///
    /// Returns the paths of the files written.
    async fn pull(
        &self,
        reference: &ContainerReference,
        destination: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Load stored registry credentials for `reference`.
    async fn load_auth_config(&self, _reference: &ContainerReference) -> Result<()> {
        Ok(())
    }
}
