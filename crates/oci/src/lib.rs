//! OCI artifact distribution for ocideploy.
//!
//! This crate provides functionality to:
//! - Build byte-reproducible layer archives and compute their diff IDs
//! - Assemble OCI image manifests and image indexes
//! - Resolve static or cloud-IAM registry credentials
//! - Pull multi-platform images, selecting the manifest matching the host
//! - Push single-platform or multi-platform images behind an image index
//!
//! # Example
//!
//! ```ignore
//! use ocideploy_oci::{DistributionTransport, LayerSet, PullOptions, pull_image, push_image};
//!
//! let transport = DistributionTransport::new();
//!
//! let layers = LayerSet::Flat(vec!["code.tar.gz".into()]);
//! let pushed = push_image(&transport, "ghcr.io/acme/flows", "v1", &layers).await?;
//!
//! let pulled = pull_image(&transport, "ghcr.io/acme/flows:v1", "./out", &PullOptions::default()).await?;
//! ```

#![warn(missing_docs)]

mod archive;
pub mod credentials;
mod docker_config;
mod error;
mod image;
mod platform;
mod pull;
mod push;
mod reference;
pub mod schema;
pub mod transport;

pub use archive::{
    build_archive, collect_files, diff_id, diff_id_prefixed, file_digest, sha256_digest,
};
pub use credentials::{
    AuthBackend, CloudIamCredentials, Credentials, ResolvedCredentials, TokenExchange,
    UnavailableTokenExchange, resolve_credentials,
};
pub use docker_config::DockerConfigAuth;
pub use error::{Error, Result};
pub use image::{
    Descriptor, ImageConfig, ImageIndex, Manifest, RootFs, build_image_index, empty_config,
};
pub use platform::{Platform, PlatformFilter};
pub use pull::{PullOptions, PullOutcome, pull_image, select_platform_manifest};
pub use push::{LayerSet, PlatformLayers, PushOutcome, extract_digest, push_image};
pub use reference::ContainerReference;
pub use transport::{DistributionTransport, RegistryTransport, UploadResponse};

/// Media type for OCI image layers (gzip compressed tar).
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Media type for uncompressed OCI image layers.
pub const LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

/// Media type for OCI image manifests.
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type for OCI image indexes.
pub const IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Media type for OCI image configs.
pub const IMAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Media type for the empty `{}` descriptor.
pub const EMPTY_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

/// Annotation carrying the file name of a layer.
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
