//! Error types for OCI distribution operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for OCI distribution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during OCI operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Platform string does not match `os[/arch[/variant]]`.
    #[error("Invalid platform string: '{0}'")]
    InvalidPlatformString(String),

    /// Host OS or architecture has no OCI equivalent.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Failed to parse image reference.
    #[error("Invalid image reference '{0}': {1}")]
    InvalidReference(String, String),

    /// Credential payload matches neither the cloud-IAM nor the static shape.
    #[error(
        "Unsupported credentials format: {0}. Expected cloud IAM fields \
         (aws_access_key_id/profile_name/region_name/assume_role_arn) \
         or registry fields (username/password)"
    )]
    UnsupportedCredentialFormat(String),

    /// Exchanging cloud credentials for a registry token failed.
    #[error("Failed to retrieve registry auth token: {message}")]
    TokenExchange {
        /// Error message.
        message: String,
        /// Underlying provider error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Manifest or image index failed JSON schema validation.
    #[error("{kind} failed schema validation: {message}")]
    ManifestSchemaInvalid {
        /// What was validated ("manifest" or "image index").
        kind: &'static str,
        /// Joined validation messages.
        message: String,
    },

    /// Upload response carried neither a digest header nor a location.
    #[error("Manifest digest not found in upload response")]
    DigestNotFound,

    /// No entry of an image index matches the requested platform.
    #[error("No manifest in image index '{reference}' matches platform '{platform}'")]
    NoMatchingPlatform {
        /// The image reference.
        reference: String,
        /// The requested platform.
        platform: String,
    },

    /// Layer input could not be interpreted.
    #[error("Invalid layer set: {0}")]
    InvalidLayerSet(String),

    /// Registry transport error.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error on a specific path.
    #[error("IO error on '{}': {source}", path.display())]
    File {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid reference error.
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference(reference.into(), message.into())
    }

    /// Create a token exchange error without an underlying cause.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
            source: None,
        }
    }

    /// Create a token exchange error wrapping the provider error.
    #[must_use]
    pub fn token_exchange_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TokenExchange {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a schema validation error.
    #[must_use]
    pub fn schema_invalid(kind: &'static str, message: impl Into<String>) -> Self {
        Self::ManifestSchemaInvalid {
            kind,
            message: message.into(),
        }
    }

    /// Create a no matching platform error.
    #[must_use]
    pub fn no_matching_platform(reference: impl Into<String>, platform: impl Into<String>) -> Self {
        Self::NoMatchingPlatform {
            reference: reference.into(),
            platform: platform.into(),
        }
    }

    /// Create a registry error.
    #[must_use]
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry(message.into())
    }

    /// Create an IO error that records the offending path.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}
