//! Platform parsing, matching and host detection.
//!
//! Platforms use the OCI vocabulary (`os/architecture[/variant]`, e.g.
//! "linux/amd64", "linux/arm/v7"), the same form accepted by
//! `docker buildx build --platform`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A concrete OCI platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system (linux, windows).
    pub os: String,
    /// CPU architecture (amd64, arm64, arm).
    pub architecture: String,
    /// CPU variant (v7, v8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// A partial platform used to select manifests.
///
/// Absent fields act as wildcards. Index entries without a `platform`
/// object deserialize to the default filter, which matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFilter {
    /// Required operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Required architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Required variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Create a new platform without a variant.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Set the CPU variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Parse an `os[/arch[/variant]]` string.
    ///
    /// A bare `os` leaves `architecture` empty.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        if s.is_empty() || segments.len() > 3 || segments.iter().any(|seg| seg.is_empty()) {
            return Err(Error::InvalidPlatformString(s.to_string()));
        }

        Ok(Self {
            os: segments[0].to_string(),
            architecture: segments.get(1).map(ToString::to_string).unwrap_or_default(),
            variant: segments.get(2).map(ToString::to_string),
        })
    }

    /// Detect the platform containers run on for this host.
    pub fn detect_host() -> Result<Self> {
        Self::detect_from(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map native OS and machine identifiers to an OCI platform.
    ///
    /// macOS maps to `linux` since container runtimes there execute Linux
    /// containers inside a VM.
    pub fn detect_from(os: &str, arch: &str) -> Result<Self> {
        let os_name = os.to_lowercase();
        let machine = arch.to_lowercase();

        let os = [
            ("linux", "linux"),
            ("darwin", "linux"),
            ("macos", "linux"),
            ("windows", "windows"),
        ]
        .into_iter()
        .find_map(|(prefix, oci)| os_name.starts_with(prefix).then_some(oci))
        .ok_or_else(|| Error::UnsupportedPlatform(format!("unsupported OS: {os_name}")))?;

        let architecture = match machine.as_str() {
            "x86_64" | "amd64" => "amd64",
            "aarch64" | "arm64" => "arm64",
            other if other.starts_with("arm") => "arm",
            other => {
                return Err(Error::UnsupportedPlatform(format!(
                    "unsupported architecture: {other}"
                )));
            }
        };

        Ok(Self::new(os, architecture))
    }

    /// Check whether every field present in `filter` equals this platform's.
    #[must_use]
    pub fn matches(&self, filter: &PlatformFilter) -> bool {
        filter.os.as_ref().is_none_or(|os| *os == self.os)
            && filter
                .architecture
                .as_ref()
                .is_none_or(|arch| *arch == self.architecture)
            && filter
                .variant
                .as_ref()
                .is_none_or(|variant| self.variant.as_ref() == Some(variant))
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.os)?;
        if !self.architecture.is_empty() {
            write!(f, "/{}", self.architecture)?;
        }
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl From<&Platform> for PlatformFilter {
    fn from(platform: &Platform) -> Self {
        Self {
            os: Some(platform.os.clone()),
            architecture: (!platform.architecture.is_empty())
                .then(|| platform.architecture.clone()),
            variant: platform.variant.clone(),
        }
    }
}
