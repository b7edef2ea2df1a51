//! Container reference parsing.
//!
//! Parsing follows the standard `[registry/]repository[:tag][@digest]`
//! grammar implemented by `oci-distribution`; unqualified names resolve to
//! `docker.io`.

use oci_distribution::Reference;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A parsed container reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerReference {
    /// Registry host, including an optional port.
    pub registry: String,
    /// Repository path within the registry.
    pub repository: String,
    /// Tag, when addressed by tag.
    pub tag: Option<String>,
    /// Content digest, when addressed by digest.
    pub digest: Option<String>,
}

impl ContainerReference {
    /// Parse an image reference string.
    pub fn parse(name: &str) -> Result<Self> {
        let reference = name
            .parse::<Reference>()
            .map_err(|e| Error::invalid_reference(name, e.to_string()))?;
        Ok(Self::from(&reference))
    }

    /// Copy of this reference addressed by `digest` instead of its tag.
    #[must_use]
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Copy of this reference addressed by `tag`.
    #[must_use]
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// The digest if present, otherwise the tag.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// Convert to the `oci-distribution` reference type.
    #[must_use]
    pub fn to_distribution(&self) -> Reference {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                digest.clone(),
            ),
            (None, Some(tag)) => {
                Reference::with_tag(self.registry.clone(), self.repository.clone(), tag.clone())
            }
            (None, None) => Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                "latest".to_string(),
            ),
        }
    }
}

impl From<&Reference> for ContainerReference {
    fn from(reference: &Reference) -> Self {
        Self {
            registry: reference.registry().to_string(),
            repository: reference.repository().to_string(),
            tag: reference.tag().map(ToString::to_string),
            digest: reference.digest().map(ToString::to_string),
        }
    }
}

impl FromStr for ContainerReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ContainerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
