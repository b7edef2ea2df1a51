//! Registry credentials stored by `docker login`.
//!
//! Reads the `auths` section of `$DOCKER_CONFIG/config.json`, or
//! `~/.docker/config.json` when `DOCKER_CONFIG` is unset. Credential helpers
//! (`credsStore`, `credHelpers`) are not consulted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Hosts docker.io credentials may be stored under.
const DOCKER_HUB_ALIASES: [&str; 3] = [
    "https://index.docker.io/v1/",
    "index.docker.io",
    "registry-1.docker.io",
];

/// The `auths` section of a docker config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfigAuth {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthEntry {
    /// Base64 `username:password`.
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl DockerConfigAuth {
    /// Load from the default location. A missing file yields no credentials.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields no credentials.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            trace!(path = %path.display(), "No docker config file");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "failed to parse docker config '{}': {e}",
                path.display()
            ))
        })
    }

    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Look up `(username, password)` for a registry host.
    ///
    /// Tries the bare host, then the `https://` form, then the Docker Hub
    /// aliases when `registry` is `docker.io`.
    #[must_use]
    pub fn credentials_for(&self, registry: &str) -> Option<(String, String)> {
        let mut candidates = vec![registry.to_string(), format!("https://{registry}")];
        if registry == "docker.io" || DOCKER_HUB_ALIASES.contains(&registry) {
            candidates.extend(DOCKER_HUB_ALIASES.iter().map(ToString::to_string));
        }

        candidates
            .iter()
            .filter_map(|key| self.auths.get(key))
            .find_map(AuthEntry::credentials)
    }

    /// Auth for `registry`, or `None` when nothing is stored for it.
    #[must_use]
    pub fn registry_auth(&self, registry: &str) -> Option<RegistryAuth> {
        let (username, password) = self.credentials_for(registry)?;
        debug!(%registry, %username, "Using credentials from docker config");
        Some(RegistryAuth::Basic(username, password))
    }

    /// Registry hosts with stored credentials.
    #[must_use]
    pub fn registries(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.auths.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }
}

impl AuthEntry {
    fn credentials(&self) -> Option<(String, String)> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some((username.clone(), password.clone()));
        }
        self.auth.as_deref().and_then(decode_auth)
    }
}

fn decode_auth(auth: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(auth).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
