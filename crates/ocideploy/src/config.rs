//! Configuration file and settings resolution.
//!
//! Settings come from, in order of precedence: command-line flags,
//! environment variables (through clap), the TOML configuration file,
//! and built-in defaults.
//!
//! ```toml
//! registry = "123456789012.dkr.ecr.us-east-1.amazonaws.com"
//! insecure = false
//! strict_platform = false
//!
//! [credentials]
//! profile_name = "prod"
//! region_name = "us-east-1"
//! ```

use ocideploy_oci::Credentials;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::cli::CliError;

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Registry host cloud credentials authenticate against when the image
    /// name does not settle it.
    #[serde(default)]
    pub registry: Option<String>,
    /// Use plain HTTP.
    #[serde(default)]
    pub insecure: Option<bool>,
    /// Fail pulls when no manifest matches the platform.
    #[serde(default)]
    pub strict_platform: Option<bool>,
    /// Registry credentials.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl FileConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CliError::config_with_help(
                format!("Failed to read config file {}: {e}", path.display()),
                "Check the path passed with --config or OCIDEPLOY_CONFIG",
            )
        })?;
        let config = Self::parse(&contents)
            .map_err(|e| CliError::config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse configuration file contents.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

/// Read a JSON credentials file.
pub fn load_credentials(path: &Path) -> Result<Credentials, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::config(format!(
            "Failed to read credentials file {}: {e}",
            path.display()
        ))
    })?;
    let value: serde_json::Value = serde_json::from_str(&contents).map_err(|e| {
        CliError::config(format!(
            "Credentials file {} is not valid JSON: {e}",
            path.display()
        ))
    })?;
    Ok(Credentials::from_json(&value)?)
}

/// Effective settings for a command.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Fallback registry host for credentials.
    pub registry: Option<String>,
    /// Use plain HTTP.
    pub insecure: bool,
    /// Fail pulls when no manifest matches the platform.
    pub strict_platform: bool,
    /// Registry credentials.
    pub credentials: Credentials,
}

impl Settings {
    /// Merge the configuration file with command-line values.
    ///
    /// A credentials file given on the command line replaces the
    /// `[credentials]` table. Boolean flags can only switch options on.
    pub fn resolve(
        config_path: Option<&Path>,
        credentials_path: Option<&Path>,
        insecure: bool,
        strict_platform: bool,
    ) -> Result<Self, CliError> {
        let file = match config_path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let credentials = match credentials_path {
            Some(path) => load_credentials(path)?,
            None => file.credentials.unwrap_or_default(),
        };

        Ok(Self {
            registry: file.registry,
            insecure: insecure || file.insecure.unwrap_or(false),
            strict_platform: strict_platform || file.strict_platform.unwrap_or(false),
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
registry = "123456789012.dkr.ecr.us-east-1.amazonaws.com"
strict_platform = true

[credentials]
profile_name = "prod"
region_name = "us-east-1"
"#;

    #[test]
    fn test_parse_config() {
        let config = FileConfig::parse(CONFIG).unwrap();
        assert_eq!(
            config.registry.as_deref(),
            Some("123456789012.dkr.ecr.us-east-1.amazonaws.com")
        );
        assert_eq!(config.strict_platform, Some(true));
        assert_eq!(config.insecure, None);
        assert!(matches!(config.credentials, Some(Credentials::CloudIam(_))));
    }

    #[test]
    fn test_parse_config_static_credentials() {
        let config = FileConfig::parse(
            r#"
[credentials]
username = "robot"
password = "pat"
registry_url = "ghcr.io"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.credentials,
            Some(Credentials::Static { ref username, .. }) if username == "robot"
        ));
    }

    #[test]
    fn test_parse_config_rejects_unknown_credentials() {
        assert!(FileConfig::parse("[credentials]\ntoken = \"abc\"\n").is_err());
        assert!(FileConfig::parse("registy = \"typo\"\n").is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = Settings::resolve(None, None, false, false).unwrap();
        assert!(!settings.insecure);
        assert!(!settings.strict_platform);
        assert!(settings.credentials.is_none());
        assert_eq!(settings.registry, None);
    }

    #[test]
    fn test_resolve_merges_file_and_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ocideploy.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let settings = Settings::resolve(Some(&path), None, true, false).unwrap();
        assert!(settings.insecure);
        assert!(settings.strict_platform);
        assert!(matches!(settings.credentials, Credentials::CloudIam(_)));
    }

    #[test]
    fn test_resolve_credentials_file_overrides_table() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("ocideploy.toml");
        std::fs::write(&config, CONFIG).unwrap();
        let credentials = dir.path().join("credentials.json");
        std::fs::write(&credentials, r#"{"username": "u", "password": {"value": "p"}}"#).unwrap();

        let settings = Settings::resolve(Some(&config), Some(&credentials), false, false).unwrap();
        assert!(matches!(settings.credentials, Credentials::Static { .. }));
    }

    #[test]
    fn test_resolve_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = Settings::resolve(Some(&dir.path().join("nope.toml")), None, false, false)
            .unwrap_err();
        assert!(matches!(err, CliError::Config { help: Some(_), .. }));
    }

    #[test]
    fn test_load_credentials_rejects_unknown_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"token": "abc"}"#).unwrap();
        assert!(matches!(
            load_credentials(&path),
            Err(CliError::Config { .. })
        ));
    }
}
