//! Registry credential resolution.
//!
//! Credentials arrive either as a static username/password pair or as
//! cloud IAM parameters that must be exchanged for a short-lived registry
//! token. [`Credentials::from_json`] classifies the raw input once;
//! [`resolve_credentials`] turns the classified value into the
//! `(username, password, registry, backend)` tuple the transport consumes.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oci_distribution::secrets::RegistryAuth;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

use crate::{Error, Result};

/// Keys whose presence marks a credential payload as cloud IAM.
const CLOUD_IAM_KEYS: [&str; 4] = [
    "aws_access_key_id",
    "profile_name",
    "region_name",
    "assume_role_arn",
];

/// Registry credentials, classified at the boundary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum Credentials {
    /// Anonymous access.
    #[default]
    None,
    /// Username and password (or personal access token).
    Static {
        /// Registry username.
        username: String,
        /// Registry password.
        password: SecretString,
        /// Registry host the credentials belong to.
        registry_url: Option<String>,
    },
    /// Cloud IAM parameters exchanged for a registry token.
    CloudIam(CloudIamCredentials),
}

/// AWS parameters used to obtain an ECR authorization token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudIamCredentials {
    /// Static access key id.
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    /// Static secret access key.
    #[serde(default)]
    pub aws_secret_access_key: Option<SecretString>,
    /// Session token for temporary credentials.
    #[serde(default)]
    pub aws_session_token: Option<SecretString>,
    /// Named profile from the shared config files.
    #[serde(default)]
    pub profile_name: Option<String>,
    /// AWS region.
    #[serde(default)]
    pub region_name: Option<String>,
    /// Role to assume before requesting the token.
    #[serde(default)]
    pub assume_role_arn: Option<String>,
}

impl Credentials {
    /// Classify a raw credential document.
    ///
    /// Cloud IAM keys take precedence over `username`/`password`. A
    /// password may be a plain string or a secret wrapper object holding a
    /// `value` or `secret` field. `null` means anonymous access.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::None),
            Value::Object(map) => map,
            other => {
                return Err(Error::UnsupportedCredentialFormat(format!(
                    "expected an object, got {}",
                    json_kind(other)
                )));
            }
        };

        if CLOUD_IAM_KEYS
            .iter()
            .any(|key| map.get(*key).is_some_and(|v| !v.is_null()))
        {
            let cloud: CloudIamCredentials = serde_json::from_value(value.clone())
                .map_err(|e| Error::UnsupportedCredentialFormat(e.to_string()))?;
            return Ok(Self::CloudIam(cloud));
        }

        let username = map.get("username").and_then(Value::as_str);
        let password = map.get("password").and_then(unwrap_secret);
        if let (Some(username), Some(password)) = (username, password) {
            let registry_url = map
                .get("registry_url")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            return Ok(Self::Static {
                username: username.to_string(),
                password: SecretString::from(password.to_string()),
                registry_url,
            });
        }

        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Err(Error::UnsupportedCredentialFormat(format!(
            "keys [{}]",
            keys.join(", ")
        )))
    }

    /// Whether no credentials were given.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl TryFrom<Value> for Credentials {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(&value)
    }
}

fn unwrap_secret(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("secret"))
            .and_then(Value::as_str),
        _ => None,
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// How the transport should authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthBackend {
    /// Bearer token negotiated with the registry.
    Token,
    /// HTTP basic authentication.
    Basic,
}

impl fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Basic => write!(f, "basic"),
        }
    }
}

/// Credentials ready for the transport.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    /// Username, if any.
    pub username: Option<String>,
    /// Password or token, if any.
    pub password: Option<SecretString>,
    /// Registry host to authenticate against.
    pub registry: Option<String>,
    /// Authentication scheme.
    pub backend: AuthBackend,
}

impl ResolvedCredentials {
    /// Anonymous access.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
            registry: None,
            backend: AuthBackend::Token,
        }
    }

    /// Map to the `oci-distribution` auth value.
    ///
    /// Basic auth is used when both username and password are present.
    #[must_use]
    pub fn registry_auth(&self) -> RegistryAuth {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                RegistryAuth::Basic(username.clone(), password.expose_secret().to_string())
            }
            _ => RegistryAuth::Anonymous,
        }
    }
}

/// Exchanges cloud IAM parameters for registry credentials.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Return the registry `(username, password)` for `credentials`.
    async fn exchange(&self, credentials: &CloudIamCredentials)
    -> Result<(String, SecretString)>;
}

/// Token exchange used when no cloud provider is linked in.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTokenExchange;

#[async_trait]
impl TokenExchange for UnavailableTokenExchange {
    async fn exchange(
        &self,
        _credentials: &CloudIamCredentials,
    ) -> Result<(String, SecretString)> {
        Err(Error::Configuration(
            "cloud IAM credentials given but no token exchange is available".to_string(),
        ))
    }
}

/// Decode a base64 `user:password` authorization token.
pub fn decode_authorization_token(token: &str) -> Result<(String, SecretString)> {
    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|e| Error::token_exchange_with_source("authorization token is not base64", e))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| Error::token_exchange_with_source("authorization token is not UTF-8", e))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| Error::token_exchange("authorization token has no ':' separator"))?;

    Ok((username.to_string(), SecretString::from(password.to_string())))
}

/// Resolve `credentials` into transport credentials.
///
/// Cloud IAM credentials always use basic auth against `fallback_registry`.
/// Static credentials use token auth against their own `registry_url`,
/// falling back to `fallback_registry`.
pub async fn resolve_credentials(
    credentials: &Credentials,
    fallback_registry: &str,
    exchange: &dyn TokenExchange,
) -> Result<ResolvedCredentials> {
    match credentials {
        Credentials::None => {
            debug!("No credentials given, using anonymous access");
            Ok(ResolvedCredentials::anonymous())
        }
        Credentials::CloudIam(cloud) => {
            info!(
                registry = fallback_registry,
                profile = cloud.profile_name.as_deref(),
                region = cloud.region_name.as_deref(),
                "Exchanging cloud credentials for registry token"
            );
            let (username, password) = exchange.exchange(cloud).await?;
            Ok(ResolvedCredentials {
                username: Some(username),
                password: Some(password),
                registry: Some(fallback_registry.to_string()),
                backend: AuthBackend::Basic,
            })
        }
        Credentials::Static {
            username,
            password,
            registry_url,
        } => {
            let registry = registry_url
                .clone()
                .unwrap_or_else(|| fallback_registry.to_string());
            debug!(%registry, %username, "Using static registry credentials");
            Ok(ResolvedCredentials {
                username: Some(username.clone()),
                password: Some(password.clone()),
                registry: Some(registry),
                backend: AuthBackend::Token,
            })
        }
    }
}
