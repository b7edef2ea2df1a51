//! ECR authorization token exchange.
//!
//! The SDK configuration is assembled from the credential fields:
//! - `region_name` pins the region
//! - `profile_name` selects a shared config profile
//! - `aws_access_key_id`/`aws_secret_access_key` (and an optional session
//!   token) replace the default credential chain
//! - `assume_role_arn` wraps the result in an STS assume-role provider
//!
//! Unset fields fall back to the default chain (environment, shared
//! config files, instance metadata).

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecr::Client;
use aws_sdk_ecr::config::Credentials as AwsCredentials;
use aws_sdk_ecr::error::DisplayErrorContext;
use ocideploy_oci::credentials::decode_authorization_token;
use ocideploy_oci::{CloudIamCredentials, Error, Result, TokenExchange};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

/// Provider name attached to static credentials.
const PROVIDER_NAME: &str = "ocideploy";

/// Default STS session name when assuming a role.
const DEFAULT_SESSION_NAME: &str = "ocideploy";

/// Exchanges AWS credentials for an ECR `AWS:<token>` login.
#[derive(Debug, Clone)]
pub struct EcrTokenExchange {
    session_name: String,
}

impl Default for EcrTokenExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl EcrTokenExchange {
    /// Create an exchange using the default session name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }

    /// Set the STS session name used when assuming a role.
    #[must_use]
    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    /// Load the SDK configuration described by `credentials`.
    async fn sdk_config(&self, credentials: &CloudIamCredentials) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &credentials.region_name {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &credentials.profile_name {
            loader = loader.profile_name(profile);
        }
        if let Some(static_credentials) = static_credentials(credentials) {
            loader = loader.credentials_provider(static_credentials);
        }

        loader.load().await
    }

    /// Build the ECR client, assuming the configured role if any.
    async fn client(&self, credentials: &CloudIamCredentials) -> Client {
        let config = self.sdk_config(credentials).await;

        let Some(role_arn) = &credentials.assume_role_arn else {
            return Client::new(&config);
        };

        debug!(%role_arn, session = %self.session_name, "Assuming role for ECR access");
        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(&self.session_name)
            .configure(&config)
            .build()
            .await;

        let ecr_config = aws_sdk_ecr::config::Builder::from(&config)
            .credentials_provider(provider)
            .build();
        Client::from_conf(ecr_config)
    }
}

fn static_credentials(credentials: &CloudIamCredentials) -> Option<AwsCredentials> {
    let access_key_id = credentials.aws_access_key_id.as_ref()?;
    let secret_access_key = credentials.aws_secret_access_key.as_ref()?;

    Some(AwsCredentials::new(
        access_key_id,
        secret_access_key.expose_secret(),
        credentials
            .aws_session_token
            .as_ref()
            .map(|token| token.expose_secret().to_string()),
        None,
        PROVIDER_NAME,
    ))
}

#[async_trait]
impl TokenExchange for EcrTokenExchange {
    async fn exchange(
        &self,
        credentials: &CloudIamCredentials,
    ) -> Result<(String, SecretString)> {
        let client = self.client(credentials).await;

        let output = client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| {
                let message = format!("ECR GetAuthorizationToken failed: {}", DisplayErrorContext(&e));
                Error::token_exchange_with_source(message, e)
            })?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| Error::token_exchange("ECR returned no authorization data"))?;
        let token = data
            .authorization_token()
            .ok_or_else(|| Error::token_exchange("ECR authorization data has no token"))?;

        info!(
            endpoint = data.proxy_endpoint().unwrap_or("unknown"),
            "Obtained ECR authorization token"
        );
        decode_authorization_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(
        key: Option<&str>,
        secret: Option<&str>,
        token: Option<&str>,
    ) -> CloudIamCredentials {
        CloudIamCredentials {
            aws_access_key_id: key.map(String::from),
            aws_secret_access_key: secret.map(|s| SecretString::from(s.to_string())),
            aws_session_token: token.map(|s| SecretString::from(s.to_string())),
            region_name: Some("eu-west-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_static_credentials_require_key_pair() {
        assert!(static_credentials(&cloud(Some("AKIA"), None, None)).is_none());
        assert!(static_credentials(&cloud(None, Some("secret"), None)).is_none());

        let creds = static_credentials(&cloud(Some("AKIA"), Some("secret"), Some("session")))
            .unwrap();
        assert_eq!(creds.access_key_id(), "AKIA");
        assert_eq!(creds.secret_access_key(), "secret");
        assert_eq!(creds.session_token(), Some("session"));
    }

    #[test]
    fn test_sdk_config_uses_region() {
        let exchange = EcrTokenExchange::new();
        let config = tokio_test::block_on(
            exchange.sdk_config(&cloud(Some("AKIA"), Some("secret"), None)),
        );
        assert_eq!(
            config.region().map(ToString::to_string).as_deref(),
            Some("eu-west-1")
        );
        assert!(config.credentials_provider().is_some());
    }

    #[test]
    fn test_session_name() {
        let exchange = EcrTokenExchange::default().with_session_name("deploy-42");
        assert_eq!(exchange.session_name, "deploy-42");
        assert_eq!(EcrTokenExchange::new().session_name, DEFAULT_SESSION_NAME);
    }
}
