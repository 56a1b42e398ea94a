use std::time::Duration;

use async_trait::async_trait;
use presence_proto::id_checker::v1::{
    CheckIdRequest, id_checker_service_client::IdCheckerServiceClient,
};
use tonic::transport::Endpoint;

use crate::config::Config;

/// Failure to obtain a verdict. A verdict of `false` is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid identity service address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("identity service unreachable: {0}")]
    Connect(String),
    #[error("identity check failed: {0}")]
    Call(String),
}

#[async_trait]
pub trait IdentityValidator: Send + Sync {
    async fn validate(&self, token: &str, subject: &str) -> Result<bool, ValidationError>;
}

/// Checks credentials against the remote id-checker service, one connection per call.
#[derive(Debug, Clone)]
pub struct IdentityServiceValidator {
    address: String,
    development: bool,
    timeout: Duration,
}

impl IdentityServiceValidator {
    pub fn new(address: impl Into<String>, development: bool, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            development,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.identity_service.clone(),
            config.development,
            config.identity_timeout,
        )
    }

    fn endpoint(&self) -> Result<Endpoint, ValidationError> {
        let uri = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        };
        Endpoint::from_shared(uri)
            .map(|endpoint| {
                endpoint
                    .connect_timeout(self.timeout)
                    .timeout(self.timeout)
            })
            .map_err(|error| ValidationError::InvalidAddress {
                address: self.address.clone(),
                reason: error.to_string(),
            })
    }
}

#[async_trait]
impl IdentityValidator for IdentityServiceValidator {
    async fn validate(&self, token: &str, subject: &str) -> Result<bool, ValidationError> {
        if self.development {
            return Ok(true);
        }

        let channel = self
            .endpoint()?
            .connect()
            .await
            .map_err(|error| ValidationError::Connect(error.to_string()))?;
        let mut client = IdCheckerServiceClient::new(channel);

        let response = client
            .check_id(CheckIdRequest {
                id: subject.to_string(),
                access_token: token.to_string(),
            })
            .await
            .map_err(|status| ValidationError::Call(status.message().to_string()))?;

        Ok(response.into_inner().is_valid)
    }
}
