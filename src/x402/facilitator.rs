//! Remote payment verdicts.
//!
//! [`Facilitator`] is the seam the verifier talks to; [`FacilitatorClient`]
//! speaks the `POST {base}/verify` JSON protocol.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use reqwest::Client;
use url::Url;

use super::types::{VerifyRequest, VerifyResponse};
use crate::config::GlobalConfig;
use crate::error::ErrorKind;

/// A service that can judge an authorization payload against a requirement.
pub trait Facilitator {
    type Error: Debug + Display;

    /// `Err` means no verdict could be obtained. A rejection is `Ok` with
    /// `is_valid == false`.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        (**self).verify(request)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("No facilitator URL configured")]
    NotConfigured,
    #[error("Invalid facilitator URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Facilitator request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Facilitator answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Facilitator sent an unreadable verdict: {0}")]
    Decode(#[source] reqwest::Error),
}

impl FacilitatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured | Self::Url { .. } => ErrorKind::Configuration,
            Self::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Transport(_) | Self::Status { .. } | Self::Decode(_) => ErrorKind::Network,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    client: Client,
    verify_url: Url,
    timeout: Option<Duration>,
}

impl FacilitatorClient {
    /// `base` is treated as a directory: `https://f.example/x402` verifies at
    /// `https://f.example/x402/verify`.
    pub fn new(base: &str) -> Result<Self, FacilitatorError> {
        let directory = format!("{}/", base.trim_end_matches('/'));
        let verify_url = Url::parse(&directory)
            .and_then(|url| url.join("verify"))
            .map_err(|source| FacilitatorError::Url {
                url: base.to_string(),
                source,
            })?;
        Ok(Self {
            client: Client::new(),
            verify_url,
            timeout: None,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    async fn post_verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        let mut builder = self.client.post(self.verify_url.clone()).json(request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(FacilitatorError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorError::Status { status, body });
        }
        response.json().await.map_err(FacilitatorError::Decode)
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        self.post_verify(request).await
    }
}

impl TryFrom<&GlobalConfig> for FacilitatorClient {
    type Error = FacilitatorError;

    fn try_from(config: &GlobalConfig) -> Result<Self, Self::Error> {
        let base = config
            .facilitator_url
            .as_deref()
            .ok_or(FacilitatorError::NotConfigured)?;
        Ok(FacilitatorClient::new(base)?.with_timeout(config.facilitator_timeout()))
    }
}
