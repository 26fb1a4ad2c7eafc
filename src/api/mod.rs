//! Remote API adapters.
//!
//! Each adapter issues one authenticated GET, decodes the `{count, results}`
//! envelope the service wraps every list in, and maps the wire shape into
//! the domain model. Adapters never panic on bad input: every failure comes
//! back as an [`ApiError`].

mod events;
mod exams;
mod notices;
mod schedule;
mod subjects;
pub mod token;
pub mod transport;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ApiConfig;

pub use token::{TokenApi, TokenEndpoint};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportError};

/// Why a remote call produced no usable data.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server answered {status}")]
    Status { status: u16, body: Option<String> },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("request could not be prepared: {0}")]
    Request(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Transport(err.0)
    }
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The token endpoint rejected the grant itself (revoked or expired
    /// refresh token, bad authorization code). Retrying will not help.
    pub fn is_invalid_grant(&self) -> bool {
        #[derive(Deserialize)]
        struct OAuthError {
            error: String,
        }

        match self {
            ApiError::Status { status: 401, .. } => true,
            ApiError::Status {
                status: 400,
                body: Some(body),
            } => serde_json::from_str::<OAuthError>(body)
                .map(|e| matches!(e.error.as_str(), "invalid_grant" | "invalid_token"))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    #[serde(default)]
    count: u64,
    results: Vec<T>,
}

/// Turn a finished response into a decoded body.
pub(crate) fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    if response.status != 200 {
        return Err(ApiError::Status {
            status: response.status,
            body: response
                .body
                .map(|b| String::from_utf8_lossy(&b).into_owned()),
        });
    }
    let body = response
        .body
        .ok_or_else(|| ApiError::Decode("empty response body".to_string()))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Resource endpoints of the university API.
pub struct PortalApi {
    transport: Arc<dyn Transport>,
    base_url: String,
    language: Option<String>,
}

impl PortalApi {
    pub fn new(transport: Arc<dyn Transport>, config: &ApiConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: (!config.language.is_empty()).then(|| config.language.clone()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T, ApiError> {
        let response = self
            .transport
            .get(url, Some(token), self.language.as_deref())
            .await?;
        decode(response)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<Vec<T>, ApiError> {
        let envelope: Envelope<T> = self.get_json(url, token).await?;
        Ok(envelope.results)
    }
}
