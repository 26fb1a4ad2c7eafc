//! OAuth2 token endpoint client.

use std::sync::Arc;

use async_trait::async_trait;

use super::{decode, ApiError, Transport};
use crate::config::ApiConfig;
use crate::model::AccessToken;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Where access tokens come from.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Trade an authorization code for the first token pair.
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ApiError>;

    /// Trade a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, ApiError>;
}

pub struct TokenApi {
    transport: Arc<dyn Transport>,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenApi {
    pub fn new(transport: Arc<dyn Transport>, config: &ApiConfig) -> Self {
        Self {
            transport,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<AccessToken, ApiError> {
        let credentials = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let body = encode_form(params.iter().chain(credentials.iter()));
        let response = self
            .transport
            .post(&self.token_url, body.into_bytes(), FORM_CONTENT_TYPE, None)
            .await?;
        decode(response)
    }
}

fn encode_form<'a>(pairs: impl Iterator<Item = &'a (&'a str, &'a str)>) -> String {
    pairs
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl TokenEndpoint for TokenApi {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ApiError> {
        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, ApiError> {
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
