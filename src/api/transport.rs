//! Minimal HTTP seam the API adapters are written against.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header;
use thiserror::Error;

/// Status and raw body of a finished request. An empty body is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            body: (!body.is_empty()).then_some(body),
        }
    }
}

/// The request never produced a response (DNS, connect, timeout, ...).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        bearer: Option<&str>,
        accept_language: Option<&str>,
    ) -> Result<HttpResponse, TransportError>;

    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] over a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("campus/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn finish(request: reqwest::RequestBuilder) -> Result<HttpResponse, TransportError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        bearer: Option<&str>,
        accept_language: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url).header(header::ACCEPT, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(language) = accept_language {
            request = request.header(header::ACCEPT_LANGUAGE, language);
        }
        Self::finish(request).await
    }

    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Self::finish(request).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for adapter and controller tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Sent {
        pub method: &'static str,
        pub url: String,
        pub bearer: Option<String>,
        pub language: Option<String>,
        pub body: Option<String>,
    }

    /// Answers each request with the first scripted reply whose URL
    /// fragment matches, in order.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<(String, Result<HttpResponse, TransportError>)>>,
        sent: Mutex<Vec<Sent>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&self, url_fragment: &str, status: u16, body: &str) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .push_back((url_fragment.to_string(), Ok(HttpResponse::new(status, body))));
            self
        }

        pub fn fail(&self, url_fragment: &str, message: &str) -> &Self {
            self.replies.lock().unwrap().push_back((
                url_fragment.to_string(),
                Err(TransportError(message.to_string())),
            ));
            self
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn answer(&self, sent: Sent) -> Result<HttpResponse, TransportError> {
            let url = sent.url.clone();
            self.sent.lock().unwrap().push(sent);
            let mut replies = self.replies.lock().unwrap();
            let position = replies
                .iter()
                .position(|(fragment, _)| url.contains(fragment.as_str()));
            match position.and_then(|i| replies.remove(i)) {
                Some((_, reply)) => reply,
                None => Err(TransportError(format!("no scripted reply for {url}"))),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(
            &self,
            url: &str,
            bearer: Option<&str>,
            accept_language: Option<&str>,
        ) -> Result<HttpResponse, TransportError> {
            self.answer(Sent {
                method: "GET",
                url: url.to_string(),
                bearer: bearer.map(str::to_string),
                language: accept_language.map(str::to_string),
                body: None,
            })
        }

        async fn post(
            &self,
            url: &str,
            body: Vec<u8>,
            _content_type: &str,
            bearer: Option<&str>,
        ) -> Result<HttpResponse, TransportError> {
            self.answer(Sent {
                method: "POST",
                url: url.to_string(),
                bearer: bearer.map(str::to_string),
                language: None,
                body: Some(String::from_utf8_lossy(&body).into_owned()),
            })
        }
    }
}
