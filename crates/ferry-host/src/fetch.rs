use async_trait::async_trait;
use ferry_abi::{Header, HttpRequest, HttpResponse, TaskErrorCode};
use std::time::Duration;
use url::Url;

/// Performs outbound HTTP on behalf of the guest.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Any status code is a successful fetch; only transport-level failures
    /// are errors.
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("outbound request timed out")]
    Timeout,
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("outbound request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// The code reported back to the guest for this failure.
    pub fn code(&self) -> TaskErrorCode {
        match self {
            FetchError::InvalidRequest(_) => TaskErrorCode::InvalidRequest,
            FetchError::Connect(_) => TaskErrorCode::ConnectFailed,
            FetchError::Timeout => TaskErrorCode::Timeout,
            FetchError::Body(_) => TaskErrorCode::BodyFailed,
            FetchError::Request(_) => TaskErrorCode::RequestFailed,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if err.is_builder() {
            FetchError::InvalidRequest(err.to_string())
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

/// [`HttpFetch`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, timeout })
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| FetchError::InvalidRequest(format!("{}: {err}", request.method)))?;
        let url = Url::parse(&request.url)
            .map_err(|err| FetchError::InvalidRequest(format!("{}: {err}", request.url)))?;
        let allows_body = request.allows_body();

        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.timeout);
        for header in &request.headers {
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }
        if allows_body {
            builder = builder.body(request.content);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                Header::new(name.as_str(), String::from_utf8_lossy(value.as_bytes()))
            })
            .collect();
        let content = response.text().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(err.to_string())
            }
        })?;

        tracing::debug!(status, content_bytes = content.len(), "outbound request finished");
        Ok(HttpResponse {
            status,
            headers,
            content,
        })
    }
}
