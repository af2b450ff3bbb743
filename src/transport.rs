use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};

use crate::remote::{AvatarOptions, RemoteImageRef};
use crate::{GravatarError, Result, TransportError};

/// What came back from the server, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the single GET a view needs per identity.
///
/// The view runs `get` inside a task it can abort, so implementations do
/// not need their own cancellation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        remote: &RemoteImageRef,
    ) -> std::result::Result<Response, TransportError>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: &AvatarOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&options.user_agent).map_err(|_| {
                GravatarError::Config(format!(
                    "user agent {:?} is not a valid header value",
                    options.user_agent
                ))
            })?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(options.timeout())
            .build()?;
        Ok(Self { client })
    }

    /// Reuses an existing client, e.g. one the host application already
    /// configured with proxies.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        remote: &RemoteImageRef,
    ) -> std::result::Result<Response, TransportError> {
        log::debug!("transport: GET {}", remote);

        let response = self
            .client
            .get(remote.as_url().clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        log::debug!(
            "transport: {} answered {} with {} bytes",
            remote,
            status,
            body.len()
        );
        Ok(Response { status, body })
    }
}
