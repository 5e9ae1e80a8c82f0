//! HTTP transport used for the WHIP exchange.
//!
//! [`HttpTransport`] is the seam: the session client builds complete
//! requests, the transport only moves bytes. [`HyperTransport`] is the real
//! one, a hyper client over rustls with a hard timeout per request.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use super::WhipError;

/// Client-side bound on every signaling request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully built signaling request
#[derive(Clone, Debug)]
pub struct WhipRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What came back from the endpoint
#[derive(Clone, Debug)]
pub struct WhipResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WhipResponse {
    /// Header value as text, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Carries one request to the endpoint and returns its response.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn execute(&self, request: WhipRequest) -> Result<WhipResponse, WhipError>;
}

/// hyper + rustls transport
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeout: Duration) -> Self {
        // Create HTTP client with webpki roots for TLS
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);

        Self { client, timeout }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpTransport for HyperTransport {
    async fn execute(&self, request: WhipRequest) -> Result<WhipResponse, WhipError> {
        let WhipRequest { method, url, headers, body } = request;

        let mut http_request = Request::builder()
            .method(method)
            .uri(url.as_str())
            .body(Full::new(body))
            .map_err(|e| WhipError::Request(e.to_string()))?;
        *http_request.headers_mut() = headers;

        let exchange = async {
            let response = self
                .client
                .request(http_request)
                .await
                .map_err(|e| WhipError::Transport(e.to_string()))?;

            let status = response.status();
            let headers = response.headers().clone();

            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| WhipError::Transport(format!("Failed to read response body: {}", e)))?
                .to_bytes();

            Ok::<_, WhipError>(WhipResponse { status, headers, body })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| WhipError::Timeout(self.timeout))?
    }
}
