//! WHIP Client - WebRTC-HTTP Ingestion Protocol client (RFC 9725).
//!
//! Publishes our offer to an external WHIP server (like MediaMTX or
//! Broadcast Box) and manages the resulting session resource.
//! Flow:
//! 1. POST offer to the endpoint, expect 201 + Location (+ ETag)
//! 2. PATCH trickled ICE candidates to the resource, expect 204
//! 3. DELETE the resource on shutdown, expect 200

use bytes::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH, LOCATION};
use hyper::{HeaderMap, Method, StatusCode};
use log::{debug, info, warn};

use super::transport::{HttpTransport, WhipRequest, WhipResponse};
use super::WhipError;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";
pub const TRICKLE_ICE_CONTENT_TYPE: &str = "application/trickle-ice-sdpfrag";

/// Result of a successful offer exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhipSession {
    /// Location of the session resource, as sent by the server
    pub resource_id: String,
    /// ETag for optimistic concurrency on later updates
    pub concurrency_token: Option<String>,
    pub answer_sdp: String,
}

/// WHIP client bound to one endpoint
pub struct WhipClient<T> {
    /// WHIP endpoint URL
    endpoint_url: String,
    /// Bearer token, sent on every request
    auth_key: Option<String>,
    transport: T,
}

impl<T: HttpTransport> WhipClient<T> {
    pub fn new(endpoint_url: impl Into<String>, auth_key: Option<String>, transport: T) -> Self {
        Self { endpoint_url: endpoint_url.into(), auth_key, transport }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Resolve a resource location (absolute, or relative to the endpoint).
    pub fn resolve_resource(&self, resource: &str) -> Result<String, WhipError> {
        if resource.is_empty() {
            return Err(WhipError::EmptyResource);
        }

        let base = url::Url::parse(&self.endpoint_url)
            .map_err(|e| WhipError::InvalidUrl(format!("{}: {}", self.endpoint_url, e)))?;
        base.join(resource)
            .map(|u| u.to_string())
            .map_err(|e| WhipError::InvalidUrl(format!("{}: {}", resource, e)))
    }

    fn headers(&self, content_type: Option<&'static str>) -> Result<HeaderMap, WhipError> {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Some(key) = &self.auth_key {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| WhipError::Request(format!("Invalid auth key: {}", e)))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        Ok(headers)
    }

    async fn send(&self, request: WhipRequest, expected: StatusCode) -> Result<WhipResponse, WhipError> {
        let response = self.transport.execute(request).await?;
        if response.status != expected {
            return Err(WhipError::UnexpectedStatus { expected, actual: response.status });
        }
        Ok(response)
    }

    /// POST the offer. Only `201 Created` with a Location header counts.
    pub async fn create_session(&self, offer_sdp: &str) -> Result<WhipSession, WhipError> {
        let request = WhipRequest {
            method: Method::POST,
            url: self.endpoint_url.clone(),
            headers: self.headers(Some(SDP_CONTENT_TYPE))?,
            body: Bytes::from(offer_sdp.to_owned()),
        };

        let response = self.send(request, StatusCode::CREATED).await?;

        let resource_id = response
            .header(LOCATION.as_str())
            .filter(|location| !location.is_empty())
            .ok_or(WhipError::MissingLocation)?
            .to_string();
        let concurrency_token = response.header(ETAG.as_str()).map(str::to_string);
        let answer_sdp = String::from_utf8_lossy(&response.body).into_owned();

        info!("Server responded with resource {}, etag {:?}", resource_id, concurrency_token);

        Ok(WhipSession { resource_id, concurrency_token, answer_sdp })
    }

    /// PATCH one trickle ICE fragment. Only `204 No Content` counts.
    pub async fn update_ice(
        &self,
        resource_id: &str,
        concurrency_token: Option<&str>,
        fragment: String,
    ) -> Result<(), WhipError> {
        let mut headers = self.headers(Some(TRICKLE_ICE_CONTENT_TYPE))?;
        if let Some(token) = concurrency_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| WhipError::Request(format!("Invalid ETag {}: {}", token, e)))?;
            headers.insert(IF_MATCH, value.clone());
            headers.insert(ETAG, value);
        }

        let request = WhipRequest {
            method: Method::PATCH,
            url: self.resolve_resource(resource_id)?,
            headers,
            body: Bytes::from(fragment),
        };

        self.send(request, StatusCode::NO_CONTENT).await?;
        debug!("ICE candidate delivered to {}", resource_id);
        Ok(())
    }

    /// DELETE the session resource. Only `200 OK` counts.
    pub async fn delete_session(&self, resource_id: &str) -> Result<(), WhipError> {
        let url = self.resolve_resource(resource_id)?;
        info!("Sending DELETE request to: {}", url);

        let request = WhipRequest {
            method: Method::DELETE,
            url,
            headers: self.headers(None)?,
            body: Bytes::new(),
        };

        match self.send(request, StatusCode::OK).await {
            Ok(_) => {
                info!("Session deleted successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to delete session: {}", e);
                Err(e)
            }
        }
    }
}
