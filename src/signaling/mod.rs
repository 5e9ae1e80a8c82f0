//! WHIP signaling (RFC 9725).
//!
//! - `transport`: the HTTP seam and the hyper-based implementation
//! - `whip_client`: session create / trickle ICE update / delete

pub mod transport;
pub mod whip_client;

pub use transport::*;
pub use whip_client::*;

use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Errors from a single signaling operation. None of them are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WhipError {
    #[error("Failed to build request: {0}")]
    Request(String),

    #[error("WHIP request failed: {0}")]
    Transport(String),

    #[error("WHIP request timed out after {0:?}")]
    Timeout(Duration),

    #[error("WHIP server returned {actual}, expected {expected}")]
    UnexpectedStatus { expected: StatusCode, actual: StatusCode },

    #[error("WHIP response has no Location header")]
    MissingLocation,

    #[error("Resource URL is empty")]
    EmptyResource,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
