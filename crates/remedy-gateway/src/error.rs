//! Error types for remedy-gateway

use thiserror::Error;

/// Errors constructing an adapter. Per-request failures are reported through
/// the pipeline's own `LlmError` / `RetrievalError`.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

pub(crate) fn check_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(())
    } else {
        Err(GatewayError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "expected an http:// or https:// URL".to_string(),
        })
    }
}
