//! HTTP adapters for the remediation pipeline's external collaborators.
//!
//! - [`CompletionsClient`]: OpenAI-compatible `/v1/completions` (vLLM, llama.cpp server)
//! - [`HttpCaseStore`]: similarity search over past remediations

pub mod completions;
pub mod error;
pub mod memory;

pub use completions::CompletionsClient;
pub use error::{GatewayError, Result};
pub use memory::HttpCaseStore;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("remedy-gateway/", env!("CARGO_PKG_VERSION"));

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// At most `max` characters of an error body, for diagnostics.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max).collect();
    out.push_str("...");
    out
}
