//! HTTP capability used by the resolver
//!
//! The resolver never talks to the network directly; it goes through a
//! [`Transport`]. Any non-success final status is reported as an error, so
//! callers decide locally whether a failure is fatal.

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub use native::*;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Request headers, in a stable order
pub type Headers = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Request failed: {message}")]
    RequestFailed { message: String },
    #[error("Response code from {url}: {status}")]
    Status { url: String, status: u16 },
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },
    #[error("Invalid header {name}")]
    InvalidHeader { name: String },
    #[error("Timeout")]
    Timeout,
}

#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    /// Final URL after any followed redirects
    pub effective_url: String,
    pub status: u16,
    /// Empty for HEAD requests
    pub body: String,
    /// Header names are stored lowercase
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// GET/HEAD capability consumed by the resolver.
///
/// Implementations must be safe to share between concurrent resolutions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, returning the body and the effective URL
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError>;

    /// HEAD `url`; the returned body is always empty
    async fn head(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError>;
}
