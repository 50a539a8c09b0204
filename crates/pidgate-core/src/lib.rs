//! pidgate-core: resolve persistent identifiers to the repositories hosting them
//!
//! This library provides:
//! - A registry of repository descriptors loaded from JSON
//! - Request construction from per-repository templates, regexes and redirects
//! - FAIR signposting discovery
//! - Metadata extraction from JSON, XML, CMDI and HTML payloads
//! - A [`Resolver`] answering sniff, fetch and identify queries
//!
//! All network access goes through the [`http::Transport`] trait. The
//! `native` feature adds a reqwest-backed implementation.

pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod signpost;

pub use pidgate_identifiers::{Pid, PidKind};

pub use config::{ResolverOptions, Secrets};
pub use error::{ConfigError, ExtractError, RequestBuildError, ResolveError, ResolveResult};
pub use extract::{
    Extract, Extractor, FetchResult, IdentifyResult, ParserConfig, ParserFormat,
    ReferencedResource, ReferencedResources,
};
pub use http::{Headers, HttpError, HttpResponse, Transport};
#[cfg(feature = "native")]
pub use http::{HttpClient, TransportConfig};
pub use registry::{Registry, RepositoryDescriptor, RepositorySummary};
pub use request::{BuiltRequest, RequestBuilder};
pub use resolver::{RepositoryStatus, Resolver, ToPid};
