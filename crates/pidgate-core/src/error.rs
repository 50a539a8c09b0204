//! Error types for pidgate-core
//!
//! "Not a PID" and "no matching repository" are ordinary outcomes and are
//! returned as `None`, never as one of these errors.

use std::path::PathBuf;

use pidgate_identifiers::PidKind;
use thiserror::Error;

use crate::http::HttpError;

/// Repository configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid repository descriptor in {origin}: {source}")]
    Descriptor {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Repository descriptor {origin:?} has an empty id")]
    EmptyId { origin: String },

    #[error("Duplicate repository id: {0}")]
    DuplicateId(String),
}

/// The outbound metadata request for a repository could not be built.
#[derive(Debug, Error)]
pub enum RequestBuildError {
    #[error("Repository {repository} has no {kind} request rules")]
    MissingRules { repository: String, kind: PidKind },

    #[error("Repository {repository} has no {kind} request template")]
    MissingTemplate { repository: String, kind: PidKind },

    #[error("Regex of repository {repository} does not match {resolvable}")]
    RecordIdNotFound {
        repository: String,
        resolvable: String,
    },

    #[error("Redirect chain exceeded {0} hops")]
    TooManyRedirects(usize),

    #[error("Redirect target is not a persistent identifier: {0}")]
    RedirectNotAPid(String),

    #[error(transparent)]
    Http(#[from] HttpError),
}

impl RequestBuildError {
    /// Rules or templates absent from the descriptor altogether
    pub fn is_missing_configuration(&self) -> bool {
        matches!(
            self,
            RequestBuildError::MissingRules { .. } | RequestBuildError::MissingTemplate { .. }
        )
    }
}

/// A payload is not valid for its declared format.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid markup payload: {0}")]
    Markup(String),
}

/// Errors surfaced by the resolver's public operations.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Request(#[from] RequestBuildError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

pub type ResolveResult<T> = Result<T, ResolveError>;
