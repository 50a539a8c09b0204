//! Typed persistent identifiers
//!
//! A [`Pid`] is a closed set of three variants. Classification order is
//! DOI, then Handle, then URL; the first grammar that accepts a string decides
//! its interpretation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::extractors::{parse_doi, parse_handle, parse_url};

const DOI_RESOLVER: &str = "https://doi.org/";
const HANDLE_RESOLVER: &str = "https://hdl.handle.net/";

/// Kinds of persistent identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidKind {
    /// Digital Object Identifier
    Doi,
    /// Handle System identifier
    Hdl,
    /// Plain absolute URL
    Url,
}

impl PidKind {
    /// All kinds, in classification order
    pub fn all() -> &'static [PidKind] {
        &[PidKind::Doi, PidKind::Hdl, PidKind::Url]
    }

    /// Lowercase tag used in repository configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            PidKind::Doi => "doi",
            PidKind::Hdl => "hdl",
            PidKind::Url => "url",
        }
    }

    /// Template placeholder replaced by the resolvable form of a PID of this kind
    pub fn placeholder(&self) -> &'static str {
        match self {
            PidKind::Doi => "$doi",
            PidKind::Hdl => "$hdl",
            PidKind::Url => "$url",
        }
    }
}

impl fmt::Display for PidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string matches none of the PID grammars
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a persistent identifier: {0:?}")]
pub struct NotAPid(pub String);

/// A DOI split into prefix and suffix.
///
/// The suffix is further divided into a collection token and a record token
/// on its last `.` or `/` separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Doi {
    prefix: String,
    suffix: String,
    collection: String,
    separator: String,
    record: String,
}

impl Doi {
    /// Build a DOI from its `10.xxxx` prefix and a non-empty suffix
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let suffix = suffix.into();
        let (collection, separator, record) = split_suffix(&suffix);
        Self {
            prefix,
            suffix,
            collection,
            separator,
            record,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// `.` or `/`, empty when the suffix has no usable separator
    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn record(&self) -> &str {
        &self.record
    }

    pub fn resolvable(&self) -> String {
        format!("{}doi:{}/{}", DOI_RESOLVER, self.prefix, self.suffix)
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doi:{}/{}", self.prefix, self.suffix)
    }
}

/// Split on the last `.` or `/` that leaves both sides non-empty
fn split_suffix(suffix: &str) -> (String, String, String) {
    let split_at = suffix
        .char_indices()
        .filter(|(i, c)| (*c == '.' || *c == '/') && *i > 0 && i + 1 < suffix.len())
        .map(|(i, _)| i)
        .last();

    match split_at {
        Some(i) => (
            suffix[..i].to_string(),
            suffix[i..i + 1].to_string(),
            suffix[i + 1..].to_string(),
        ),
        None => (suffix.to_string(), String::new(), suffix.to_string()),
    }
}

/// A Handle: naming authority plus local name.
///
/// A trailing content-negotiation suffix (`@format=cmdi`, `@view`, `?index=1`)
/// is kept aside; it never takes part in the record id or the resolvable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    authority: String,
    local_name: String,
    negotiation: Option<String>,
}

impl Handle {
    pub fn new(
        authority: impl Into<String>,
        local_name: impl Into<String>,
        negotiation: Option<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            local_name: local_name.into(),
            negotiation,
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// The stripped `@format=...`, `@view` or `?index=N` suffix, if any
    pub fn negotiation_suffix(&self) -> Option<&str> {
        self.negotiation.as_deref()
    }

    pub fn resolvable(&self) -> String {
        format!("{}{}/{}", HANDLE_RESOLVER, self.authority, self.local_name)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resolvable())
    }
}

/// An absolute URL with a network location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlPid {
    url: Url,
    host_netloc: String,
    collection: String,
    record: String,
}

impl UrlPid {
    pub(crate) fn from_parsed(url: Url) -> Option<Self> {
        let host = url.host_str().filter(|h| !h.is_empty())?;
        let host_netloc = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let serialized = url.as_str();
        let mut segments = serialized.rsplit('/');
        let record = segments.next().unwrap_or_default().to_string();
        let collection = segments.next().unwrap_or_default().to_string();

        Some(Self {
            url,
            host_netloc,
            collection,
            record,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host plus optional port
    pub fn host_netloc(&self) -> &str {
        &self.host_netloc
    }

    /// Second-to-last path segment
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Last path segment
    pub fn record(&self) -> &str {
        &self.record
    }

    pub fn resolvable(&self) -> String {
        self.url.to_string()
    }
}

impl fmt::Display for UrlPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Persistent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pid {
    Doi(Doi),
    Hdl(Handle),
    Url(UrlPid),
}

impl Pid {
    /// Classify a raw string, trying DOI, Handle and URL grammars in that order.
    ///
    /// Returns `None` when no grammar accepts the input.
    pub fn classify(raw: &str) -> Option<Pid> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(doi) = parse_doi(raw) {
            return Some(Pid::Doi(doi));
        }
        if let Some(handle) = parse_handle(raw) {
            return Some(Pid::Hdl(handle));
        }
        parse_url(raw).map(Pid::Url)
    }

    pub fn kind(&self) -> PidKind {
        match self {
            Pid::Doi(_) => PidKind::Doi,
            Pid::Hdl(_) => PidKind::Hdl,
            Pid::Url(_) => PidKind::Url,
        }
    }

    /// Canonical absolute URL form
    pub fn resolvable(&self) -> String {
        match self {
            Pid::Doi(doi) => doi.resolvable(),
            Pid::Hdl(handle) => handle.resolvable(),
            Pid::Url(url) => url.resolvable(),
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            Pid::Doi(doi) => doi.record(),
            Pid::Hdl(handle) => handle.local_name(),
            Pid::Url(url) => url.record(),
        }
    }

    /// Namespace component: DOI prefix, Handle naming authority, or URL collection segment
    pub fn repo_id(&self) -> &str {
        match self {
            Pid::Doi(doi) => doi.prefix(),
            Pid::Hdl(handle) => handle.authority(),
            Pid::Url(url) => url.collection(),
        }
    }

    /// Network location, only defined for URLs
    pub fn host_netloc(&self) -> Option<&str> {
        match self {
            Pid::Url(url) => Some(url.host_netloc()),
            _ => None,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pid::Doi(doi) => doi.fmt(f),
            Pid::Hdl(handle) => handle.fmt(f),
            Pid::Url(url) => url.fmt(f),
        }
    }
}

impl FromStr for Pid {
    type Err = NotAPid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pid::classify(s).ok_or_else(|| NotAPid(s.to_string()))
    }
}

impl From<Doi> for Pid {
    fn from(doi: Doi) -> Self {
        Pid::Doi(doi)
    }
}

impl From<Handle> for Pid {
    fn from(handle: Handle) -> Self {
        Pid::Hdl(handle)
    }
}

impl From<UrlPid> for Pid {
    fn from(url: UrlPid) -> Self {
        Pid::Url(url)
    }
}
