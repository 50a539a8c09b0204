//! FAIR signposting discovery
//!
//! A landing page may advertise a machine-readable description of itself in
//! its `Link` response header. Discovery is best effort: every failure is
//! logged and reported as "no signpost".

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use pidgate_identifiers::Pid;

use crate::http::{Headers, Transport};

lazy_static! {
    static ref LINK_REGEX: Regex = Regex::new(r"<(?P<url>[^>]*)>(?P<params>[^<]*)").unwrap();
    static ref REL_REGEX: Regex =
        Regex::new(r#"(?i)\brel\s*=\s*(?:"(?P<quoted>[^"]*)"|(?P<bare>[^\s;,]+))"#).unwrap();
}

/// Relation preferred when a header lists several links
pub const DESCRIBED_BY: &str = "describedby";

/// One `<url>; rel="..."` entry of a `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignpostLink {
    pub url: String,
    /// Space-separated relation types, empty when the entry has none
    pub rel: String,
}

impl SignpostLink {
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rel
            .split_whitespace()
            .any(|candidate| candidate.eq_ignore_ascii_case(rel))
    }
}

/// Parse every bracketed link of a `Link` header value, in header order
pub fn parse_link_header(value: &str) -> Vec<SignpostLink> {
    LINK_REGEX
        .captures_iter(value)
        .filter_map(|captures| {
            let url = captures.name("url")?.as_str().trim();
            if url.is_empty() {
                return None;
            }
            let rel = captures
                .name("params")
                .and_then(|params| REL_REGEX.captures(params.as_str()))
                .and_then(|rel| rel.name("quoted").or_else(|| rel.name("bare")))
                .map(|rel| rel.as_str().trim().to_string())
                .unwrap_or_default();
            Some(SignpostLink {
                url: url.to_string(),
                rel,
            })
        })
        .collect()
}

/// The `describedby` link if there is one, otherwise the first link
pub fn preferred_link(links: &[SignpostLink]) -> Option<&SignpostLink> {
    links
        .iter()
        .find(|link| link.has_rel(DESCRIBED_BY))
        .or_else(|| links.first())
}

/// HEAD the resolvable form of `pid` and return the advertised metadata URL.
///
/// Relative links are resolved against the effective URL of the HEAD response.
pub async fn discover(transport: &dyn Transport, pid: &Pid) -> Option<String> {
    let target = pid.resolvable();
    let response = match transport.head(&target, &Headers::new(), true).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Signpost probe of {} failed: {}", target, e);
            return None;
        }
    };

    let Some(header) = response.header("link") else {
        tracing::debug!("No Link header at {}", target);
        return None;
    };

    let links = parse_link_header(header);
    let link = preferred_link(&links)?;

    let base = if response.effective_url.is_empty() {
        target.as_str()
    } else {
        response.effective_url.as_str()
    };
    match Url::parse(base).and_then(|base| base.join(&link.url)) {
        Ok(url) => {
            tracing::debug!("Signpost for {}: {} (rel {:?})", pid, url, link.rel);
            Some(url.to_string())
        }
        Err(e) => {
            tracing::debug!("Unusable signpost link {:?} at {}: {}", link.url, target, e);
            None
        }
    }
}
