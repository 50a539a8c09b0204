//! PID grammars
//!
//! Each parser accepts a whole (trimmed) string and returns the typed
//! identifier, or `None` when the grammar does not match.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::pid::{Doi, Handle, UrlPid};

lazy_static! {
    // DOI: 10.<4-9 digits>/<suffix>, at the start of the string or right after
    // a `/` or `:` (covers `doi:` and https://doi.org/ resolver forms)
    static ref DOI_REGEX: Regex = Regex::new(
        r"(?:^|[/:])(?P<prefix>10\.\d{4,9})/(?P<suffix>[^\s/][^\s]*)$"
    ).unwrap();

    // Handle: <authority>/<local-name> with optional hdl: or resolver prefix and
    // an optional content-negotiation suffix kept out of the local name
    static ref HANDLE_REGEX: Regex = Regex::new(
        r"^(?:hdl:|https?://hdl\.handle\.net/)?(?P<authority>\d[\w.]*)/(?P<local>[\w\-.]+?)(?P<negotiation>@format=[^\s@?]+|@view|\?index=\d)?$"
    ).unwrap();
}

/// Parse a DOI in bare, `doi:` or resolver URL form
pub fn parse_doi(raw: &str) -> Option<Doi> {
    let caps = DOI_REGEX.captures(raw)?;
    let prefix = caps.name("prefix")?.as_str();
    let suffix = caps.name("suffix")?.as_str();
    Some(Doi::new(prefix, suffix))
}

/// Parse a Handle in bare, `hdl:` or resolver URL form
pub fn parse_handle(raw: &str) -> Option<Handle> {
    let caps = HANDLE_REGEX.captures(raw)?;
    let authority = caps.name("authority")?.as_str();
    let local = caps.name("local")?.as_str();
    let negotiation = caps.name("negotiation").map(|m| m.as_str().to_string());
    Some(Handle::new(authority, local, negotiation))
}

/// Parse an absolute URL that has a network location.
///
/// A single trailing `/` is dropped before the record and collection
/// segments are derived.
pub fn parse_url(raw: &str) -> Option<UrlPid> {
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    let url = Url::parse(trimmed).ok()?;
    UrlPid::from_parsed(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doi_forms() {
        for raw in [
            "10.23728/b2share.d643",
            "doi:10.23728/b2share.d643",
            "https://doi.org/10.23728/b2share.d643",
            "https://doi.org/doi:10.23728/b2share.d643",
        ] {
            let doi = parse_doi(raw).unwrap_or_else(|| panic!("{} should parse", raw));
            assert_eq!(doi.prefix(), "10.23728");
            assert_eq!(doi.suffix(), "b2share.d643");
        }
    }

    #[test]
    fn test_parse_doi_rejects_short_registrant() {
        assert!(parse_doi("10.12/abc.def").is_none());
        assert!(parse_doi("10.1234/").is_none());
    }

    #[test]
    fn test_parse_handle_forms() {
        let handle = parse_handle("https://hdl.handle.net/11372/LRT-1234").unwrap();
        assert_eq!(handle.authority(), "11372");
        assert_eq!(handle.local_name(), "LRT-1234");

        let handle = parse_handle("hdl:21.11115/0000-000C-0A64-4").unwrap();
        assert_eq!(handle.authority(), "21.11115");

        let handle = parse_handle("11304/a287e5b9-feca-4ad6-bc16-14675d574088").unwrap();
        assert_eq!(handle.authority(), "11304");
        assert!(handle.negotiation_suffix().is_none());
    }

    #[test]
    fn test_parse_handle_negotiation_suffixes() {
        let handle = parse_handle("https://hdl.handle.net/11321/6@format=cmdi").unwrap();
        assert_eq!(handle.local_name(), "6");
        assert_eq!(handle.negotiation_suffix(), Some("@format=cmdi"));

        let handle = parse_handle("http://hdl.handle.net/11858/00-1779-0000-0C42@view").unwrap();
        assert_eq!(handle.local_name(), "00-1779-0000-0C42");
        assert_eq!(handle.negotiation_suffix(), Some("@view"));

        let handle = parse_handle("hdl:11022/0000-0007-C4B1-2?index=0").unwrap();
        assert_eq!(handle.local_name(), "0000-0007-C4B1-2");
        assert_eq!(handle.negotiation_suffix(), Some("?index=0"));
    }

    #[test]
    fn test_parse_handle_rejects_urls() {
        assert!(parse_handle("https://example.org/records/123").is_none());
        assert!(parse_handle("abc").is_none());
    }

    #[test]
    fn test_parse_url() {
        let url = parse_url("https://b2share.eudat.eu/records/d64361c0/").unwrap();
        assert_eq!(url.host_netloc(), "b2share.eudat.eu");
        assert_eq!(url.record(), "d64361c0");
        assert_eq!(url.collection(), "records");
        assert_eq!(url.resolvable(), "https://b2share.eudat.eu/records/d64361c0");
    }

    #[test]
    fn test_parse_url_keeps_port() {
        let url = parse_url("http://localhost:8080/a/b").unwrap();
        assert_eq!(url.host_netloc(), "localhost:8080");
    }

    #[test]
    fn test_parse_url_requires_netloc() {
        assert!(parse_url("mailto:someone@example.org").is_none());
        assert!(parse_url("not a url").is_none());
        assert!(parse_url("").is_none());
    }
}
