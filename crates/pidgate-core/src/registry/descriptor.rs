//! Repository descriptors
//!
//! A descriptor says which identifiers a repository hosts, how to turn one of
//! them into a metadata request, and how to read the payload that comes back.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use pidgate_identifiers::{Pid, PidKind};

use crate::extract::markup::xpath::XPathError;
use crate::extract::{Extractor, ParserConfig, ParserFormat};
use crate::http::Headers;

lazy_static! {
    static ref SECRET_PLACEHOLDER: Regex = Regex::new(r"\$([A-Z][A-Z0-9_]*)").unwrap();
}

/// Template value that asks for the PID to be followed before building the request
pub const REDIRECT_SENTINEL: &str = "redirect";

/// Identifier namespace(s) claimed by a rule set: one id or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcceptedIds {
    One(String),
    Many(Vec<String>),
}

impl AcceptedIds {
    pub fn contains(&self, repo_id: &str) -> bool {
        match self {
            AcceptedIds::One(id) => id == repo_id,
            AcceptedIds::Many(ids) => ids.iter().any(|id| id == repo_id),
        }
    }
}

/// Request rules for one PID kind
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub id: Option<AcceptedIds>,
    /// Request template, or [`REDIRECT_SENTINEL`]
    #[serde(default)]
    pub format: Option<String>,
    /// Applied to the PID's resolvable form; always has a `record_id` group
    #[serde(default, deserialize_with = "deserialize_record_regex")]
    pub regex: Option<Regex>,
    #[serde(default)]
    pub headers: Option<Headers>,
}

impl RuleSet {
    pub fn accepts(&self, repo_id: &str) -> bool {
        self.id
            .as_ref()
            .map(|ids| ids.contains(repo_id))
            .unwrap_or(false)
    }

    pub fn is_redirect(&self) -> bool {
        self.format.as_deref() == Some(REDIRECT_SENTINEL)
    }
}

fn deserialize_record_regex<'de, D>(deserializer: D) -> Result<Option<Regex>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(pattern) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let regex = Regex::new(&pattern).map_err(de::Error::custom)?;
    if !regex.capture_names().any(|name| name == Some("record_id")) {
        return Err(de::Error::custom(format!(
            "regex {:?} has no record_id group",
            pattern
        )));
    }
    Ok(Some(regex))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub headers: Option<Headers>,
}

#[derive(Deserialize)]
struct RawParserSpec {
    #[serde(rename = "type")]
    format: ParserFormat,
    #[serde(default)]
    config: ParserConfig,
}

/// Declared payload format with its compiled extractor
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawParserSpec")]
pub struct ParserSpec {
    format: ParserFormat,
    config: ParserConfig,
    extractor: Extractor,
}

impl TryFrom<RawParserSpec> for ParserSpec {
    type Error = XPathError;

    fn try_from(raw: RawParserSpec) -> Result<Self, Self::Error> {
        let extractor = Extractor::new(raw.format, &raw.config)?;
        Ok(Self {
            format: raw.format,
            config: raw.config,
            extractor,
        })
    }
}

impl ParserSpec {
    pub fn new(format: ParserFormat, config: ParserConfig) -> Result<Self, XPathError> {
        Self::try_from(RawParserSpec { format, config })
    }

    pub fn format(&self) -> ParserFormat {
        self.format
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }
}

/// Public description of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub host_name: String,
    pub host_netloc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host_name: String,
    /// Host (and optional scheme/port) used to match URL PIDs
    #[serde(default)]
    pub host_netloc: String,
    #[serde(default)]
    pub hdl: Option<RuleSet>,
    #[serde(default)]
    pub doi: Option<RuleSet>,
    #[serde(default)]
    pub url: Option<RuleSet>,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    pub parser: ParserSpec,
    /// Sample PID per kind, used by repository self-tests
    #[serde(default)]
    pub test_examples: BTreeMap<PidKind, Option<String>>,
}

impl RepositoryDescriptor {
    pub fn rule_set(&self, kind: PidKind) -> Option<&RuleSet> {
        match kind {
            PidKind::Doi => self.doi.as_ref(),
            PidKind::Hdl => self.hdl.as_ref(),
            PidKind::Url => self.url.as_ref(),
        }
    }

    pub fn api_base(&self) -> &str {
        self.api.as_ref().map(|api| api.base.as_str()).unwrap_or("")
    }

    pub fn parser_format(&self) -> ParserFormat {
        self.parser.format()
    }

    /// Whether this repository claims `pid`.
    ///
    /// Handles and DOIs match on their repository id; URLs match when the
    /// scheme-less `host_netloc` occurs in the scheme-less PID, or the PID's
    /// host occurs in `host_netloc`.
    pub fn matches(&self, pid: &Pid) -> bool {
        match pid {
            Pid::Doi(_) | Pid::Hdl(_) => self
                .rule_set(pid.kind())
                .map(|rules| rules.accepts(pid.repo_id()))
                .unwrap_or(false),
            Pid::Url(url) => {
                let netloc = strip_scheme(&self.host_netloc);
                if netloc.is_empty() {
                    return false;
                }
                strip_scheme(&pid.resolvable()).contains(netloc)
                    || netloc.contains(url.host_netloc())
            }
        }
    }

    /// Headers for a request whose target is of kind `kind`.
    ///
    /// Per-kind headers win, then the CMDI accept header, then the API headers.
    pub fn headers_for(&self, kind: PidKind) -> Headers {
        if let Some(headers) = self.rule_set(kind).and_then(|rules| rules.headers.as_ref()) {
            return headers.clone();
        }
        if self.parser_format() == ParserFormat::Cmdi {
            let mut headers = Headers::new();
            headers.insert("Accept".to_string(), "application/x-cmdi+xml".to_string());
            return headers;
        }
        self.api
            .as_ref()
            .and_then(|api| api.headers.clone())
            .unwrap_or_default()
    }

    pub fn test_example(&self, kind: PidKind) -> Option<&str> {
        self.test_examples
            .get(&kind)
            .and_then(|example| example.as_deref())
            .filter(|example| !example.is_empty())
    }

    /// Upper-case `$NAME` placeholders used by the request templates
    pub fn secret_placeholders(&self) -> Vec<String> {
        let mut templates: Vec<&str> = PidKind::all()
            .iter()
            .filter_map(|kind| self.rule_set(*kind))
            .filter_map(|rules| rules.format.as_deref())
            .collect();
        templates.push(self.api_base());

        let mut names: Vec<String> = templates
            .iter()
            .flat_map(|template| SECRET_PLACEHOLDER.captures_iter(template))
            .map(|captures| captures[1].to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn summary(&self) -> RepositorySummary {
        RepositorySummary {
            name: self.name.clone(),
            host_name: self.host_name.clone(),
            host_netloc: self.host_netloc.clone(),
        }
    }
}

fn strip_scheme(value: &str) -> &str {
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(json: &str) -> RepositoryDescriptor {
        serde_json::from_str(json).unwrap()
    }

    fn lindat() -> RepositoryDescriptor {
        descriptor(
            r#"{
                "id": "lindat",
                "name": "LINDAT/CLARIAH-CZ",
                "host_name": "LINDAT",
                "host_netloc": "https://lindat.mff.cuni.cz",
                "hdl": {"id": ["11234", "11372"], "format": "$hdl@format=cmdi"},
                "url": {"format": "$url"},
                "parser": {"type": "cmdi", "config": {"reverse_pid": "//cmd:MdSelfLink"}},
                "test_examples": {"hdl": "hdl:11372/LRT-1478", "doi": null}
            }"#,
        )
    }

    #[test]
    fn test_matches_handle_list() {
        let repo = lindat();
        assert!(repo.matches(&Pid::classify("hdl:11372/LRT-1478").unwrap()));
        assert!(repo.matches(&Pid::classify("https://hdl.handle.net/11234/1-3105").unwrap()));
        assert!(!repo.matches(&Pid::classify("hdl:21.11115/0000-000C").unwrap()));
    }

    #[test]
    fn test_matches_doi_single_id() {
        let repo = descriptor(
            r#"{"id": "zenodo", "host_netloc": "zenodo.org",
                "doi": {"id": "10.5281", "format": "$doi"},
                "parser": {"type": "json"}}"#,
        );
        assert!(repo.matches(&Pid::classify("10.5281/zenodo.7024").unwrap()));
        assert!(!repo.matches(&Pid::classify("10.52810/zenodo.7024").unwrap()));
        // a handle with the same authority, but no hdl rules
        assert!(!repo.matches(&Pid::classify("hdl:11372/LRT-1").unwrap()));
    }

    #[test]
    fn test_matches_url_by_netloc() {
        let repo = lindat();
        assert!(repo.matches(&Pid::classify("https://lindat.mff.cuni.cz/repository/item/1").unwrap()));
        assert!(repo.matches(&Pid::classify("http://lindat.mff.cuni.cz/x").unwrap()));
        assert!(!repo.matches(&Pid::classify("https://zenodo.org/record/1").unwrap()));

        let no_netloc = descriptor(r#"{"id": "x", "parser": {"type": "json"}}"#);
        assert!(!no_netloc.matches(&Pid::classify("https://zenodo.org/record/1").unwrap()));
    }

    #[test]
    fn test_headers_precedence() {
        let repo = lindat();
        assert_eq!(
            repo.headers_for(PidKind::Hdl).get("Accept").map(String::as_str),
            Some("application/x-cmdi+xml")
        );

        let json_repo = descriptor(
            r#"{"id": "z", "doi": {"id": "10.5281", "format": "$api/$record_id",
                    "headers": {"Accept": "application/vnd.zenodo.v1+json"}},
                "api": {"base": "https://zenodo.org/api", "headers": {"Accept": "application/json"}},
                "parser": {"type": "json"}}"#,
        );
        assert_eq!(
            json_repo.headers_for(PidKind::Doi).get("Accept").map(String::as_str),
            Some("application/vnd.zenodo.v1+json")
        );
        assert_eq!(
            json_repo.headers_for(PidKind::Url).get("Accept").map(String::as_str),
            Some("application/json")
        );

        let bare = descriptor(r#"{"id": "x", "parser": {"type": "json"}}"#);
        assert!(bare.headers_for(PidKind::Hdl).is_empty());
    }

    #[test]
    fn test_regex_requires_record_id_group() {
        let err = serde_json::from_str::<RepositoryDescriptor>(
            r#"{"id": "x", "url": {"format": "$api", "regex": "https://a.org/(.*)"},
                "parser": {"type": "json"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("record_id"));

        let err = serde_json::from_str::<RepositoryDescriptor>(
            r#"{"id": "x", "url": {"regex": "(?P<record_id>["}, "parser": {"type": "json"}}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_parser_path_is_rejected() {
        let err = serde_json::from_str::<RepositoryDescriptor>(
            r#"{"id": "x", "parser": {"type": "xml", "config": {"description": "//a["}}}"#,
        );
        assert!(err.is_err());

        let err = serde_json::from_str::<RepositoryDescriptor>(
            r#"{"id": "x", "parser": {"type": "yaml"}}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_test_examples() {
        let repo = lindat();
        assert_eq!(repo.test_example(PidKind::Hdl), Some("hdl:11372/LRT-1478"));
        assert_eq!(repo.test_example(PidKind::Doi), None);
        assert_eq!(repo.test_example(PidKind::Url), None);
    }

    #[test]
    fn test_secret_placeholders() {
        let repo = descriptor(
            r#"{"id": "europeana", "url": {"format": "$api/$record_id.json?wskey=$EUROPEANA_WSKEY",
                "regex": "https?://www.europeana.eu/item/(?P<record_id>.+)"},
                "api": {"base": "https://api.europeana.eu/record/v2"},
                "parser": {"type": "json"}}"#,
        );
        assert_eq!(repo.secret_placeholders(), vec!["EUROPEANA_WSKEY"]);
        assert!(lindat().secret_placeholders().is_empty());
    }

    #[test]
    fn test_summary() {
        let summary = lindat().summary();
        assert_eq!(summary.name, "LINDAT/CLARIAH-CZ");
        assert_eq!(summary.host_name, "LINDAT");
        assert_eq!(summary.host_netloc, "https://lindat.mff.cuni.cz");
    }
}
