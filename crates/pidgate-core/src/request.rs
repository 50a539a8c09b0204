//! Metadata request construction
//!
//! [`plan`] is pure: it either produces the final request or asks for the
//! PID to be followed first (the `redirect` template). [`RequestBuilder`]
//! drives that loop over a [`Transport`], bounded by a hop limit.

use regex::Regex;

use pidgate_identifiers::{Pid, PidKind};

use crate::config::Secrets;
use crate::error::RequestBuildError;
use crate::extract::ParserFormat;
use crate::http::{Headers, Transport};
use crate::registry::RepositoryDescriptor;

/// An outbound metadata request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltRequest {
    pub url: String,
    pub headers: Headers,
}

/// Outcome of a single planning step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPlan {
    Ready(BuiltRequest),
    /// GET `url` with redirects and plan again for the effective URL
    FollowRedirect { url: String, headers: Headers },
}

/// Plan the request for `pid` against `repository`.
///
/// Strategies, first applicable wins: direct CMDI retrieval, the `redirect`
/// sentinel, regex extraction of a record id, and plain template substitution.
pub fn plan(
    repository: &RepositoryDescriptor,
    pid: &Pid,
    secrets: &Secrets,
) -> Result<RequestPlan, RequestBuildError> {
    let kind = pid.kind();
    let rules = repository
        .rule_set(kind)
        .ok_or_else(|| RequestBuildError::MissingRules {
            repository: repository.id.clone(),
            kind,
        })?;
    let resolvable = pid.resolvable();

    // CMDI repositories serve metadata by content negotiation on the PID itself
    if repository.parser_format() == ParserFormat::Cmdi && !rules.is_redirect() {
        if let Some(template) = rules.format.as_deref() {
            if kind != PidKind::Url || rules.regex.is_none() {
                let url = template.replace(kind.placeholder(), &resolvable);
                return Ok(RequestPlan::Ready(finish(repository, kind, &url, secrets)));
            }
        }
    }

    if rules.is_redirect() {
        return Ok(RequestPlan::FollowRedirect {
            url: resolvable,
            headers: repository.headers_for(kind),
        });
    }

    let template = rules
        .format
        .as_deref()
        .ok_or_else(|| RequestBuildError::MissingTemplate {
            repository: repository.id.clone(),
            kind,
        })?;

    let url = match &rules.regex {
        Some(regex) => {
            let record_id = record_id(regex, &resolvable).ok_or_else(|| {
                RequestBuildError::RecordIdNotFound {
                    repository: repository.id.clone(),
                    resolvable: resolvable.clone(),
                }
            })?;
            template
                .replace("$api", repository.api_base())
                .replace("$record_id", &record_id)
                .replace(kind.placeholder(), &resolvable)
        }
        None => template.replace(kind.placeholder(), &resolvable),
    };

    Ok(RequestPlan::Ready(finish(repository, kind, &url, secrets)))
}

/// The `record_id` group of a match anchored at the start of `resolvable`
fn record_id(regex: &Regex, resolvable: &str) -> Option<String> {
    let captures = regex.captures(resolvable)?;
    if captures.get(0)?.start() != 0 {
        return None;
    }
    captures.name("record_id").map(|m| m.as_str().to_string())
}

/// Substitute secrets and pick headers by the kind of the final URL
fn finish(repository: &RepositoryDescriptor, kind: PidKind, url: &str, secrets: &Secrets) -> BuiltRequest {
    let url = secrets.substitute(url);
    let target_kind = Pid::classify(&url).map(|target| target.kind()).unwrap_or(kind);
    BuiltRequest {
        headers: repository.headers_for(target_kind),
        url,
    }
}

/// Builds requests, following `redirect` templates over a transport
pub struct RequestBuilder<'a> {
    transport: &'a dyn Transport,
    secrets: &'a Secrets,
    max_redirect_hops: usize,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(transport: &'a dyn Transport, secrets: &'a Secrets, max_redirect_hops: usize) -> Self {
        Self {
            transport,
            secrets,
            max_redirect_hops,
        }
    }

    pub async fn build(
        &self,
        repository: &RepositoryDescriptor,
        pid: &Pid,
    ) -> Result<BuiltRequest, RequestBuildError> {
        let mut current = pid.clone();
        let mut hops = 0;

        loop {
            match plan(repository, &current, self.secrets)? {
                RequestPlan::Ready(request) => {
                    tracing::debug!("{}: request for {} is {}", repository.id, pid, request.url);
                    return Ok(request);
                }
                RequestPlan::FollowRedirect { url, headers } => {
                    if hops >= self.max_redirect_hops {
                        return Err(RequestBuildError::TooManyRedirects(self.max_redirect_hops));
                    }
                    hops += 1;

                    let response = self.transport.get(&url, &headers, true).await?;
                    current = Pid::classify(&response.effective_url).ok_or_else(|| {
                        RequestBuildError::RedirectNotAPid(response.effective_url.clone())
                    })?;
                    tracing::debug!(
                        "{}: {} redirected to {} (hop {})",
                        repository.id,
                        url,
                        current,
                        hops
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpError, HttpResponse};
    use crate::registry::Registry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn repository(json: &str) -> RepositoryDescriptor {
        Registry::parse_descriptor(json, "test").unwrap()
    }

    fn ready(plan: RequestPlan) -> BuiltRequest {
        match plan {
            RequestPlan::Ready(request) => request,
            other => panic!("expected a ready request, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_strategy() {
        let repo = repository(
            r#"{"id": "r", "hdl": {"id": "11304", "format": "$hdl?format=json"}, "parser": {"type": "json"}}"#,
        );
        let pid = Pid::classify("hdl:11304/abc").unwrap();
        let request = ready(plan(&repo, &pid, &Secrets::new()).unwrap());
        assert_eq!(request.url, "https://hdl.handle.net/11304/abc?format=json");
    }

    #[test]
    fn test_regex_strategy_with_api_and_secret() {
        let repo = repository(
            r#"{"id": "europeana",
                "url": {"format": "$api/$record_id.json?wskey=$EUROPEANA_WSKEY",
                        "regex": "https?://www.europeana.eu/item/(?P<record_id>[^?]+)"},
                "api": {"base": "https://api.europeana.eu/record/v2",
                        "headers": {"Accept": "application/json"}},
                "parser": {"type": "json"}}"#,
        );
        let pid = Pid::classify("https://www.europeana.eu/item/2048128/618580").unwrap();
        let secrets: Secrets = [("EUROPEANA_WSKEY", "key")].into_iter().collect();

        let request = ready(plan(&repo, &pid, &secrets).unwrap());
        assert_eq!(
            request.url,
            "https://api.europeana.eu/record/v2/2048128/618580.json?wskey=key"
        );
        assert_eq!(request.headers.get("Accept").map(String::as_str), Some("application/json"));

        // unresolved secrets stay verbatim
        let request = ready(plan(&repo, &pid, &Secrets::new()).unwrap());
        assert!(request.url.ends_with("wskey=$EUROPEANA_WSKEY"));
    }

    #[test]
    fn test_regex_must_match_from_start() {
        let repo = repository(
            r#"{"id": "r", "url": {"format": "$api/$record_id",
                "regex": "item/(?P<record_id>\\d+)"}, "parser": {"type": "json"}}"#,
        );
        let pid = Pid::classify("https://repo.org/item/42").unwrap();
        let err = plan(&repo, &pid, &Secrets::new()).unwrap_err();
        assert!(matches!(err, RequestBuildError::RecordIdNotFound { .. }));
        assert!(!err.is_missing_configuration());
    }

    #[test]
    fn test_cmdi_short_circuit_ignores_regex_for_handles() {
        let repo = repository(
            r#"{"id": "lindat", "hdl": {"id": "11372", "format": "$hdl@format=cmdi",
                "regex": "nomatch(?P<record_id>.*)"}, "parser": {"type": "cmdi"}}"#,
        );
        let pid = Pid::classify("hdl:11372/LRT-1478").unwrap();
        let request = ready(plan(&repo, &pid, &Secrets::new()).unwrap());
        assert_eq!(request.url, "https://hdl.handle.net/11372/LRT-1478@format=cmdi");
        assert_eq!(
            request.headers.get("Accept").map(String::as_str),
            Some("application/x-cmdi+xml")
        );
    }

    #[test]
    fn test_missing_rules_and_template() {
        let repo = repository(
            r#"{"id": "r", "hdl": {"id": "11304"}, "parser": {"type": "json"}}"#,
        );
        let doi = Pid::classify("10.5281/zenodo.1").unwrap();
        let err = plan(&repo, &doi, &Secrets::new()).unwrap_err();
        assert!(matches!(err, RequestBuildError::MissingRules { kind: PidKind::Doi, .. }));
        assert!(err.is_missing_configuration());

        let hdl = Pid::classify("hdl:11304/abc").unwrap();
        let err = plan(&repo, &hdl, &Secrets::new()).unwrap_err();
        assert!(matches!(err, RequestBuildError::MissingTemplate { kind: PidKind::Hdl, .. }));
    }

    #[test]
    fn test_redirect_sentinel_plans_follow() {
        let repo = repository(
            r#"{"id": "b2share", "hdl": {"id": "11304", "format": "redirect"}, "parser": {"type": "json"}}"#,
        );
        let pid = Pid::classify("hdl:11304/abc").unwrap();
        match plan(&repo, &pid, &Secrets::new()).unwrap() {
            RequestPlan::FollowRedirect { url, .. } => {
                assert_eq!(url, "https://hdl.handle.net/11304/abc")
            }
            other => panic!("expected a redirect, got {:?}", other),
        }
    }

    /// Answers every GET by redirecting to a fixed URL
    struct Redirecting {
        target: String,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Redirecting {
        async fn get(
            &self,
            url: &str,
            _headers: &Headers,
            _follow_redirects: bool,
        ) -> Result<HttpResponse, HttpError> {
            self.calls.lock().unwrap().push(url.to_string());
            Ok(HttpResponse {
                effective_url: self.target.clone(),
                status: 200,
                ..Default::default()
            })
        }

        async fn head(
            &self,
            url: &str,
            headers: &Headers,
            follow_redirects: bool,
        ) -> Result<HttpResponse, HttpError> {
            self.get(url, headers, follow_redirects).await
        }
    }

    #[tokio::test]
    async fn test_builder_follows_redirect() {
        let repo = repository(
            r#"{"id": "b2share", "host_netloc": "b2share.eudat.eu",
                "hdl": {"id": "11304", "format": "redirect"},
                "url": {"format": "$api/$record_id",
                        "regex": "https://b2share.eudat.eu/records/(?P<record_id>\\w+)"},
                "api": {"base": "https://b2share.eudat.eu/api/records"},
                "parser": {"type": "json"}}"#,
        );
        let transport = Redirecting {
            target: "https://b2share.eudat.eu/records/abc123".to_string(),
            calls: Mutex::new(Vec::new()),
        };
        let secrets = Secrets::new();
        let builder = RequestBuilder::new(&transport, &secrets, 5);

        let pid = Pid::classify("hdl:11304/abc").unwrap();
        let request = builder.build(&repo, &pid).await.unwrap();
        assert_eq!(request.url, "https://b2share.eudat.eu/api/records/abc123");
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["https://hdl.handle.net/11304/abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_builder_fails_closed_on_redirect_loop() {
        let repo = repository(
            r#"{"id": "loop", "hdl": {"id": "11304", "format": "redirect"},
                "url": {"format": "redirect"}, "parser": {"type": "json"}}"#,
        );
        let transport = Redirecting {
            target: "https://loop.example.org/again".to_string(),
            calls: Mutex::new(Vec::new()),
        };
        let secrets = Secrets::new();
        let builder = RequestBuilder::new(&transport, &secrets, 3);

        let pid = Pid::classify("hdl:11304/abc").unwrap();
        let err = builder.build(&repo, &pid).await.unwrap_err();
        assert!(matches!(err, RequestBuildError::TooManyRedirects(3)));
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
    }
}
