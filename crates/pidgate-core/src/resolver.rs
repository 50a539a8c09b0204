//! PID resolution
//!
//! The [`Resolver`] ties the pieces together: classify the input, find the
//! repository hosting it (probing over HTTP when several claim it), try a
//! signposted description, fall back to the repository's own request rules,
//! and hand the payload to the repository's extraction backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use pidgate_identifiers::{Pid, PidKind};

use crate::config::{ResolverOptions, Secrets};
use crate::error::{ExtractError, ResolveResult};
use crate::extract::{Extract, Extractor, FetchResult, IdentifyResult, ParserFormat};
use crate::http::{Headers, Transport};
use crate::registry::{Registry, RepositoryDescriptor};
use crate::request::RequestBuilder;
use crate::signpost;

/// Input accepted wherever the resolver takes a PID: raw strings or
/// already classified identifiers.
pub trait ToPid {
    /// `None` when the input is not a persistent identifier
    fn to_pid(&self) -> Option<Pid>;
}

impl ToPid for str {
    fn to_pid(&self) -> Option<Pid> {
        Pid::classify(self)
    }
}

impl ToPid for String {
    fn to_pid(&self) -> Option<Pid> {
        Pid::classify(self)
    }
}

impl ToPid for Pid {
    fn to_pid(&self) -> Option<Pid> {
        Some(self.clone())
    }
}

/// Outcome of a repository self-test for one PID kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryStatus {
    /// No test example is configured for the kind
    NotAvailable,
    Success,
    Failed(String),
}

impl RepositoryStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RepositoryStatus::Success)
    }
}

/// Resolves PIDs against a registry over a [`Transport`].
///
/// The resolver holds no mutable state; one instance can serve concurrent
/// resolutions as long as the transport can.
pub struct Resolver {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    secrets: Secrets,
    options: ResolverOptions,
    signpost_extractor: Extractor,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            secrets: Secrets::new(),
            options: ResolverOptions::default(),
            signpost_extractor: Extractor::signposting(),
        }
    }

    /// Resolver over the reqwest transport
    #[cfg(feature = "native")]
    pub fn native(
        registry: Arc<Registry>,
        config: &crate::http::TransportConfig,
    ) -> Result<Self, crate::http::HttpError> {
        let client = crate::http::HttpClient::new(config)?;
        Ok(Self::new(registry, Arc::new(client)))
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    fn request_builder(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(
            self.transport.as_ref(),
            &self.secrets,
            self.options.max_redirect_hops,
        )
    }

    pub fn is_pid<P: ToPid + ?Sized>(&self, pid: &P) -> bool {
        pid.to_pid().is_some()
    }

    /// Every repository claiming `pid`, without conflict resolution
    pub fn sniff_candidates<P: ToPid + ?Sized>(&self, pid: &P) -> Vec<&RepositoryDescriptor> {
        match pid.to_pid() {
            Some(pid) => self.registry.match_candidates(&pid),
            None => Vec::new(),
        }
    }

    /// The repository hosting `pid`.
    ///
    /// A single candidate is returned without any network traffic. Several
    /// candidates are probed in registry order.
    pub async fn sniff<P: ToPid + ?Sized>(
        &self,
        pid: &P,
    ) -> ResolveResult<Option<&RepositoryDescriptor>> {
        match pid.to_pid() {
            Some(pid) => self.match_repository(&pid).await,
            None => Ok(None),
        }
    }

    pub async fn is_host_registered<P: ToPid + ?Sized>(&self, pid: &P) -> ResolveResult<bool> {
        Ok(self.sniff(pid).await?.is_some())
    }

    /// Collection metadata for `pid`; `None` when it is not a PID or no
    /// repository hosts it
    pub async fn fetch<P: ToPid + ?Sized>(&self, pid: &P) -> ResolveResult<Option<FetchResult>> {
        let Some(pid) = pid.to_pid() else {
            return Ok(None);
        };
        let Some(repository) = self.match_repository(&pid).await? else {
            return Ok(None);
        };
        self.extract(repository, &pid, |extractor, payload| extractor.fetch(payload))
            .await
            .map(Some)
    }

    /// Title, description and reverse PID of the collection behind `pid`
    pub async fn identify<P: ToPid + ?Sized>(
        &self,
        pid: &P,
    ) -> ResolveResult<Option<IdentifyResult>> {
        let Some(pid) = pid.to_pid() else {
            return Ok(None);
        };
        let Some(repository) = self.match_repository(&pid).await? else {
            return Ok(None);
        };
        self.extract(repository, &pid, |extractor, payload| extractor.identify(payload))
            .await
            .map(Some)
    }

    /// Whether `pid` answers with `Content-Disposition: attachment`
    pub async fn is_downloadable<P: ToPid + ?Sized>(&self, pid: &P) -> ResolveResult<bool> {
        let Some(pid) = pid.to_pid() else {
            return Ok(false);
        };
        let repository = self.match_repository(&pid).await?;
        self.downloadable(repository, &pid).await
    }

    /// Whether `pid` is a collection in a registered repository: hosted,
    /// not itself a download, and with non-empty metadata
    pub async fn is_collection<P: ToPid + ?Sized>(&self, pid: &P) -> ResolveResult<bool> {
        let Some(pid) = pid.to_pid() else {
            return Ok(false);
        };
        let Some(repository) = self.match_repository(&pid).await? else {
            return Ok(false);
        };
        if self.downloadable(Some(repository), &pid).await? {
            return Ok(false);
        }
        let result = self
            .extract(repository, &pid, |extractor, payload| extractor.fetch(payload))
            .await?;
        Ok(!result.is_empty())
    }

    /// Fetch each of the repository's test examples
    pub async fn repository_status(
        &self,
        repository: &RepositoryDescriptor,
    ) -> BTreeMap<PidKind, RepositoryStatus> {
        let mut status = BTreeMap::new();
        for kind in PidKind::all() {
            let outcome = match repository.test_example(*kind) {
                None => RepositoryStatus::NotAvailable,
                Some(example) => match self.fetch(example).await {
                    Ok(Some(_)) => RepositoryStatus::Success,
                    Ok(None) => RepositoryStatus::Failed(format!(
                        "{} is not resolved by any repository",
                        example
                    )),
                    Err(e) => RepositoryStatus::Failed(e.to_string()),
                },
            };
            if let RepositoryStatus::Failed(message) = &outcome {
                tracing::warn!("{}: {} self-test failed: {}", repository.id, kind, message);
            }
            status.insert(*kind, outcome);
        }
        status
    }

    /// [`Self::repository_status`] for every registered repository, keyed by id
    pub async fn all_repositories_status(
        &self,
    ) -> BTreeMap<String, BTreeMap<PidKind, RepositoryStatus>> {
        let mut report = BTreeMap::new();
        for repository in self.registry.iter() {
            report.insert(
                repository.id.clone(),
                self.repository_status(repository).await,
            );
        }
        report
    }

    async fn match_repository(&self, pid: &Pid) -> ResolveResult<Option<&RepositoryDescriptor>> {
        let candidates = self.registry.match_candidates(pid);
        match candidates.len() {
            0 => {
                tracing::debug!("No repository claims {}", pid);
                Ok(None)
            }
            1 => Ok(candidates.into_iter().next()),
            n => {
                tracing::debug!("{} repositories claim {}, probing", n, pid);
                self.resolve_conflict(pid, candidates).await
            }
        }
    }

    /// First candidate whose request lands on a URL it claims
    async fn resolve_conflict<'r>(
        &'r self,
        pid: &Pid,
        candidates: Vec<&'r RepositoryDescriptor>,
    ) -> ResolveResult<Option<&'r RepositoryDescriptor>> {
        let builder = self.request_builder();

        for candidate in candidates {
            let request = match builder.build(candidate, pid).await {
                Ok(request) => request,
                Err(e) if e.is_missing_configuration() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("Skipping {} for {}: {}", candidate.id, pid, e);
                    continue;
                }
            };

            let response = match self.transport.get(&request.url, &request.headers, true).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("Skipping {} for {}: {}", candidate.id, pid, e);
                    continue;
                }
            };

            match Pid::classify(&response.effective_url) {
                Some(effective) if candidate.matches(&effective) => {
                    tracing::info!("{} resolved to repository {}", pid, candidate.id);
                    return Ok(Some(candidate));
                }
                _ => tracing::debug!(
                    "{} landed on {}, not hosted by {}",
                    pid,
                    response.effective_url,
                    candidate.id
                ),
            }
        }

        tracing::debug!("No candidate confirmed {}", pid);
        Ok(None)
    }

    async fn downloadable(
        &self,
        repository: Option<&RepositoryDescriptor>,
        pid: &Pid,
    ) -> ResolveResult<bool> {
        let headers = match repository {
            Some(repository) => repository.headers_for(pid.kind()),
            None => Headers::new(),
        };
        let response = self
            .transport
            .head(&pid.resolvable(), &headers, true)
            .await?;

        Ok(response
            .header("content-disposition")
            .map(|value| {
                value
                    .trim_start()
                    .get(..10)
                    .map(|kind| kind.eq_ignore_ascii_case("attachment"))
                    .unwrap_or(false)
            })
            .unwrap_or(false))
    }

    /// Run `op` on the signposted description when there is one, otherwise
    /// on the payload of the repository's own request
    async fn extract<T, F>(
        &self,
        repository: &RepositoryDescriptor,
        pid: &Pid,
        op: F,
    ) -> ResolveResult<T>
    where
        F: Fn(&Extractor, &str) -> Result<T, ExtractError>,
    {
        if self.options.signposting {
            if let Some(payload) = self.signposted_payload(pid).await {
                let extractor = match repository.parser_format() {
                    ParserFormat::Signpost => repository.parser.extractor(),
                    _ => &self.signpost_extractor,
                };
                match op(extractor, &payload) {
                    Ok(result) => return Ok(result),
                    Err(e) => tracing::debug!(
                        "Signposted metadata of {} unusable, falling back: {}",
                        pid,
                        e
                    ),
                }
            }
        }

        let request = self.request_builder().build(repository, pid).await?;
        let response = self
            .transport
            .get(&request.url, &request.headers, true)
            .await?;
        Ok(op(repository.parser.extractor(), &response.body)?)
    }

    async fn signposted_payload(&self, pid: &Pid) -> Option<String> {
        let link = signpost::discover(self.transport.as_ref(), pid).await?;
        match self.transport.get(&link, &Headers::new(), true).await {
            Ok(response) => Some(response.body),
            Err(e) => {
                tracing::debug!("Signposted metadata of {} unavailable: {}", pid, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("repositories", &self.registry.len())
            .field("secrets", &self.secrets)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_pid_inputs() {
        assert!("hdl:11372/LRT-1478".to_pid().is_some());
        assert!(String::from("10.5281/zenodo.7024").to_pid().is_some());
        assert!("not a pid".to_pid().is_none());

        let pid = Pid::classify("https://zenodo.org/records/1").unwrap();
        assert_eq!(pid.to_pid(), Some(pid.clone()));
    }

    #[test]
    fn test_repository_status_is_success() {
        assert!(RepositoryStatus::Success.is_success());
        assert!(!RepositoryStatus::NotAvailable.is_success());
        assert!(!RepositoryStatus::Failed("404".to_string()).is_success());
    }
}
