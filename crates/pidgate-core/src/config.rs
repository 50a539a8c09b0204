//! Resolver configuration and secrets

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::registry::Registry;

/// Options for [`crate::Resolver`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Try a signposted metadata link before the repository's own request rules
    pub signposting: bool,
    /// Upper bound on `redirect` hops while building a request
    pub max_redirect_hops: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            signposting: true,
            max_redirect_hops: 5,
        }
    }
}

/// Named values substituted for `$NAME` placeholders in request templates.
///
/// Values never appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read every secret referenced by `registry` from the environment.
    ///
    /// Entries in `overrides` win over the environment. Secrets found in
    /// neither place are reported and left unresolved.
    pub fn from_env_for(registry: &Registry, overrides: Secrets) -> Self {
        let mut secrets = overrides;
        let mut referenced: Vec<String> = registry
            .iter()
            .flat_map(|repository| repository.secret_placeholders())
            .collect();
        referenced.sort();
        referenced.dedup();

        for name in referenced {
            if secrets.get(&name).is_some() {
                continue;
            }
            match std::env::var(&name) {
                Ok(value) => secrets.insert(name, value),
                Err(_) => tracing::warn!(
                    "Secret {} is not set; requests that use it will carry the placeholder",
                    name
                ),
            }
        }
        secrets
    }

    /// Replace every `$NAME` with its value, longest names first
    pub fn substitute(&self, template: &str) -> String {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut result = template.to_string();
        for name in names {
            result = result.replace(&format!("${}", name), &self.values[name]);
        }
        result
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|name| (name, "***")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut secrets = Secrets::new();
        for (name, value) in iter {
            secrets.insert(name, value);
        }
        secrets
    }
}
