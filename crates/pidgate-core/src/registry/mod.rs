//! Registry of repository descriptors
//!
//! The registry is built once and then only read. Its order matters: when
//! several repositories claim the same identifier namespace they are probed
//! in registry order and the first confirmed one wins.

mod descriptor;

pub use descriptor::*;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;

use pidgate_identifiers::Pid;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    repositories: Vec<RepositoryDescriptor>,
}

impl Registry {
    /// Build from descriptors in the given order; ids must be unique and non-empty
    pub fn from_descriptors(repositories: Vec<RepositoryDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for repository in &repositories {
            if repository.id.trim().is_empty() {
                return Err(ConfigError::EmptyId {
                    origin: repository.name.clone(),
                });
            }
            if !seen.insert(repository.id.as_str()) {
                return Err(ConfigError::DuplicateId(repository.id.clone()));
            }
        }
        Ok(Self { repositories })
    }

    /// Parse one descriptor document, bare or wrapped in `{"repository": {...}}`
    pub fn parse_descriptor(text: &str, origin: &str) -> Result<RepositoryDescriptor, ConfigError> {
        let wrap = |source| ConfigError::Descriptor {
            origin: origin.to_string(),
            source,
        };
        let value: Value = serde_json::from_str(text).map_err(wrap)?;
        Self::descriptor_from_value(value).map_err(wrap)
    }

    fn descriptor_from_value(mut value: Value) -> Result<RepositoryDescriptor, serde_json::Error> {
        if let Some(inner) = value.get_mut("repository").map(Value::take) {
            value = inner;
        }
        serde_json::from_value(value)
    }

    /// Parse a JSON array of descriptor documents, or a single document
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let wrap = |source| ConfigError::Descriptor {
            origin: "<inline>".to_string(),
            source,
        };
        let value: Value = serde_json::from_str(text).map_err(wrap)?;
        let repositories = match value {
            Value::Array(items) => items
                .into_iter()
                .map(Self::descriptor_from_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(wrap)?,
            single => vec![Self::descriptor_from_value(single).map_err(wrap)?],
        };
        Self::from_descriptors(repositories)
    }

    /// Load every `*.json` file in `dir`, in lexical file-name order
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let io_error = |path: &Path, source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
            let path = entry.map_err(|e| io_error(dir, e))?.path();
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut repositories = Vec::with_capacity(paths.len());
        for path in &paths {
            let text = fs::read_to_string(path).map_err(|e| io_error(path.as_path(), e))?;
            repositories.push(Self::parse_descriptor(&text, &path.display().to_string())?);
        }

        tracing::info!(
            "Loaded {} repository descriptors from {}",
            repositories.len(),
            dir.display()
        );
        Self::from_descriptors(repositories)
    }

    pub fn repositories(&self) -> &[RepositoryDescriptor] {
        &self.repositories
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepositoryDescriptor> {
        self.repositories.iter()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Every repository claiming `pid`, in registry order
    pub fn match_candidates(&self, pid: &Pid) -> Vec<&RepositoryDescriptor> {
        self.repositories
            .iter()
            .filter(|repository| repository.matches(pid))
            .collect()
    }

    pub fn by_id(&self, id: &str) -> Option<&RepositoryDescriptor> {
        self.repositories.iter().find(|repository| repository.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&RepositoryDescriptor> {
        self.repositories
            .iter()
            .find(|repository| repository.name == name)
    }

    /// Summaries of all repositories, sorted by host name
    pub fn repositories_by_host(&self) -> Vec<RepositorySummary> {
        let mut summaries: Vec<RepositorySummary> = self
            .repositories
            .iter()
            .map(RepositoryDescriptor::summary)
            .collect();
        summaries.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        summaries
    }
}
