//! Metadata extraction engine
//!
//! Two backends turn a raw payload plus declarative field paths into a
//! [`FetchResult`] or [`IdentifyResult`]:
//! - [`tree::TreeExtractor`] walks `/`-delimited key paths through JSON
//! - [`markup::MarkupExtractor`] evaluates XPath expressions over XML, CMDI or HTML
//!
//! Both are stateless once constructed.

pub mod markup;
pub mod tree;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use pidgate_identifiers::Pid;

use crate::error::ExtractError;
use markup::{MarkupExtractor, MarkupVariant};
use markup::xpath::XPathError;
use tree::TreeExtractor;

/// Payload format declared by a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserFormat {
    Json,
    Xml,
    Cmdi,
    Html,
    Signpost,
}

/// Field paths for a repository's parser.
///
/// Every key is optional; an empty path means the field is not extracted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Tree backend: root under which resources are searched
    pub items_root: String,
    pub ref_file: ResourcePaths,
    pub description: String,
    pub license: String,
    pub collection_title: String,
    pub reverse_pid: String,
    /// Markup backend: extra namespace bindings, lowest precedence
    pub nsmap: BTreeMap<String, String>,
    /// Markup backend: resource types substituted for `$resource_type`
    pub accept_resource_type: Option<Vec<String>>,
}

impl ParserConfig {
    /// Fill every empty path from `defaults`
    pub fn with_defaults(mut self, defaults: &ParserConfig) -> Self {
        fn fill(field: &mut String, default: &str) {
            if field.is_empty() {
                *field = default.to_string();
            }
        }
        fill(&mut self.items_root, &defaults.items_root);
        fill(&mut self.ref_file.path, &defaults.ref_file.path);
        fill(&mut self.description, &defaults.description);
        fill(&mut self.license, &defaults.license);
        fill(&mut self.collection_title, &defaults.collection_title);
        fill(&mut self.reverse_pid, &defaults.reverse_pid);
        self
    }

    /// schema.org / JSON-LD paths used for signposted metadata
    pub fn signpost_defaults() -> Self {
        Self {
            ref_file: ResourcePaths {
                path: "distribution/contentUrl".to_string(),
                ..Default::default()
            },
            description: "description".to_string(),
            license: "license".to_string(),
            collection_title: "name".to_string(),
            reverse_pid: "@id".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourcePaths {
    pub path: String,
    /// Wraps each resource; `$resource` is replaced by the extracted value
    pub resource_format: Option<String>,
    pub resource_root_path: Option<String>,
    pub resource_path: Option<String>,
    pub resource_type_path: Option<String>,
    pub data_type_path: Option<String>,
}

/// One resource referenced by a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedResource {
    pub pid: String,
    pub data_type: String,
}

/// Resources sharing a resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedResources {
    pub resource_type: String,
    pub ref_resources: Vec<ReferencedResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub title: String,
    pub description: String,
    pub license: String,
    pub ref_files: Vec<ReferencedResources>,
}

impl FetchResult {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.description.is_empty()
            && self.license.is_empty()
            && self.ref_files.iter().all(|group| group.ref_resources.is_empty())
    }

    /// All referenced resources, in group order
    pub fn resources(&self) -> impl Iterator<Item = &ReferencedResource> {
        self.ref_files
            .iter()
            .flat_map(|group| group.ref_resources.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub item_title: String,
    pub description: String,
    pub reverse_pid: String,
}

/// Common contract of the extraction backends
pub trait Extract {
    fn fetch(&self, payload: &str) -> Result<FetchResult, ExtractError>;
    fn identify(&self, payload: &str) -> Result<IdentifyResult, ExtractError>;
}

/// Backend selected by a repository's declared format
#[derive(Debug, Clone)]
pub enum Extractor {
    Tree(TreeExtractor),
    Markup(MarkupExtractor),
}

impl Extractor {
    /// Build and validate the backend for `format`
    pub fn new(format: ParserFormat, config: &ParserConfig) -> Result<Self, XPathError> {
        Ok(match format {
            ParserFormat::Json => Extractor::Tree(TreeExtractor::new(config.clone())),
            ParserFormat::Signpost => Extractor::Tree(TreeExtractor::new(
                config
                    .clone()
                    .with_defaults(&ParserConfig::signpost_defaults()),
            )),
            ParserFormat::Xml => {
                Extractor::Markup(MarkupExtractor::new(MarkupVariant::Xml, config)?)
            }
            ParserFormat::Cmdi => {
                Extractor::Markup(MarkupExtractor::new(MarkupVariant::Cmdi, config)?)
            }
            ParserFormat::Html => {
                Extractor::Markup(MarkupExtractor::new(MarkupVariant::Html, config)?)
            }
        })
    }

    /// Backend for payloads reached through a signpost link
    pub fn signposting() -> Self {
        Extractor::Tree(TreeExtractor::new(ParserConfig::signpost_defaults()))
    }
}

impl Extract for Extractor {
    fn fetch(&self, payload: &str) -> Result<FetchResult, ExtractError> {
        match self {
            Extractor::Tree(tree) => tree.fetch(payload),
            Extractor::Markup(markup) => markup.fetch(payload),
        }
    }

    fn identify(&self, payload: &str) -> Result<IdentifyResult, ExtractError> {
        match self {
            Extractor::Tree(tree) => tree.identify(payload),
            Extractor::Markup(markup) => markup.identify(payload),
        }
    }
}

/// Apply `resource_format`, then replace PIDs by their canonical form
pub(crate) fn curate_resource(raw: &str, resource_format: Option<&str>) -> String {
    let formatted = match resource_format {
        Some(template) => template.replace("$resource", raw),
        None => raw.to_string(),
    };
    match Pid::classify(&formatted) {
        Some(pid) => pid.to_string(),
        None => formatted,
    }
}
