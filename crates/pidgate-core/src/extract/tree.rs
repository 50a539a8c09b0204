//! Tree-path extraction for JSON payloads
//!
//! Paths are `/`-delimited key sequences such as `metadata/files`.
//! [`traverse`] follows a path literally; [`fetch_all`] collects every value
//! reachable by the path, descending through arrays at any depth.

use serde_json::Value;

use super::{curate_resource, Extract, FetchResult, IdentifyResult, ParserConfig};
use super::{ReferencedResource, ReferencedResources};
use crate::error::ExtractError;

/// Resource type used for the single group produced by this backend
pub const TREE_RESOURCE_TYPE: &str = "NA";

#[derive(Debug, Clone)]
pub struct TreeExtractor {
    config: ParserConfig,
}

impl TreeExtractor {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn parse_resources(&self, tree: &Value) -> Vec<ReferencedResources> {
        if self.config.ref_file.path.is_empty() {
            return Vec::new();
        }

        let root = if self.config.items_root.is_empty() {
            Some(tree)
        } else {
            traverse(tree, &self.config.items_root)
        };
        let Some(root) = root else {
            tracing::debug!("items root {} not present", self.config.items_root);
            return Vec::new();
        };

        let resource_format = self.config.ref_file.resource_format.as_deref();
        let resources: Vec<ReferencedResource> = fetch_strings(root, &self.config.ref_file.path)
            .iter()
            .map(|raw| ReferencedResource {
                pid: curate_resource(raw, resource_format),
                data_type: String::new(),
            })
            .collect();

        vec![ReferencedResources {
            resource_type: TREE_RESOURCE_TYPE.to_string(),
            ref_resources: resources,
        }]
    }

    fn joined(&self, tree: &Value, path: &str, separator: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        fetch_strings(tree, path).join(separator)
    }

    fn title(&self, tree: &Value) -> String {
        self.joined(tree, &self.config.collection_title, "\n")
    }

    fn description(&self, tree: &Value) -> String {
        self.joined(tree, &self.config.description, "\n")
    }

    fn license(&self, tree: &Value) -> String {
        self.joined(tree, &self.config.license, ", ")
    }

    fn reverse_pid(&self, tree: &Value) -> String {
        if self.config.reverse_pid.is_empty() {
            return String::new();
        }
        fetch_strings(tree, &self.config.reverse_pid)
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}

impl Extract for TreeExtractor {
    fn fetch(&self, payload: &str) -> Result<FetchResult, ExtractError> {
        let tree: Value = serde_json::from_str(payload)?;
        Ok(FetchResult {
            title: self.title(&tree),
            description: self.description(&tree),
            license: self.license(&tree),
            ref_files: self.parse_resources(&tree),
        })
    }

    fn identify(&self, payload: &str) -> Result<IdentifyResult, ExtractError> {
        let tree: Value = serde_json::from_str(payload)?;
        Ok(IdentifyResult {
            item_title: self.title(&tree),
            description: self.description(&tree),
            reverse_pid: self.reverse_pid(&tree),
        })
    }
}

fn path_keys(path: &str) -> Vec<&str> {
    path.split('/').filter(|key| !key.is_empty()).collect()
}

/// Follow `path` key by key; `None` if any key is absent
pub fn traverse<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    path_keys(path)
        .into_iter()
        .try_fold(tree, |node, key| node.get(key))
}

/// Every value reached by `path`, in document order.
///
/// Within an object only the key matching the next path segment is followed;
/// arrays are searched element by element with the same remaining path.
pub fn fetch_all<'a>(tree: &'a Value, path: &str) -> Vec<&'a Value> {
    let keys = path_keys(path);
    let mut found = Vec::new();
    if !keys.is_empty() {
        collect(tree, &keys, &mut found);
    }
    found
}

fn collect<'a>(node: &'a Value, keys: &[&str], found: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if key != keys[0] {
                    continue;
                }
                if keys.len() == 1 {
                    found.push(value);
                } else {
                    collect(value, &keys[1..], found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, keys, found);
            }
        }
        _ => {}
    }
}

/// Like [`fetch_all`], flattened to strings.
///
/// Arrays are flattened, scalars stringified, objects and nulls skipped.
pub fn fetch_strings(tree: &Value, path: &str) -> Vec<String> {
    let mut strings = Vec::new();
    for value in fetch_all(tree, path) {
        flatten_into(value, &mut strings);
    }
    strings
}

fn flatten_into(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|item| flatten_into(item, out)),
        Value::Object(_) | Value::Null => {}
    }
}
