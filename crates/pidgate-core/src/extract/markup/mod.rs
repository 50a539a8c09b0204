//! Path-expression extraction for XML, CMDI and HTML payloads

pub mod dom;
pub mod xpath;

use lazy_static::lazy_static;
use regex::Regex;

use super::{curate_resource, Extract, FetchResult, IdentifyResult, ParserConfig};
use super::{ReferencedResource, ReferencedResources};
use crate::error::ExtractError;
use dom::{Document, NodeId, XML_NAMESPACE};
use xpath::{Item, Namespaces, XPath, XPathError};

/// Resource types evaluated when the descriptor does not list its own
pub const DEFAULT_RESOURCE_TYPES: [&str; 5] = [
    "LandingPage",
    "Resource",
    "Metadata",
    "SearchPage",
    "SearchService",
];

/// Group name for resources whose type is not known
pub const UNKNOWN_RESOURCE_TYPE: &str = "Unknown";

const RESOURCE_TYPE_PLACEHOLDER: &str = "$resource_type";

const CMDI_RESOURCE_ROOT_PATH: &str = ".//cmd:ResourceProxy[cmd:ResourceType='$resource_type']";
const CMDI_RESOURCE_PATH: &str = "./cmd:ResourceRef/text()";
const CMDI_RESOURCE_TYPE_PATH: &str = "./cmd:ResourceType/text()";
const CMDI_DATA_TYPE_PATH: &str = "./cmd:ResourceType/@mimetype";

lazy_static! {
    static ref XMLNS_DECLARATION: Regex =
        Regex::new(r#"xmlns:(?P<prefix>\w+)="(?P<uri>[^"]*)""#).unwrap();
    static ref TRAILING_ATTRIBUTE: Regex =
        Regex::new(r"^(?P<base>.+)\[@(?P<attribute>[\w.\-]+(?::[\w.\-]+)?)\]$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupVariant {
    Xml,
    Cmdi,
    Html,
}

impl MarkupVariant {
    fn separator(&self) -> &'static str {
        match self {
            MarkupVariant::Html => "\n",
            MarkupVariant::Xml | MarkupVariant::Cmdi => ", ",
        }
    }
}

/// How referenced resources are located in a document
#[derive(Debug, Clone)]
enum ResourceQuery {
    None,
    /// One untyped group
    Flat(XPath),
    /// One query per accepted resource type
    PerType(Vec<(String, XPath)>),
    /// CMDI resource proxies, each read for a reference and a data type
    Proxies {
        roots: ProxyRoots,
        resource: XPath,
        data_type: XPath,
    },
}

#[derive(Debug, Clone)]
enum ProxyRoots {
    PerType(Vec<(String, XPath)>),
    /// Group by the value of the resource type path instead
    Untyped { root: XPath, resource_type: XPath },
}

#[derive(Debug, Clone)]
pub struct MarkupExtractor {
    variant: MarkupVariant,
    nsmap: Namespaces,
    title: Option<XPath>,
    description: Option<XPath>,
    license: Option<XPath>,
    reverse_pid: Option<XPath>,
    resources: ResourceQuery,
    resource_format: Option<String>,
}

impl MarkupExtractor {
    /// Compile every configured path; fails on the first invalid expression
    pub fn new(variant: MarkupVariant, config: &ParserConfig) -> Result<Self, XPathError> {
        let accepted: Vec<String> = match &config.accept_resource_type {
            Some(types) => types.clone(),
            None => DEFAULT_RESOURCE_TYPES.iter().map(|t| t.to_string()).collect(),
        };

        let resources = match variant {
            MarkupVariant::Cmdi => {
                let paths = &config.ref_file;
                let root_path = paths
                    .resource_root_path
                    .as_deref()
                    .unwrap_or(CMDI_RESOURCE_ROOT_PATH);
                let roots = if root_path.contains(RESOURCE_TYPE_PLACEHOLDER) {
                    ProxyRoots::PerType(compile_per_type(root_path, &accepted)?)
                } else {
                    ProxyRoots::Untyped {
                        root: XPath::compile(root_path)?,
                        resource_type: XPath::compile(
                            paths
                                .resource_type_path
                                .as_deref()
                                .unwrap_or(CMDI_RESOURCE_TYPE_PATH),
                        )?,
                    }
                };
                ResourceQuery::Proxies {
                    roots,
                    resource: XPath::compile(
                        paths.resource_path.as_deref().unwrap_or(CMDI_RESOURCE_PATH),
                    )?,
                    data_type: XPath::compile(
                        paths.data_type_path.as_deref().unwrap_or(CMDI_DATA_TYPE_PATH),
                    )?,
                }
            }
            _ => {
                let path = config.ref_file.path.as_str();
                if path.trim().is_empty() {
                    ResourceQuery::None
                } else if variant == MarkupVariant::Xml && path.contains(RESOURCE_TYPE_PLACEHOLDER)
                {
                    ResourceQuery::PerType(compile_per_type(path, &accepted)?)
                } else {
                    ResourceQuery::Flat(XPath::compile(path)?)
                }
            }
        };

        Ok(Self {
            variant,
            nsmap: config.nsmap.clone(),
            title: compile_field(&config.collection_title)?,
            description: compile_field(&config.description)?,
            license: compile_field(&config.license)?,
            reverse_pid: compile_field(&config.reverse_pid)?,
            resources,
            resource_format: config.ref_file.resource_format.clone(),
        })
    }

    pub fn variant(&self) -> MarkupVariant {
        self.variant
    }

    fn parse(&self, payload: &str) -> Result<Document, ExtractError> {
        match self.variant {
            MarkupVariant::Html => Ok(Document::parse_html(payload)),
            MarkupVariant::Xml | MarkupVariant::Cmdi => Document::parse_xml(payload),
        }
    }

    /// Configured bindings, then `xmlns:` declarations found in the raw text,
    /// then the root element's own scope, later sources overriding earlier ones.
    /// The reserved `xml` prefix cannot be rebound.
    fn namespaces(&self, payload: &str, doc: &Document) -> Namespaces {
        if self.variant == MarkupVariant::Html {
            return Namespaces::new();
        }

        let mut namespaces = self.nsmap.clone();
        for captures in XMLNS_DECLARATION.captures_iter(payload) {
            namespaces.insert(captures["prefix"].to_string(), captures["uri"].to_string());
        }

        let mut default_namespace = None;
        if let Some(root) = doc.document_element() {
            for (prefix, uri) in doc.in_scope_namespaces(root) {
                match prefix {
                    Some(prefix) => {
                        namespaces.insert(prefix, uri);
                    }
                    None => default_namespace = Some(uri),
                }
            }
        }

        if self.variant == MarkupVariant::Cmdi && !namespaces.contains_key("cmd") {
            if let Some(uri) = default_namespace {
                namespaces.insert("cmd".to_string(), uri);
            }
        }
        namespaces.insert("xml".to_string(), XML_NAMESPACE.to_string());
        namespaces
    }

    fn values(
        &self,
        query: &Option<XPath>,
        doc: &Document,
        namespaces: &Namespaces,
    ) -> Vec<String> {
        match query {
            Some(query) => non_empty(query.strings(doc, Document::ROOT, namespaces)),
            None => Vec::new(),
        }
    }

    fn field(&self, query: &Option<XPath>, doc: &Document, namespaces: &Namespaces) -> String {
        self.values(query, doc, namespaces)
            .join(self.variant.separator())
    }

    fn resource(&self, raw: &str, data_type: String) -> ReferencedResource {
        ReferencedResource {
            pid: curate_resource(raw, self.resource_format.as_deref()),
            data_type,
        }
    }

    fn parse_resources(&self, doc: &Document, namespaces: &Namespaces) -> Vec<ReferencedResources> {
        let groups: Vec<(String, Vec<ReferencedResource>)> = match &self.resources {
            ResourceQuery::None => Vec::new(),
            ResourceQuery::Flat(query) => vec![(
                UNKNOWN_RESOURCE_TYPE.to_string(),
                non_empty(query.strings(doc, Document::ROOT, namespaces))
                    .iter()
                    .map(|raw| self.resource(raw, String::new()))
                    .collect(),
            )],
            ResourceQuery::PerType(queries) => queries
                .iter()
                .map(|(resource_type, query)| {
                    let resources = non_empty(query.strings(doc, Document::ROOT, namespaces))
                        .iter()
                        .map(|raw| self.resource(raw, String::new()))
                        .collect();
                    (resource_type.clone(), resources)
                })
                .collect(),
            ResourceQuery::Proxies {
                roots,
                resource,
                data_type,
            } => self.parse_proxies(roots, resource, data_type, doc, namespaces),
        };

        groups
            .into_iter()
            .filter(|(_, resources)| !resources.is_empty())
            .map(|(resource_type, ref_resources)| ReferencedResources {
                resource_type,
                ref_resources,
            })
            .collect()
    }

    fn parse_proxies(
        &self,
        roots: &ProxyRoots,
        resource: &XPath,
        data_type: &XPath,
        doc: &Document,
        namespaces: &Namespaces,
    ) -> Vec<(String, Vec<ReferencedResource>)> {
        let read = |node: NodeId| -> Option<ReferencedResource> {
            let raw = first_value(resource, doc, node, namespaces)?;
            let data_type = first_value(data_type, doc, node, namespaces).unwrap_or_default();
            Some(self.resource(&raw, data_type))
        };

        match roots {
            ProxyRoots::PerType(queries) => queries
                .iter()
                .map(|(resource_type, query)| {
                    let resources = element_ids(query.select(doc, Document::ROOT, namespaces))
                        .filter_map(read)
                        .collect();
                    (resource_type.clone(), resources)
                })
                .collect(),
            ProxyRoots::Untyped {
                root,
                resource_type,
            } => {
                let mut groups: Vec<(String, Vec<ReferencedResource>)> = Vec::new();
                for node in element_ids(root.select(doc, Document::ROOT, namespaces)) {
                    let Some(found) = read(node) else {
                        continue;
                    };
                    let group = first_value(resource_type, doc, node, namespaces)
                        .unwrap_or_else(|| UNKNOWN_RESOURCE_TYPE.to_string());
                    match groups.iter_mut().find(|(name, _)| *name == group) {
                        Some((_, resources)) => resources.push(found),
                        None => groups.push((group, vec![found])),
                    }
                }
                groups
            }
        }
    }
}

impl Extract for MarkupExtractor {
    fn fetch(&self, payload: &str) -> Result<FetchResult, ExtractError> {
        let doc = self.parse(payload)?;
        let namespaces = self.namespaces(payload, &doc);
        tracing::debug!("namespace context: {:?}", namespaces);

        Ok(FetchResult {
            title: self.field(&self.title, &doc, &namespaces),
            description: self.field(&self.description, &doc, &namespaces),
            license: self.field(&self.license, &doc, &namespaces),
            ref_files: self.parse_resources(&doc, &namespaces),
        })
    }

    fn identify(&self, payload: &str) -> Result<IdentifyResult, ExtractError> {
        let doc = self.parse(payload)?;
        let namespaces = self.namespaces(payload, &doc);

        Ok(IdentifyResult {
            item_title: self.field(&self.title, &doc, &namespaces),
            description: self.field(&self.description, &doc, &namespaces),
            reverse_pid: self.field(&self.reverse_pid, &doc, &namespaces),
        })
    }
}

/// Compile a field path.
///
/// A trailing `[@name]` selects that attribute of every matched element
/// rather than testing for its presence.
fn compile_field(path: &str) -> Result<Option<XPath>, XPathError> {
    if path.trim().is_empty() {
        return Ok(None);
    }
    if let Some(captures) = TRAILING_ATTRIBUTE.captures(path) {
        let attribute_path = format!("({})/@{}", &captures["base"], &captures["attribute"]);
        return XPath::compile(&attribute_path)
            .map(Some)
            .map_err(|e| XPathError {
                expression: path.to_string(),
                message: e.message,
            });
    }
    XPath::compile(path).map(Some)
}

fn compile_per_type(template: &str, accepted: &[String]) -> Result<Vec<(String, XPath)>, XPathError> {
    accepted
        .iter()
        .map(|resource_type| {
            let path = template.replace(RESOURCE_TYPE_PLACEHOLDER, resource_type);
            Ok::<_, XPathError>((resource_type.clone(), XPath::compile(&path)?))
        })
        .collect()
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn first_value(query: &XPath, doc: &Document, node: NodeId, namespaces: &Namespaces) -> Option<String> {
    non_empty(query.strings(doc, node, namespaces))
        .into_iter()
        .next()
}

fn element_ids(items: Vec<Item>) -> impl Iterator<Item = NodeId> {
    items.into_iter().filter_map(|item| match item {
        Item::Node(id) => Some(id),
        Item::Attr(..) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ResourcePaths;

    const CMDI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CMD xmlns="http://www.clarin.eu/cmd/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" CMDVersion="1.1">
  <Header><MdSelfLink>http://hdl.handle.net/11372/LRT-1478@format=cmdi</MdSelfLink></Header>
  <Resources>
    <ResourceProxyList>
      <ResourceProxy id="lp"><ResourceType>LandingPage</ResourceType><ResourceRef>http://hdl.handle.net/11372/LRT-1478</ResourceRef></ResourceProxy>
      <ResourceProxy id="r1"><ResourceType mimetype="application/zip">Resource</ResourceType><ResourceRef>http://hdl.handle.net/11372/LRT-1478/data.zip</ResourceRef></ResourceProxy>
      <ResourceProxy id="r2"><ResourceType>Resource</ResourceType><ResourceRef>https://lindat.cz/readme.txt</ResourceRef></ResourceProxy>
    </ResourceProxyList>
  </Resources>
  <Components>
    <data>
      <title>Czech Treebank</title>
      <description>A treebank.</description>
      <description>Second paragraph.</description>
      <license uri="http://creativecommons.org/licenses/by/4.0/">CC BY 4.0</license>
    </data>
  </Components>
</CMD>"#;

    fn cmdi_config() -> ParserConfig {
        ParserConfig {
            collection_title: "//cmd:title".to_string(),
            description: "//cmd:description".to_string(),
            license: "//cmd:license[@uri]".to_string(),
            reverse_pid: "//cmd:MdSelfLink".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cmdi_fetch() {
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &cmdi_config()).unwrap();
        let result = extractor.fetch(CMDI).unwrap();

        assert_eq!(result.title, "Czech Treebank");
        assert_eq!(result.description, "A treebank., Second paragraph.");
        assert_eq!(result.license, "http://creativecommons.org/licenses/by/4.0/");

        let types: Vec<&str> = result
            .ref_files
            .iter()
            .map(|group| group.resource_type.as_str())
            .collect();
        assert_eq!(types, vec!["LandingPage", "Resource"]);

        let resources = &result.ref_files[1].ref_resources;
        assert_eq!(resources.len(), 2);
        assert_eq!(
            resources[0].pid,
            "http://hdl.handle.net/11372/LRT-1478/data.zip"
        );
        assert_eq!(resources[0].data_type, "application/zip");
        assert_eq!(resources[1].pid, "https://lindat.cz/readme.txt");
        assert_eq!(resources[1].data_type, "");
    }

    #[test]
    fn test_cmdi_trailing_xml_attribute() {
        let payload = r#"<CMD xmlns="http://www.clarin.eu/cmd/">
  <Components><data>
    <description xml:lang="en">English abstract</description>
    <description>No language</description>
    <description xml:lang="cs">Czech abstract</description>
  </data></Components>
</CMD>"#;
        let config = ParserConfig {
            description: "//cmd:description[@xml:lang]".to_string(),
            collection_title: "//cmd:description[@xml:lang='cs']".to_string(),
            ..Default::default()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &config).unwrap();
        let result = extractor.fetch(payload).unwrap();
        assert_eq!(result.description, "en, cs");
        assert_eq!(result.title, "Czech abstract");
    }

    #[test]
    fn test_xml_prefix_in_namespace_context() {
        let extractor = MarkupExtractor::new(MarkupVariant::Xml, &ParserConfig::default()).unwrap();
        let payload = r#"<r xmlns:xml="urn:ignored"><a/></r>"#;
        let doc = Document::parse_xml(payload).unwrap();
        let namespaces = extractor.namespaces(payload, &doc);
        assert_eq!(namespaces.get("xml").map(String::as_str), Some(XML_NAMESPACE));
    }

    #[test]
    fn test_cmdi_identify() {
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &cmdi_config()).unwrap();
        let result = extractor.identify(CMDI).unwrap();
        assert_eq!(result.item_title, "Czech Treebank");
        assert_eq!(
            result.reverse_pid,
            "http://hdl.handle.net/11372/LRT-1478@format=cmdi"
        );
    }

    #[test]
    fn test_cmdi_identify_missing_reverse_pid_is_empty() {
        let config = ParserConfig {
            reverse_pid: "//cmd:Header/cmd:MdCollectionDisplayName".to_string(),
            ..cmdi_config()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &config).unwrap();
        let result = extractor.identify(CMDI).unwrap();
        assert_eq!(result.reverse_pid, "");
        assert_eq!(result.item_title, "Czech Treebank");
    }

    #[test]
    fn test_cmdi_accepted_types_limit_groups() {
        let config = ParserConfig {
            accept_resource_type: Some(vec!["Resource".to_string()]),
            ..cmdi_config()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &config).unwrap();
        let result = extractor.fetch(CMDI).unwrap();
        assert_eq!(result.ref_files.len(), 1);
        assert_eq!(result.ref_files[0].resource_type, "Resource");
    }

    #[test]
    fn test_cmdi_untyped_root_groups_by_type_path() {
        let config = ParserConfig {
            ref_file: ResourcePaths {
                resource_root_path: Some("//cmd:ResourceProxy".to_string()),
                ..Default::default()
            },
            ..cmdi_config()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Cmdi, &config).unwrap();
        let result = extractor.fetch(CMDI).unwrap();
        let sizes: Vec<(&str, usize)> = result
            .ref_files
            .iter()
            .map(|g| (g.resource_type.as_str(), g.ref_resources.len()))
            .collect();
        assert_eq!(sizes, vec![("LandingPage", 1), ("Resource", 2)]);
    }

    #[test]
    fn test_xml_namespaces_from_config_and_payload() {
        let payload = r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <GetRecord><record><metadata>
    <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
      <dc:title>Dataset</dc:title>
      <dc:identifier>https://repo.org/files/1.csv</dc:identifier>
      <dc:identifier>https://repo.org/files/2.csv</dc:identifier>
      <dc:rights>CC0</dc:rights>
    </oai_dc:dc>
  </metadata></record></GetRecord>
</OAI-PMH>"#;
        let mut nsmap = std::collections::BTreeMap::new();
        nsmap.insert(
            "oai".to_string(),
            "http://www.openarchives.org/OAI/2.0/".to_string(),
        );
        let config = ParserConfig {
            collection_title: "//oai:record//dc:title".to_string(),
            license: "//dc:rights".to_string(),
            ref_file: ResourcePaths {
                path: "//dc:identifier".to_string(),
                ..Default::default()
            },
            nsmap,
            ..Default::default()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Xml, &config).unwrap();
        let result = extractor.fetch(payload).unwrap();
        assert_eq!(result.title, "Dataset");
        assert_eq!(result.license, "CC0");
        assert_eq!(result.ref_files.len(), 1);
        assert_eq!(result.ref_files[0].resource_type, UNKNOWN_RESOURCE_TYPE);
        assert_eq!(result.ref_files[0].ref_resources.len(), 2);
    }

    #[test]
    fn test_xml_resource_format() {
        let config = ParserConfig {
            ref_file: ResourcePaths {
                path: "//file/@name".to_string(),
                resource_format: Some("https://repo.org/files/$resource".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Xml, &config).unwrap();
        let result = extractor
            .fetch(r#"<files><file name="a.csv"/><file name="b.csv"/></files>"#)
            .unwrap();
        let pids: Vec<&str> = result.resources().map(|r| r.pid.as_str()).collect();
        assert_eq!(
            pids,
            vec!["https://repo.org/files/a.csv", "https://repo.org/files/b.csv"]
        );
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let extractor = MarkupExtractor::new(MarkupVariant::Xml, &ParserConfig::default()).unwrap();
        assert!(matches!(
            extractor.fetch("<a><b></a>"),
            Err(ExtractError::Markup(_))
        ));
    }

    #[test]
    fn test_html_fetch() {
        let payload = r#"<!DOCTYPE html>
<html><head>
<meta name="DC.title" content="Excavation archive">
<meta name="DC.rights" content="CC-BY">
<script>var x = "<p>";</script>
</head><body>
<div class="description"><p>Finds from the site.<br>Second line</p></div>
<table><tr><td><a class="download" href="https://archaeologydataservice.ac.uk/f/1.pdf">1</a></td></tr>
<tr><td><a class="download" href="https://archaeologydataservice.ac.uk/f/2.pdf">2</a></td></tr></table>
</body></html>"#;
        let config = ParserConfig {
            collection_title: "//meta[@name='DC.title'][@content]".to_string(),
            license: "//meta[@name='DC.rights']/@content".to_string(),
            description: "//div[@class='description']/p/text()".to_string(),
            ref_file: ResourcePaths {
                path: "//a[@class='download']/@href".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let extractor = MarkupExtractor::new(MarkupVariant::Html, &config).unwrap();
        let result = extractor.fetch(payload).unwrap();
        assert_eq!(result.title, "Excavation archive");
        assert_eq!(result.license, "CC-BY");
        assert_eq!(result.description, "Finds from the site.\nSecond line");
        assert_eq!(result.ref_files.len(), 1);
        assert_eq!(result.ref_files[0].resource_type, UNKNOWN_RESOURCE_TYPE);
        assert_eq!(result.ref_files[0].ref_resources.len(), 2);
    }

    #[test]
    fn test_invalid_path_fails_construction() {
        let config = ParserConfig {
            description: "//a[".to_string(),
            ..Default::default()
        };
        assert!(MarkupExtractor::new(MarkupVariant::Xml, &config).is_err());
    }

    #[test]
    fn test_invalid_trailing_attribute_path_is_an_error() {
        let path = "//a[@b='x'[@c]";
        let err = compile_field(path).unwrap_err();
        assert_eq!(err.expression, path);

        let config = ParserConfig {
            license: path.to_string(),
            ..Default::default()
        };
        assert!(MarkupExtractor::new(MarkupVariant::Xml, &config).is_err());
    }
}
