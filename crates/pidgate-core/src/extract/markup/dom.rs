//! Arena document model built from quick-xml events
//!
//! Nodes are stored in creation order, which is also document order, so a
//! [`NodeId`] doubles as a sort key. Node 0 is always the document root.

use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::ExtractError;

pub type NodeId = usize;

/// Namespace of the reserved `xml` prefix, bound in every document
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

lazy_static! {
    static ref SCRIPT_OR_STYLE: Regex =
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap();
}

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Element or attribute name after namespace resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub local: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Name,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: Name,
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element; `None` is the default namespace
    pub declarations: Vec<(Option<String>, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub const ROOT: NodeId = 0;

    fn empty() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse a well-formed XML document
    pub fn parse_xml(text: &str) -> Result<Self, ExtractError> {
        let mut builder = Builder::new();
        let mut reader = Reader::from_str(text);
        reader.check_end_names(true);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => builder.open_xml(&e, false)?,
                Ok(Event::Empty(e)) => builder.open_xml(&e, true)?,
                Ok(Event::End(_)) => builder.close_current(),
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| ExtractError::Markup(e.to_string()))?;
                    builder.text(&text);
                }
                Ok(Event::CData(e)) => builder.text(&String::from_utf8_lossy(&e)),
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ExtractError::Markup(format!(
                        "XML parse error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        let document = builder.finish();
        if document.document_element().is_none() {
            return Err(ExtractError::Markup("document has no root element".to_string()));
        }
        Ok(document)
    }

    /// Parse HTML leniently.
    ///
    /// Scripts and styles are dropped, void elements never take children,
    /// stray end tags are ignored, and element names are lowercased. Parsing
    /// stops at the first unrecoverable error with whatever was built so far.
    pub fn parse_html(text: &str) -> Self {
        let cleaned = SCRIPT_OR_STYLE.replace_all(text, "");
        let mut builder = Builder::new();
        let mut reader = Reader::from_str(&cleaned);
        reader.check_end_names(false);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                    let void = HTML_VOID_ELEMENTS.contains(&name.as_str());
                    builder.open_html(&e, void);
                }
                Ok(Event::Empty(e)) => builder.open_html(&e, true),
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                    builder.close_named(&name);
                }
                Ok(Event::Text(e)) => builder.text(&unescape_html(&e)),
                Ok(Event::CData(e)) => builder.text(&String::from_utf8_lossy(&e)),
                Ok(Event::Eof) => break,
                Err(e) => {
                    tracing::debug!("HTML parsing stopped early: {}", e);
                    break;
                }
                _ => {}
            }
        }

        builder.finish()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// The outermost element
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(Self::ROOT)
            .iter()
            .copied()
            .find(|&child| self.element(child).is_some())
    }

    /// All descendants of `id` in document order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        found
    }

    /// Concatenated text of the node and all its descendants
    pub fn string_value(&self, id: NodeId) -> String {
        if let NodeKind::Text(text) = &self.nodes[id].kind {
            return text.clone();
        }
        let mut value = String::new();
        for descendant in self.descendants(id) {
            if let NodeKind::Text(text) = &self.nodes[descendant].kind {
                value.push_str(text);
            }
        }
        value
    }

    /// Namespace bindings visible at `id`, nearest declaration first
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let mut bindings: Vec<(Option<String>, String)> = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(element) = self.element(node) {
                for (prefix, uri) in &element.declarations {
                    if !bindings.iter().any(|(bound, _)| bound == prefix) {
                        bindings.push((prefix.clone(), uri.clone()));
                    }
                }
            }
            current = self.parent(node);
        }
        bindings
    }
}

fn unescape_html(text: &BytesText) -> String {
    text.unescape_with(html_entity)
        .map(|unescaped| unescaped.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(text).into_owned())
}

fn html_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "nbsp" => "\u{a0}",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        _ => return None,
    })
}

struct RawAttribute {
    qname: String,
    value: String,
}

struct Builder {
    document: Document,
    open: Vec<NodeId>,
}

impl Builder {
    fn new() -> Self {
        Self {
            document: Document::empty(),
            open: vec![Document::ROOT],
        }
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(Document::ROOT)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let parent = self.current();
        let id = self.document.nodes.len();
        self.document.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.document.nodes[parent].children.push(id);
        id
    }

    fn open_xml(&mut self, start: &BytesStart, empty: bool) -> Result<(), ExtractError> {
        let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let mut raw_attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| ExtractError::Markup(e.to_string()))?;
            let value = attribute
                .unescape_value()
                .map_err(|e| ExtractError::Markup(e.to_string()))?
                .into_owned();
            raw_attributes.push(RawAttribute {
                qname: String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
                value,
            });
        }

        let element = self.namespaced_element(&qname, raw_attributes);
        self.insert(element, empty);
        Ok(())
    }

    /// Names are lowercased and never namespaced; malformed attributes are skipped
    fn open_html(&mut self, start: &BytesStart, empty: bool) {
        let local = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
        let attributes = start
            .html_attributes()
            .filter_map(Result::ok)
            .map(|attribute| {
                let value = match attribute.unescape_value() {
                    Ok(value) => value.into_owned(),
                    Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
                };
                Attribute {
                    name: Name {
                        local: String::from_utf8_lossy(attribute.key.as_ref()).to_ascii_lowercase(),
                        namespace: None,
                    },
                    value,
                }
            })
            .collect();

        let element = Element {
            name: Name {
                local,
                namespace: None,
            },
            attributes,
            declarations: Vec::new(),
        };
        self.insert(element, empty);
    }

    fn insert(&mut self, element: Element, empty: bool) {
        let id = self.push(NodeKind::Element(element));
        if !empty {
            self.open.push(id);
        }
    }

    fn namespaced_element(&self, qname: &str, raw_attributes: Vec<RawAttribute>) -> Element {
        let mut declarations = Vec::new();
        let mut plain = Vec::new();
        for raw in raw_attributes {
            if raw.qname == "xmlns" {
                declarations.push((None, raw.value));
            } else if let Some(prefix) = raw.qname.strip_prefix("xmlns:") {
                declarations.push((Some(prefix.to_string()), raw.value));
            } else {
                plain.push(raw);
            }
        }

        let resolve = |prefix: Option<&str>| -> Option<String> {
            if prefix == Some("xml") {
                return Some(XML_NAMESPACE.to_string());
            }
            let key = prefix.map(str::to_string);
            declarations
                .iter()
                .find(|(bound, _)| *bound == key)
                .map(|(_, uri)| uri.clone())
                .or_else(|| {
                    self.document
                        .in_scope_namespaces(self.current())
                        .into_iter()
                        .find(|(bound, _)| *bound == key)
                        .map(|(_, uri)| uri)
                })
                .filter(|uri| !uri.is_empty())
        };

        let (prefix, local) = split_qname(qname);
        let name = Name {
            local: local.to_string(),
            namespace: resolve(prefix),
        };

        let attributes = plain
            .into_iter()
            .map(|raw| {
                let (prefix, local) = split_qname(&raw.qname);
                Attribute {
                    name: Name {
                        local: local.to_string(),
                        // Unprefixed attributes are never in a namespace
                        namespace: prefix.and_then(|p| resolve(Some(p))),
                    },
                    value: raw.value,
                }
            })
            .collect();

        Element {
            name,
            attributes,
            declarations,
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let current = self.current();
        if let Some(&last) = self.document.nodes[current].children.last() {
            if let NodeKind::Text(existing) = &mut self.document.nodes[last].kind {
                existing.push_str(text);
                return;
            }
        }
        self.push(NodeKind::Text(text.to_string()));
    }

    fn close_current(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
        }
    }

    /// Close `name` and anything left open inside it; ignore unmatched end tags
    fn close_named(&mut self, name: &str) {
        let position = self.open.iter().rposition(|&id| {
            self.document
                .element(id)
                .map(|element| element.name.local == name)
                .unwrap_or(false)
        });
        if let Some(position) = position {
            self.open.truncate(position.max(1));
        }
    }

    fn finish(self) -> Document {
        self.document
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}
