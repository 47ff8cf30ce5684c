//! Namespace-aware document loader
//!
//! Builds a small arena tree from a `quick-xml` event stream. Element and
//! attribute names are resolved to `(namespace, local name)` using the
//! document's own `xmlns` declarations, falling back to the well-known SSIS
//! prefix table for undeclared prefixes.
//!
//! Parsing is lenient: mismatched end tags are accepted, and a syntax error
//! after the root element has opened keeps whatever was read so far and
//! marks the document as recovered.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;

use crate::error::DocumentLoadError;

/// Well-known namespaces
pub mod ns {
    pub const DTS: &str = "www.microsoft.com/SqlServer/Dts";
    pub const SQL_TASK: &str = "www.microsoft.com/sqlserver/dts/tasks/sqltask";
    pub const PIPELINE: &str = "www.microsoft.com/sqlserver/dts/pipeline";
    pub const SCRIPT_TASK: &str = "www.microsoft.com/sqlserver/dts/tasks/scripttask";
    pub const FOREACH: &str = "www.microsoft.com/sqlserver/dts/tasks/foreachloop";
    pub const SEQUENCE: &str = "www.microsoft.com/sqlserver/dts/tasks/sequence";
    pub const EXECUTE_PACKAGE: &str = "www.microsoft.com/SqlServer/Dts/Tasks/ExecutePackageTask";
    pub const SSIS: &str = "www.microsoft.com/SqlServer/SSIS";

    /// Prefixes used when a document omits its `xmlns` declarations
    pub const PREFIXES: &[(&str, &str)] = &[
        ("DTS", DTS),
        ("SQLTask", SQL_TASK),
        ("Pipeline", PIPELINE),
        ("ScriptTask", SCRIPT_TASK),
        ("ForEach", FOREACH),
        ("Sequence", SEQUENCE),
        ("ExecutePackageTask", EXECUTE_PACKAGE),
        ("SSIS", SSIS),
    ];

    pub fn for_prefix(prefix: &str) -> Option<&'static str> {
        PREFIXES
            .iter()
            .find(|(p, _)| p.eq_ignore_ascii_case(prefix))
            .map(|(_, uri)| *uri)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeId(usize);

#[derive(Debug)]
struct Attribute {
    namespace: Option<String>,
    local: String,
    value: String,
}

#[derive(Debug)]
struct Node {
    namespace: Option<String>,
    local: String,
    attributes: Vec<Attribute>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Parsed document
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    recovered: Option<String>,
}

impl Document {
    /// Read a document from disk
    pub fn from_file(path: &Path) -> Result<Self, DocumentLoadError> {
        if !path.exists() {
            return Err(DocumentLoadError::NotFound(path.display().to_string()));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| DocumentLoadError::Io(path.display().to_string(), e.to_string()))?;

        Self::parse(&bytes)
    }

    /// Parse raw bytes with recovery
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentLoadError> {
        TreeBuilder::default().build(bytes)
    }

    /// Parse and require a specific root element
    pub fn parse_with_root(bytes: &[u8], namespace: &str, local: &str) -> Result<Self, DocumentLoadError> {
        let document = Self::parse(bytes)?;
        let root = document.root();

        if !root.is(namespace, local) {
            return Err(DocumentLoadError::RootMismatch {
                expected: format!("{{{}}}{}", namespace, local),
                found: root.qualified_name(),
            });
        }

        Ok(document)
    }

    pub fn root(&self) -> Element<'_> {
        Element {
            doc: self,
            id: NodeId(0),
        }
    }

    /// Parser error that was recovered from, if any
    pub fn recovered_error(&self) -> Option<&str> {
        self.recovered.as_deref()
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered.is_some()
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

/// Borrowed handle to an element
#[derive(Clone, Copy)]
pub struct Element<'d> {
    doc: &'d Document,
    id: NodeId,
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.qualified_name())
            .finish()
    }
}

impl PartialEq for Element<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }
}

impl<'d> Element<'d> {
    fn node(&self) -> &'d Node {
        self.doc.node(self.id)
    }

    fn wrap(&self, id: NodeId) -> Element<'d> {
        Element { doc: self.doc, id }
    }

    pub fn local_name(&self) -> &'d str {
        &self.node().local
    }

    pub fn namespace(&self) -> Option<&'d str> {
        self.node().namespace.as_deref()
    }

    /// `{namespace}local`, or just `local` without a namespace
    pub fn qualified_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{{{}}}{}", ns, self.local_name()),
            None => self.local_name().to_string(),
        }
    }

    /// Exact local name under a namespace (namespace compared case-insensitively)
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local_name() == local
            && self
                .namespace()
                .is_some_and(|ns| ns.eq_ignore_ascii_case(namespace))
    }

    /// Local name match regardless of namespace
    pub fn has_local_name(&self, local: &str) -> bool {
        self.local_name().eq_ignore_ascii_case(local)
    }

    /// First attribute with this local name, in any namespace
    pub fn attr(&self, local: &str) -> Option<&'d str> {
        self.node()
            .attributes
            .iter()
            .find(|a| a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Attribute in a specific namespace
    pub fn attr_ns(&self, namespace: &str, local: &str) -> Option<&'d str> {
        self.node()
            .attributes
            .iter()
            .find(|a| {
                a.local == local
                    && a.namespace
                        .as_deref()
                        .is_some_and(|ns| ns.eq_ignore_ascii_case(namespace))
            })
            .map(|a| a.value.as_str())
    }

    /// Non-empty attribute value, trimmed
    pub fn attr_text(&self, local: &str) -> Option<&'d str> {
        self.attr(local).map(str::trim).filter(|v| !v.is_empty())
    }

    /// All attributes as `(local name, value)`
    pub fn attributes(&self) -> impl Iterator<Item = (&'d str, &'d str)> + 'd {
        self.node()
            .attributes
            .iter()
            .filter(|a| a.namespace.as_deref() != Some(XMLNS))
            .map(|a| (a.local.as_str(), a.value.as_str()))
    }

    /// Trimmed text content, `None` when empty
    pub fn text(&self) -> Option<&'d str> {
        let text = self.node().text.trim();
        (!text.is_empty()).then_some(text)
    }

    pub fn parent(&self) -> Option<Element<'d>> {
        self.node().parent.map(|id| self.wrap(id))
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = Element<'d>> + 'd {
        std::iter::successors(self.parent(), |e| e.parent())
    }

    pub fn children(&self) -> impl Iterator<Item = Element<'d>> + 'd {
        let doc = self.doc;
        self.node()
            .children
            .iter()
            .map(move |&id| Element { doc, id })
    }

    pub fn children_named(&self, namespace: &'d str, local: &'d str) -> impl Iterator<Item = Element<'d>> + 'd {
        self.children().filter(move |e| e.is(namespace, local))
    }

    pub fn child(&self, namespace: &str, local: &str) -> Option<Element<'d>> {
        self.children().find(|e| e.is(namespace, local))
    }

    /// First child with this local name, in any namespace
    pub fn child_local(&self, local: &str) -> Option<Element<'d>> {
        self.children().find(|e| e.has_local_name(local))
    }

    /// Descendants in document order, excluding `self`
    pub fn descendants(&self) -> Descendants<'d> {
        Descendants {
            doc: self.doc,
            stack: self.node().children.iter().rev().copied().collect(),
        }
    }

    pub fn descendants_named(&self, namespace: &'d str, local: &'d str) -> impl Iterator<Item = Element<'d>> + 'd {
        self.descendants().filter(move |e| e.is(namespace, local))
    }

    pub fn descendants_local(&self, local: &'d str) -> impl Iterator<Item = Element<'d>> + 'd {
        self.descendants().filter(move |e| e.has_local_name(local))
    }

    /// `DTS:Property` child with the given `DTS:Name`
    pub fn dts_property(&self, name: &str) -> Option<Element<'d>> {
        self.children()
            .find(|e| e.is(ns::DTS, "Property") && e.attr("Name") == Some(name))
    }
}

/// Pre-order descendant iterator
pub struct Descendants<'d> {
    doc: &'d Document,
    stack: Vec<NodeId>,
}

impl<'d> Iterator for Descendants<'d> {
    type Item = Element<'d>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.node(id).children.iter().rev().copied());
        Some(Element { doc: self.doc, id })
    }
}

const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<Node>,
    open: Vec<NodeId>,
    /// One frame of `(prefix, uri)` declarations per open element
    scopes: Vec<Vec<(String, String)>>,
}

impl TreeBuilder {
    fn build(mut self, bytes: &[u8]) -> Result<Document, DocumentLoadError> {
        let mut reader = Reader::from_reader(bytes);
        {
            let config = reader.config_mut();
            config.trim_text(true);
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
        }

        let mut buf = Vec::new();
        let mut recovered = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    if self.root_closed() {
                        break;
                    }
                    self.open_element(e);
                }
                Ok(Event::Empty(ref e)) => {
                    if self.root_closed() {
                        break;
                    }
                    self.open_element(e);
                    self.close_element();
                }
                Ok(Event::End(_)) => self.close_element(),
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                    self.append_text(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    self.append_text(&text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    let message = e.to_string();
                    if self.nodes.is_empty() {
                        return Err(DocumentLoadError::Malformed {
                            position: reader.error_position(),
                            message,
                        });
                    }
                    tracing::warn!(
                        position = reader.error_position(),
                        error = %message,
                        "Recovered from malformed document"
                    );
                    recovered = Some(format!(
                        "{} (at byte {})",
                        message,
                        reader.error_position()
                    ));
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        if self.nodes.is_empty() {
            return Err(DocumentLoadError::NoRootElement);
        }

        Ok(Document {
            nodes: self.nodes,
            recovered,
        })
    }

    fn root_closed(&self) -> bool {
        !self.nodes.is_empty() && self.open.is_empty()
    }

    fn open_element(&mut self, start: &BytesStart<'_>) {
        let raw_name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let mut declarations = Vec::new();
        let mut raw_attributes = Vec::new();

        for attr in start.attributes().with_checks(false).flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());

            if key == "xmlns" {
                declarations.push((String::new(), value.clone()));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declarations.push((prefix.to_string(), value.clone()));
            }
            raw_attributes.push((key, value));
        }

        self.scopes.push(declarations);

        let (namespace, local) = self.resolve(&raw_name, true);
        let attributes = raw_attributes
            .into_iter()
            .map(|(key, value)| {
                if key == "xmlns" || key.starts_with("xmlns:") {
                    let local = key.strip_prefix("xmlns:").unwrap_or("").to_string();
                    Attribute {
                        namespace: Some(XMLNS.to_string()),
                        local,
                        value,
                    }
                } else {
                    let (namespace, local) = self.resolve(&key, false);
                    Attribute {
                        namespace,
                        local,
                        value,
                    }
                }
            })
            .collect();

        let id = NodeId(self.nodes.len());
        let parent = self.open.last().copied();
        self.nodes.push(Node {
            namespace,
            local,
            attributes,
            text: String::new(),
            parent,
            children: Vec::new(),
        });

        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        self.open.push(id);
    }

    fn close_element(&mut self) {
        if self.open.pop().is_some() {
            self.scopes.pop();
        }
    }

    fn append_text(&mut self, text: &str) {
        if let Some(&id) = self.open.last() {
            self.nodes[id.0].text.push_str(text);
        }
    }

    /// Resolve a raw `prefix:local` name
    ///
    /// Unprefixed elements take the default namespace; unprefixed
    /// attributes have none.
    fn resolve(&self, raw: &str, is_element: bool) -> (Option<String>, String) {
        let (prefix, local) = match raw.split_once(':') {
            Some((prefix, local)) => (prefix, local),
            None if is_element => ("", raw),
            None => return (None, raw.to_string()),
        };

        let declared = self
            .scopes
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty());

        let namespace = declared.or_else(|| {
            if prefix.is_empty() {
                None
            } else {
                ns::for_prefix(prefix).map(str::to_string)
            }
        });

        (namespace, local.to_string())
    }
}

/// Load a package document and check its root is `DTS:Executable`
pub fn load_package(bytes: &[u8]) -> Result<Document, DocumentLoadError> {
    Document::parse_with_root(bytes, ns::DTS, "Executable")
}
