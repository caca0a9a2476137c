//! A small owned XML tree on top of `quick-xml`.
//!
//! Requests are assembled as [`Node`] trees and rendered in one pass; replies
//! are read into the same shape with namespaces resolved, so lookups match on
//! namespace URI and local name rather than on whatever prefix the server
//! happened to pick.

use std::io::Cursor;

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    name::ResolveResult,
    reader::NsReader,
};

use crate::WsmanError;

/// One XML element with its attributes, direct text and child elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    /// Resolved namespace URI, for parsed nodes.
    pub namespace: Option<String>,
    /// Qualified name as written, e.g. `s:Envelope`.
    pub name: String,
    /// Attributes with qualified keys, in document order.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text directly inside this element.
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Name without its prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Matches namespace URI and local name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local_name() == local && self.namespace.as_deref() == Some(namespace)
    }

    /// Attribute value by local name, ignoring any prefix on the key.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| local_part(key) == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, namespace: &str, local: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|child| child.is(namespace, local))
    }

    /// This node and every element below it, in document order.
    pub fn descendants(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        self.walk(&mut out);
        out
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a Node>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }

    /// First element (self included) with the given namespace and local name.
    pub fn find(&self, namespace: &str, local: &str) -> Option<&Node> {
        self.descendants()
            .into_iter()
            .find(|node| node.is(namespace, local))
    }

    pub fn find_all(&self, namespace: &str, local: &str) -> Vec<&Node> {
        self.descendants()
            .into_iter()
            .filter(|node| node.is(namespace, local))
            .collect()
    }

    /// All text in this subtree, concatenated in document order.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }

    /// Renders the subtree without an XML declaration.
    pub fn to_xml(&self) -> Result<String, WsmanError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        self.write(&mut writer)?;
        into_string(writer)
    }

    /// Renders the subtree as a standalone UTF-8 document.
    pub fn to_document(&self) -> Result<String, WsmanError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        self.write(&mut writer)?;
        into_string(writer)
    }

    fn write(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<(), WsmanError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_empty() && self.children.is_empty() {
            return writer.write_event(Event::Empty(start)).map_err(xml_error);
        }

        writer.write_event(Event::Start(start)).map_err(xml_error)?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(xml_error)?;
        }
        for child in &self.children {
            child.write(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(xml_error)
    }
}

/// Parses a complete document and returns its root element.
pub fn parse(input: &str) -> Result<Node, WsmanError> {
    let mut reader = NsReader::from_str(input);
    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;

    loop {
        let (namespace, event) = reader.read_resolved_event().map_err(xml_error)?;
        let namespace = match namespace {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            _ => None,
        };

        match event {
            Event::Start(start) => stack.push(open_node(namespace, &start)?),
            Event::Empty(start) => {
                let node = open_node(namespace, &start)?;
                close_node(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| WsmanError::Xml("unbalanced end tag".to_string()))?;
                close_node(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(WsmanError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| WsmanError::Xml("document has no root element".to_string()))
}

fn open_node(namespace: Option<String>, start: &BytesStart<'_>) -> Result<Node, WsmanError> {
    let mut node = Node {
        namespace,
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Node::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn close_node(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<(), WsmanError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_some() => {
            return Err(WsmanError::Xml(format!("second root element <{}>", node.name)));
        }
        None => *root = Some(node),
    }
    Ok(())
}

fn into_string(writer: Writer<Cursor<Vec<u8>>>) -> Result<String, WsmanError> {
    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_error)
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn xml_error(err: impl std::fmt::Display) -> WsmanError {
    WsmanError::Xml(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::{Node, parse};

    #[test]
    fn parse_resolves_prefixes() {
        let root = parse(
            r#"<?xml version="1.0"?>
            <a:Root xmlns:a="urn:a" xmlns:b="urn:b">
              <b:Item b:Name="one">first &amp; only</b:Item>
              <Plain/>
            </a:Root>"#,
        )
        .expect("document should parse");

        assert!(root.is("urn:a", "Root"));
        let item = root.find("urn:b", "Item").expect("item should exist");
        assert_eq!(item.attr("Name"), Some("one"));
        assert_eq!(item.text, "first & only");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].namespace, None);
    }

    #[test]
    fn render_escapes_text_and_collapses_empty_elements() {
        let node = Node::new("x:Outer")
            .with_attr("Name", "a\"b")
            .with_child(Node::new("x:Inner").with_text("1 < 2"))
            .with_child(Node::new("x:Empty"));

        let xml = node.to_xml().expect("render should succeed");
        assert_eq!(
            xml,
            r#"<x:Outer Name="a&quot;b"><x:Inner>1 &lt; 2</x:Inner><x:Empty/></x:Outer>"#
        );
    }

    #[test]
    fn truncated_document_is_an_error() {
        assert!(parse("<a><b></b>").is_err());
    }

    #[test]
    fn second_root_element_is_an_error() {
        assert!(parse("<Object/><Object><Property Name=\"A\">kept</Property></Object>").is_err());
        assert!(parse("<a></a><b/>").is_err());
    }
}
