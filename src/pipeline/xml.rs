//! Minimal element tree over quick-xml for message payload queries
//!
//! Paths are `/`-separated element names from the document root; an empty
//! segment (`//`) matches any depth. The first match in document order wins.

use crate::error::{Error, Result};
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

struct Step<'a> {
    name: &'a str,
    descendant: bool,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            attrs.push((key, decode_text(&attr.value)?));
        }
        Ok(Self {
            name,
            attrs,
            children: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of this element and all its descendants, trimmed
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            out.push(child);
            child.descendants(out);
        }
    }

    fn find_steps(&self, steps: &[Step<'_>]) -> Option<&Element> {
        let Some((step, rest)) = steps.split_first() else {
            return Some(self);
        };

        let candidates: Vec<&Element> = if step.descendant {
            let mut all = Vec::new();
            self.descendants(&mut all);
            all
        } else {
            self.child_elements().collect()
        };

        candidates
            .into_iter()
            .filter(|c| c.name == step.name)
            .find_map(|c| c.find_steps(rest))
    }
}

/// Parsed XML payload
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn parse(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<Element> = vec![Element::default()];

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::Xml(format!("at {}: {}", reader.buffer_position(), e)))?;

            match event {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    push_child(&mut stack, Node::Element(element));
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        if let Some(element) = stack.pop() {
                            push_child(&mut stack, Node::Element(element));
                        }
                    }
                }
                Event::Text(text) => {
                    let text = decode_text(&text)?;
                    push_child(&mut stack, Node::Text(text));
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    push_child(&mut stack, Node::Text(text));
                }
                Event::GeneralRef(reference) => {
                    let resolved = match reference.resolve_char_ref() {
                        Ok(Some(ch)) => ch.to_string(),
                        _ => {
                            let name = String::from_utf8_lossy(&reference).into_owned();
                            resolve_predefined_entity(&name)
                                .map(str::to_string)
                                .unwrap_or_else(|| format!("&{};", name))
                        }
                    };
                    push_child(&mut stack, Node::Text(resolved));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        // Unclosed elements are attached to their parents
        while stack.len() > 1 {
            if let Some(element) = stack.pop() {
                push_child(&mut stack, Node::Element(element));
            }
        }

        let root = stack.pop().unwrap_or_default();
        if root.child_elements().next().is_none() {
            return Err(Error::Xml("no root element".to_string()));
        }
        Ok(Self { root })
    }

    /// First element matching `path`
    pub fn find(&self, path: &str) -> Option<&Element> {
        self.root.find_steps(&parse_path(path))
    }

    /// Trimmed text of the element at `path`, `None` if absent or empty
    pub fn text(&self, path: &str) -> Option<String> {
        self.find(path)
            .map(Element::text)
            .filter(|t| !t.is_empty())
    }

    /// Attribute of the element at `path`, `None` if absent or empty
    pub fn attr(&self, path: &str, name: &str) -> Option<String> {
        self.find(path)
            .and_then(|e| e.attr(name))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// First non-empty attribute `name` on any element
    pub fn any_attr(&self, name: &str) -> Option<String> {
        let mut all = Vec::new();
        self.root.descendants(&mut all);
        all.into_iter()
            .filter_map(|e| e.attr(name))
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}

fn push_child(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn decode_text(raw: &[u8]) -> Result<String> {
    let raw = String::from_utf8_lossy(raw);
    unescape(&raw)
        .map(|s| s.into_owned())
        .map_err(|e| Error::Xml(e.to_string()))
}

fn parse_path(path: &str) -> Vec<Step<'_>> {
    let mut steps = Vec::new();
    let mut descendant = false;
    for (i, segment) in path.split('/').enumerate() {
        if segment.is_empty() {
            if i > 0 {
                descendant = true;
            }
            continue;
        }
        steps.push(Step {
            name: segment,
            descendant,
        });
        descendant = false;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"<?xml version="1.0"?>
<msg>
    <appmsg appid="" sdkver="0">
        <title><![CDATA[Quarterly report]]></title>
        <des>Q3 &amp; Q4</des>
        <type>6</type>
        <finderFeed><media><fullCoverUrl>http://cover</fullCoverUrl></media></finderFeed>
    </appmsg>
    <emoji cdnurl="http://cdn/x" aeskey="abc123" />
</msg>"#;

    #[test]
    fn test_path_lookup() {
        let doc = Document::parse(APP).unwrap();
        assert_eq!(doc.text("/msg/appmsg/title").as_deref(), Some("Quarterly report"));
        assert_eq!(doc.text("/msg/appmsg/des").as_deref(), Some("Q3 & Q4"));
        assert_eq!(doc.text("/msg/appmsg/type").as_deref(), Some("6"));
        assert!(doc.text("/msg/appmsg/missing").is_none());
        assert!(doc.text("/appmsg/title").is_none());
    }

    #[test]
    fn test_descendant_lookup() {
        let doc = Document::parse(APP).unwrap();
        assert_eq!(
            doc.text("/msg/appmsg/finderFeed//fullCoverUrl").as_deref(),
            Some("http://cover")
        );
        assert_eq!(doc.text("//title").as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn test_attributes() {
        let doc = Document::parse(APP).unwrap();
        assert_eq!(doc.attr("/msg/emoji", "aeskey").as_deref(), Some("abc123"));
        assert_eq!(doc.any_attr("cdnurl").as_deref(), Some("http://cdn/x"));
        assert!(doc.attr("/msg/appmsg", "appid").is_none());
        assert!(doc.any_attr("missing").is_none());
    }

    #[test]
    fn test_nested_text() {
        let doc = Document::parse("<revokemsg>\"Bob\" recalled a message</revokemsg>").unwrap();
        assert_eq!(
            doc.text("/revokemsg").as_deref(),
            Some("\"Bob\" recalled a message")
        );
        assert_eq!(doc.find("/revokemsg").map(Element::name), Some("revokemsg"));
    }

    #[test]
    fn test_invalid_input() {
        assert!(Document::parse("plain text").is_err());
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a></b>").is_err());
    }
}
