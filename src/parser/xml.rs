//! A small element tree built from quick-xml events.
//!
//! Fiscal payloads are a few kilobytes and are walked by path many times
//! during extraction, so they are materialised once. Element and attribute
//! names keep only their local part; namespace prefixes are dropped.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ParseError;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Follows a `/`-separated path of child names. `*` matches any child.
    pub fn at(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .filter(|step| !step.is_empty())
            .try_fold(self, |element, step| {
                if step == "*" {
                    element.children.first()
                } else {
                    element.child(step)
                }
            })
    }

    /// Trimmed text at `path`, `None` when missing or blank.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.at(path).and_then(XmlElement::text)
    }

    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// All descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First descendant named `name`, depth-first, excluding `self`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.descendants().find(|element| element.name == name)
    }
}

/// Lazy depth-first walk returned by [`XmlElement::descendants`].
#[derive(Debug, Clone)]
pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

fn utf8<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str, ParseError> {
    std::str::from_utf8(bytes)
        .map_err(|_| ParseError::malformed(format!("{} is not valid UTF-8", what)))
}

fn open_element(start: &BytesStart<'_>) -> Result<XmlElement, ParseError> {
    let name = utf8(start.local_name().as_ref(), "element name")?.to_string();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|err| ParseError::malformed(format!("bad attribute on <{}>: {}", name, err)))?;
        let key = utf8(attribute.key.local_name().as_ref(), "attribute name")?.to_string();
        let value = attribute
            .unescape_value()
            .map_err(|err| ParseError::malformed(format!("bad attribute value on <{}>: {}", name, err)))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn append_text(stack: &mut [XmlElement], text: Cow<'_, str>) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(element) => {
            element.text.push_str(&text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ParseError::malformed("text outside the root element")),
    }
}

fn close_element(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ParseError::malformed("more than one root element")),
    }
    Ok(())
}

/// Parses a complete document. The text must already be decoded.
pub fn parse_tree(text: &str) -> Result<XmlElement, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            ParseError::malformed(format!(
                "XML error at byte {}: {}",
                reader.buffer_position(),
                err
            ))
        })?;

        match event {
            Event::Start(start) => {
                if root.is_some() && stack.is_empty() {
                    return Err(ParseError::malformed("more than one root element"));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::malformed("element nesting too deep"));
                }
                stack.push(open_element(&start)?);
            }
            Event::Empty(start) => {
                let element = open_element(&start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(end) => {
                let local_name = end.local_name();
                let name = utf8(local_name.as_ref(), "element name")?;
                let element = stack.pop().ok_or_else(|| {
                    ParseError::malformed(format!("unexpected closing tag </{}>", name))
                })?;
                if element.name != name {
                    return Err(ParseError::malformed(format!(
                        "closing tag </{}> does not match <{}>",
                        name, element.name
                    )));
                }
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|err| ParseError::malformed(format!("bad text content: {}", err)))?;
                append_text(&mut stack, text)?;
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                let text = utf8(&bytes, "CDATA section")?.to_string();
                append_text(&mut stack, Cow::Owned(text))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| ParseError::malformed("no root element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree_with_local_names() {
        let tree = parse_tree(
            r#"<?xml version="1.0"?>
            <ns:root xmlns:ns="urn:x"><ns:a Id="k1"><b>  one &amp; two </b></ns:a><c/></ns:root>"#,
        )
        .unwrap();

        assert_eq!(tree.name, "root");
        assert_eq!(tree.at("a").unwrap().attribute("Id"), Some("k1"));
        assert_eq!(tree.text_at("a/b"), Some("one & two"));
        assert!(tree.child("c").is_some());
        assert_eq!(tree.text_at("c"), None);
    }

    #[test]
    fn wildcard_step_takes_first_child() {
        let tree = parse_tree("<imp><ICMS><ICMS00><vICMS>1.00</vICMS></ICMS00></ICMS></imp>")
            .unwrap();
        assert_eq!(tree.text_at("ICMS/*/vICMS"), Some("1.00"));
    }

    #[test]
    fn descendants_are_in_document_order() {
        let tree = parse_tree("<r><a><k>1</k></a><k>2</k><b><k>3</k></b></r>").unwrap();
        let keys: Vec<&str> = tree
            .descendants()
            .filter(|e| e.name == "k")
            .filter_map(XmlElement::text)
            .collect();
        assert_eq!(keys, vec!["1", "2", "3"]);
    }

    #[test]
    fn find_stops_at_first_match() {
        let tree = parse_tree("<r><a><k>1</k></a><k>2</k></r>").unwrap();
        assert_eq!(tree.find("k").and_then(XmlElement::text), Some("1"));
        assert!(tree.find("missing").is_none());

        let mut walk = tree.descendants();
        assert_eq!(walk.next().map(|e| e.name.as_str()), Some("a"));
        assert_eq!(walk.next().map(|e| e.name.as_str()), Some("k"));
    }

    #[test]
    fn cdata_is_text() {
        let tree = parse_tree("<r><x><![CDATA[a < b]]></x></r>").unwrap();
        assert_eq!(tree.text_at("x"), Some("a < b"));
    }

    #[test]
    fn rejects_broken_structure() {
        for input in [
            "<a><b></a>",
            "<a><b></b>",
            "<a></a><b></b>",
            "</a>",
            "<a></a>trailing",
        ] {
            assert!(
                matches!(parse_tree(input), Err(ParseError::MalformedInput { .. })),
                "accepted {:?}",
                input
            );
        }
    }
}
