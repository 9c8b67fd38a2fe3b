//! Pull-parsing cursor over an XML document
//!
//! The markup decoders only care about a handful of element types (a
//! trackpoint, a sample, a lap or segment boundary). This cursor streams the
//! document and hands back either a flattened copy of a requested element's
//! subtree or a notification that a boundary element was opened, so memory
//! use stays proportional to one point rather than the whole file.

use crate::types::{DecoderError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

/// A text-bearing element inside a captured subtree
#[derive(Debug, Clone, PartialEq)]
pub struct XmlLeaf {
    /// Local name of the element (namespace prefix removed)
    pub name: String,
    /// Local name of the enclosing element
    pub parent: String,
    pub text: String,
}

/// A captured element subtree, flattened to its attributes and text leaves
#[derive(Debug, Clone, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub leaves: Vec<XmlLeaf>,
}

impl XmlNode {
    /// Attribute value by local name
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Text of the first leaf element with the given local name
    pub fn leaf(&self, name: &str) -> Option<&str> {
        self.leaves
            .iter()
            .find(|leaf| leaf.name == name)
            .map(|leaf| leaf.text.as_str())
    }
}

/// Item produced by [`MarkupCursor::next_item`]
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupItem {
    /// A boundary element was opened (its content is not consumed)
    Marker(String),
    /// A requested element, fully read
    Node(XmlNode),
}

/// Forward-only cursor over an XML stream
pub struct MarkupCursor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

enum Step {
    Continue,
    Eof,
    Marker(String),
    Capture {
        name: String,
        attributes: Vec<(String, String)>,
        is_empty: bool,
    },
}

fn xml_error(err: quick_xml::Error) -> DecoderError {
    DecoderError::DecodeError(format!("XML syntax error: {}", err))
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attributes_of(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            DecoderError::DecodeError(format!("XML attribute error: {}", err))
        })?;
        let key = local_name(attr.key.local_name().as_ref());
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn classify(e: &BytesStart<'_>, is_empty: bool, markers: &[&str], nodes: &[&str]) -> Result<Step> {
    let name = local_name(e.local_name().as_ref());
    if nodes.contains(&name.as_str()) {
        Ok(Step::Capture {
            attributes: attributes_of(e)?,
            name,
            is_empty,
        })
    } else if markers.contains(&name.as_str()) {
        Ok(Step::Marker(name))
    } else {
        Ok(Step::Continue)
    }
}

impl<R: BufRead> MarkupCursor<R> {
    pub fn new(reader: R) -> Self {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Read up to the document element and return its local name
    pub fn root(&mut self) -> Result<String> {
        loop {
            let name = match self.reader.read_event_into(&mut self.buf).map_err(xml_error)? {
                Event::Start(e) | Event::Empty(e) => Some(local_name(e.local_name().as_ref())),
                Event::Eof => {
                    return Err(DecoderError::DecodeError(
                        "document contains no root element".to_string(),
                    ))
                }
                _ => None,
            };
            self.buf.clear();
            if let Some(name) = name {
                return Ok(name);
            }
        }
    }

    /// Advance to the next element named in `markers` or `nodes`
    ///
    /// Marker elements are reported when opened; node elements are consumed
    /// to their closing tag and returned flattened. Returns `None` at the end
    /// of the document.
    pub fn next_item(&mut self, markers: &[&str], nodes: &[&str]) -> Result<Option<MarkupItem>> {
        loop {
            let step = match self.reader.read_event_into(&mut self.buf).map_err(xml_error)? {
                Event::Start(e) => classify(&e, false, markers, nodes)?,
                Event::Empty(e) => classify(&e, true, markers, nodes)?,
                Event::Eof => Step::Eof,
                _ => Step::Continue,
            };
            self.buf.clear();

            match step {
                Step::Continue => continue,
                Step::Eof => return Ok(None),
                Step::Marker(name) => return Ok(Some(MarkupItem::Marker(name))),
                Step::Capture {
                    name,
                    attributes,
                    is_empty,
                } => {
                    let leaves = if is_empty {
                        Vec::new()
                    } else {
                        self.read_leaves(&name)?
                    };
                    return Ok(Some(MarkupItem::Node(XmlNode {
                        name,
                        attributes,
                        leaves,
                    })));
                }
            }
        }
    }

    /// Consume the content of an opened element, collecting its text leaves
    fn read_leaves(&mut self, root: &str) -> Result<Vec<XmlLeaf>> {
        let mut stack = vec![root.to_string()];
        let mut leaves = Vec::new();

        while !stack.is_empty() {
            let text = match self.reader.read_event_into(&mut self.buf).map_err(xml_error)? {
                Event::Start(e) => {
                    stack.push(local_name(e.local_name().as_ref()));
                    None
                }
                Event::End(_) => {
                    stack.pop();
                    None
                }
                Event::Text(t) => Some(t.unescape().map_err(xml_error)?.into_owned()),
                Event::CData(c) => Some(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                Event::Eof => {
                    return Err(DecoderError::DecodeError(format!(
                        "document ends inside <{}>",
                        root
                    )))
                }
                _ => None,
            };
            self.buf.clear();

            if let Some(text) = text {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let depth = stack.len();
                let name = stack.last().cloned().unwrap_or_default();
                let parent = if depth >= 2 {
                    stack[depth - 2].clone()
                } else {
                    String::new()
                };
                leaves.push(XmlLeaf {
                    name,
                    parent,
                    text: text.to_string(),
                });
            }
        }

        Ok(leaves)
    }
}
