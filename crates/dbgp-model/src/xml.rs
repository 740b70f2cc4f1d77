//! A small generic tree-builder shared by every decoder in this crate:
//! collects every element named `tag_name` into a tree, nested exactly as
//! it is in the document, ignoring everything else (wrapping `<response>`
//! elements, XML namespaces on other tags, …).

use base64::Engine as _;
use dbgp_wire::DbgpError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

pub(crate) struct RawNode {
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<RawNode>,
}

impl RawNode {
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

pub(crate) fn local_name(tag: &BytesStart<'_>) -> String {
    let full = String::from_utf8_lossy(tag.name().as_ref());
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn collect_attrs(tag: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Vec<(String, String)> {
    tag.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr.decode_and_unescape_value(reader.decoder()).map(|v| v.into_owned()).unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn push_node(stack: &mut Vec<RawNode>, roots: &mut Vec<RawNode>, node: RawNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Collect every `<tag_name>` element in `xml`, nested as in the document.
pub(crate) fn parse_nodes(xml: &[u8], tag_name: &str) -> Result<Vec<RawNode>, DbgpError> {
    let text = std::str::from_utf8(xml).map_err(|e| DbgpError::ParseError(format!("body is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<RawNode> = Vec::new();
    let mut roots: Vec<RawNode> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| DbgpError::ParseError(format!("invalid XML: {e}")))? {
            Event::Eof => break,
            Event::Start(tag) => {
                if local_name(&tag) == tag_name {
                    stack.push(RawNode { attrs: collect_attrs(&tag, &reader), text: String::new(), children: Vec::new() });
                }
            }
            Event::Empty(tag) => {
                if local_name(&tag) == tag_name {
                    let node = RawNode { attrs: collect_attrs(&tag, &reader), text: String::new(), children: Vec::new() };
                    push_node(&mut stack, &mut roots, node);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text.unescape().map(|c| c.into_owned()).unwrap_or_default();
                    top.text.push_str(&decoded);
                }
            }
            Event::End(tag) => {
                if local_name(&tag) == tag_name {
                    if let Some(node) = stack.pop() {
                        push_node(&mut stack, &mut roots, node);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(roots)
}

/// Decode a property/eval-result's text content, transparently
/// base64-decoding it when `encoding="base64"`.
pub(crate) fn decode_value(encoding: Option<&str>, raw: &str) -> String {
    if encoding == Some("base64") {
        match base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => raw.to_string(),
        }
    } else {
        raw.to_string()
    }
}
