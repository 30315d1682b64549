//! Streaming XML scanning with byte offsets.
//!
//! Elements are located with quick-xml over the input text so that
//! callers can slice and splice the exact serialization they were given.

use std::borrow::Cow;
use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::error::PkiError;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// An attribute with entities expanded and literal whitespace normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribute {
    pub qname: String,
    pub value: String,
}

impl Attribute {
    pub fn prefix(&self) -> Option<&str> {
        self.qname.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn local_name(&self) -> &str {
        self.qname
            .split_once(':')
            .map_or(self.qname.as_str(), |(_, local)| local)
    }
}

/// A start tag split into namespace declarations and ordinary attributes.
#[derive(Debug, Clone)]
pub(crate) struct StartTag {
    pub qname: String,
    /// `(prefix, uri)`; the default namespace has an empty prefix.
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
}

impl StartTag {
    pub fn parse(tag: &BytesStart<'_>) -> Result<Self, PkiError> {
        let name = tag.name();
        let qname = std::str::from_utf8(name.as_ref())
            .map_err(PkiError::document)?
            .to_string();

        let mut namespaces = Vec::new();
        let mut attributes = Vec::new();
        for attr in tag.attributes() {
            let attr = attr.map_err(PkiError::document)?;
            let key = std::str::from_utf8(attr.key.as_ref()).map_err(PkiError::document)?;
            let raw = std::str::from_utf8(&attr.value).map_err(PkiError::document)?;
            let value = attribute_value(raw)?;
            if key == "xmlns" {
                namespaces.push((String::new(), value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                namespaces.push((prefix.to_string(), value));
            } else {
                attributes.push(Attribute {
                    qname: key.to_string(),
                    value,
                });
            }
        }

        Ok(Self {
            qname,
            namespaces,
            attributes,
        })
    }

    pub fn prefix(&self) -> Option<&str> {
        self.qname.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn local_name(&self) -> &str {
        self.qname
            .split_once(':')
            .map_or(self.qname.as_str(), |(_, local)| local)
    }
}

/// Namespace declarations of the currently open elements.
#[derive(Debug, Default)]
pub(crate) struct NamespaceScope {
    frames: Vec<Vec<(String, String)>>,
}

impl NamespaceScope {
    pub fn push(&mut self, declarations: Vec<(String, String)>) {
        self.frames.push(declarations);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Namespace URI bound to `prefix` (empty for the default namespace).
    ///
    /// `None` for an unbound prefix or an empty default namespace.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NS);
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Every declaration visible at the innermost element.
    pub fn in_scope(&self) -> BTreeMap<String, String> {
        let mut visible = BTreeMap::new();
        for frame in &self.frames {
            for (prefix, uri) in frame {
                visible.insert(prefix.clone(), uri.clone());
            }
        }
        visible
    }

    /// Namespace URI of an element, failing on an unbound prefix.
    pub fn element_namespace(&self, tag: &StartTag) -> Result<Option<String>, PkiError> {
        match tag.prefix() {
            Some(prefix) => self
                .resolve(prefix)
                .map(|uri| Some(uri.to_string()))
                .ok_or_else(|| {
                    PkiError::MalformedDocument(format!("undeclared namespace prefix `{prefix}`"))
                }),
            None => Ok(self.resolve("").map(str::to_string)),
        }
    }
}

/// Where an element sits in the source text.
///
/// `source[start..end]` is the whole element; for a non-empty element
/// `source[content_start..close_start]` is its content and
/// `source[close_start..end]` its close tag.
#[derive(Debug, Clone)]
pub(crate) struct ElementSpan {
    pub qname: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub start: usize,
    pub content_start: usize,
    pub close_start: usize,
    pub end: usize,
    pub self_closing: bool,
}

impl ElementSpan {
    pub fn attribute(&self, qname: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.qname == qname)
            .map(|attr| attr.value.as_str())
    }

    pub fn is_dsig(&self, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(XMLDSIG_NS)
    }

    /// Whether `other` lies strictly inside this element.
    pub fn contains(&self, other: &ElementSpan) -> bool {
        other.start > self.start && other.end <= self.end
    }

    /// Character content with entities expanded.
    pub fn text(&self, source: &str) -> Result<String, PkiError> {
        let raw = &source[self.content_start..self.close_start];
        unescape(raw)
            .map(Cow::into_owned)
            .map_err(PkiError::document)
    }
}

/// Parse `source` and return every element in document order.
pub(crate) fn scan(source: &str) -> Result<Vec<ElementSpan>, PkiError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let mut scope = NamespaceScope::default();
    let mut spans: Vec<ElementSpan> = Vec::new();
    let mut open: Vec<usize> = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| parse_error(e, reader.error_position() as usize))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(tag) => {
                let tag = StartTag::parse(&tag)?;
                scope.push(tag.namespaces.clone());
                spans.push(span(&scope, tag, start, end, false)?);
                open.push(spans.len() - 1);
            }
            Event::Empty(tag) => {
                let tag = StartTag::parse(&tag)?;
                scope.push(tag.namespaces.clone());
                let span = span(&scope, tag, start, end, true);
                scope.pop();
                spans.push(span?);
            }
            Event::End(_) => {
                let index = open.pop().ok_or_else(|| {
                    PkiError::MalformedDocument(format!("unexpected close tag at byte {start}"))
                })?;
                scope.pop();
                spans[index].close_start = start;
                spans[index].end = end;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(&index) = open.last() {
        return Err(PkiError::MalformedDocument(format!(
            "element <{}> is never closed",
            spans[index].qname
        )));
    }
    if spans.is_empty() {
        return Err(PkiError::MalformedDocument("document has no elements".into()));
    }
    Ok(spans)
}

fn span(
    scope: &NamespaceScope,
    tag: StartTag,
    start: usize,
    end: usize,
    self_closing: bool,
) -> Result<ElementSpan, PkiError> {
    let namespace = scope.element_namespace(&tag)?;
    Ok(ElementSpan {
        local_name: tag.local_name().to_string(),
        qname: tag.qname,
        namespace,
        attributes: tag.attributes,
        start,
        content_start: end,
        close_start: end,
        end,
        self_closing,
    })
}

pub(crate) fn parse_error(err: quick_xml::Error, position: usize) -> PkiError {
    PkiError::MalformedDocument(format!("{err} at byte {position}"))
}

/// Attribute value normalization: literal whitespace becomes a space
/// (a CR LF pair counts once), then references are expanded.
pub(crate) fn attribute_value(raw: &str) -> Result<String, PkiError> {
    let literal = raw.replace("\r\n", " ").replace(['\r', '\n', '\t'], " ");
    unescape(&literal)
        .map(Cow::into_owned)
        .map_err(PkiError::document)
}

/// Normalize CR LF and lone CR line endings to LF.
pub(crate) fn normalize_line_endings(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_exact_offsets() {
        let doc = r#"<?xml version="1.0"?>
<NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="NFe1"><a/></infNFe></NFe>"#;
        let spans = scan(doc).unwrap();
        let inf = spans.iter().find(|s| s.local_name == "infNFe").unwrap();
        assert_eq!(
            &doc[inf.start..inf.end],
            r#"<infNFe Id="NFe1"><a/></infNFe>"#
        );
        assert_eq!(&doc[inf.close_start..inf.end], "</infNFe>");
        assert_eq!(&doc[inf.content_start..inf.close_start], "<a/>");
        assert_eq!(
            inf.namespace.as_deref(),
            Some("http://www.portalfiscal.inf.br/nfe")
        );
        assert_eq!(inf.attribute("Id"), Some("NFe1"));
    }

    #[test]
    fn nested_same_name_elements_close_correctly() {
        let doc = "<r><x Id=\"outer\"><x>inner</x> tail</x></r>";
        let spans = scan(doc).unwrap();
        let outer = &spans[1];
        assert_eq!(&doc[outer.start..outer.end], "<x Id=\"outer\"><x>inner</x> tail</x>");
        let inner = &spans[2];
        assert_eq!(&doc[inner.start..inner.end], "<x>inner</x>");
        assert!(outer.contains(inner));
    }

    #[test]
    fn self_closing_span() {
        let doc = "<r><x Id=\"a\" /></r>";
        let spans = scan(doc).unwrap();
        assert!(spans[1].self_closing);
        assert_eq!(&doc[spans[1].start..spans[1].end], "<x Id=\"a\" />");
    }

    #[test]
    fn prefixed_elements_resolve_namespace() {
        let doc = r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Signature/></r>"#;
        let spans = scan(doc).unwrap();
        assert!(spans[1].is_dsig("Signature"));
        assert!(!spans[0].is_dsig("Signature"));
    }

    #[test]
    fn mismatched_close_tag_is_malformed() {
        let err = scan("<a><b></a></b>").unwrap_err();
        assert!(matches!(err, PkiError::MalformedDocument(_)), "got {err:?}");
    }

    #[test]
    fn unclosed_element_is_malformed() {
        let err = scan("<a><b></b>").unwrap_err();
        assert!(matches!(err, PkiError::MalformedDocument(_)), "got {err:?}");
    }

    #[test]
    fn undeclared_prefix_is_malformed() {
        let err = scan("<a><p:b/></a>").unwrap_err();
        assert!(matches!(err, PkiError::MalformedDocument(_)), "got {err:?}");
    }

    #[test]
    fn attribute_values_are_normalized() {
        assert_eq!(attribute_value("a\r\nb\tc").unwrap(), "a b c");
        assert_eq!(attribute_value("&lt;&#x9;&amp;").unwrap(), "<\t&");
    }

    #[test]
    fn text_expands_entities() {
        let doc = "<r><v>A &amp; B &#x32;</v></r>";
        let spans = scan(doc).unwrap();
        assert_eq!(spans[1].text(doc).unwrap(), "A & B 2");
    }
}
