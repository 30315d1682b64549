//! Inclusive Canonical XML 1.0 without comments.
//!
//! Canonicalizes one element subtree of a larger document. The whole
//! document is streamed so that namespace declarations and `xml:*`
//! attributes inherited from ancestors are rendered on the apex element,
//! exactly as a verifier that parses the full document would see them.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;

use crate::error::PkiError;
use crate::xml::{Attribute, NamespaceScope, StartTag, normalize_line_endings, parse_error};

pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

/// Canonical form of the element starting at byte `apex_start`.
pub fn canonicalize(xml: &str, apex_start: usize) -> Result<String, PkiError> {
    Canonicalizer::new(apex_start, None).run(xml)
}

/// Canonical form of the element starting at `apex_start` with the
/// enveloped-signature transform applied: the signature element starting
/// at `signature_start` is left out.
pub fn canonicalize_enveloped(
    xml: &str,
    apex_start: usize,
    signature_start: usize,
) -> Result<String, PkiError> {
    Canonicalizer::new(apex_start, Some(signature_start)).run(xml)
}

struct Canonicalizer {
    apex_start: usize,
    excluded_start: Option<usize>,
    scope: NamespaceScope,
    /// `xml:*` attributes of the open ancestors of the apex.
    ancestor_xml_attrs: Vec<Vec<Attribute>>,
    /// Namespace declarations rendered so far, one frame per open output element.
    rendered: Vec<BTreeMap<String, String>>,
    open_names: Vec<String>,
    /// Elements open inside the excluded subtree.
    skipping: usize,
    finished: bool,
    out: String,
}

impl Canonicalizer {
    fn new(apex_start: usize, excluded_start: Option<usize>) -> Self {
        Self {
            apex_start,
            excluded_start,
            scope: NamespaceScope::default(),
            ancestor_xml_attrs: Vec::new(),
            rendered: Vec::new(),
            open_names: Vec::new(),
            skipping: 0,
            finished: false,
            out: String::new(),
        }
    }

    fn run(mut self, xml: &str) -> Result<String, PkiError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader
                .read_event()
                .map_err(|e| parse_error(e, reader.error_position() as usize))?;

            match event {
                Event::Start(tag) => self.open(StartTag::parse(&tag)?, start, false)?,
                Event::Empty(tag) => self.open(StartTag::parse(&tag)?, start, true)?,
                Event::End(_) => self.close(),
                Event::Text(text) if self.rendering() => {
                    let raw = std::str::from_utf8(&text).map_err(PkiError::document)?;
                    let normalized = normalize_line_endings(raw);
                    let value = unescape(&normalized).map_err(PkiError::document)?;
                    escape_text(&value, &mut self.out);
                }
                Event::CData(data) if self.rendering() => {
                    let raw = std::str::from_utf8(&data).map_err(PkiError::document)?;
                    escape_text(&normalize_line_endings(raw), &mut self.out);
                }
                Event::PI(pi) if self.rendering() => {
                    let target = std::str::from_utf8(pi.target()).map_err(PkiError::document)?;
                    let content = std::str::from_utf8(pi.content())
                        .map_err(PkiError::document)?
                        .trim_start();
                    self.out.push_str("<?");
                    self.out.push_str(target);
                    if !content.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(&normalize_line_endings(content));
                    }
                    self.out.push_str("?>");
                }
                Event::Eof => break,
                _ => {}
            }

            if self.finished {
                return Ok(self.out);
            }
        }

        Err(PkiError::MalformedDocument(format!(
            "no complete element starts at byte {}",
            self.apex_start
        )))
    }

    fn rendering(&self) -> bool {
        !self.open_names.is_empty() && self.skipping == 0
    }

    fn open(&mut self, tag: StartTag, start: usize, empty: bool) -> Result<(), PkiError> {
        self.scope.push(tag.namespaces.clone());

        let outside = self.open_names.is_empty() && start != self.apex_start;
        let excluded = self.skipping > 0
            || (!self.open_names.is_empty() && Some(start) == self.excluded_start);
        if outside || excluded {
            if empty {
                self.scope.pop();
            } else if excluded {
                self.skipping += 1;
            } else {
                self.ancestor_xml_attrs.push(
                    tag.attributes
                        .iter()
                        .filter(|attr| attr.prefix() == Some("xml"))
                        .cloned()
                        .collect(),
                );
            }
            return Ok(());
        }

        let is_apex = self.open_names.is_empty();
        let rendered = self.render_start(&tag, is_apex)?;
        if empty {
            self.scope.pop();
            self.out.push_str("</");
            self.out.push_str(&tag.qname);
            self.out.push('>');
            self.finished = is_apex;
        } else {
            self.rendered.push(rendered);
            self.open_names.push(tag.qname);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.scope.pop();
        if self.skipping > 0 {
            self.skipping -= 1;
            return;
        }
        match self.open_names.pop() {
            Some(qname) => {
                self.rendered.pop();
                self.out.push_str("</");
                self.out.push_str(&qname);
                self.out.push('>');
                self.finished = self.open_names.is_empty();
            }
            None => {
                self.ancestor_xml_attrs.pop();
            }
        }
    }

    /// Write the start tag and return the namespace declarations now in
    /// effect for the output.
    fn render_start(
        &mut self,
        tag: &StartTag,
        is_apex: bool,
    ) -> Result<BTreeMap<String, String>, PkiError> {
        let mut visible = self.scope.in_scope();
        visible.remove("xml");

        let no_parent = BTreeMap::new();
        let parent = self.rendered.last().unwrap_or(&no_parent);

        self.out.push('<');
        self.out.push_str(&tag.qname);

        // BTreeMap order puts the default namespace (empty prefix) first.
        for (prefix, uri) in &visible {
            let inherited = parent.get(prefix);
            let emit = if uri.is_empty() {
                inherited.is_some()
            } else {
                inherited != Some(uri)
            };
            if !emit {
                continue;
            }
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, &mut self.out);
            self.out.push('"');
        }

        let mut attributes = tag.attributes.clone();
        if is_apex {
            for inherited in self.inherited_xml_attributes() {
                if !attributes.iter().any(|attr| attr.qname == inherited.qname) {
                    attributes.push(inherited);
                }
            }
        }

        let mut keyed = Vec::with_capacity(attributes.len());
        for attr in attributes {
            let namespace = match attr.prefix() {
                None => String::new(),
                Some(prefix) => self
                    .scope
                    .resolve(prefix)
                    .ok_or_else(|| {
                        PkiError::MalformedDocument(format!(
                            "undeclared namespace prefix `{prefix}`"
                        ))
                    })?
                    .to_string(),
            };
            keyed.push((namespace, attr));
        }
        keyed.sort_by(|(ns_a, a), (ns_b, b)| {
            ns_a.cmp(ns_b).then_with(|| a.local_name().cmp(b.local_name()))
        });

        for (_, attr) in &keyed {
            self.out.push(' ');
            self.out.push_str(&attr.qname);
            self.out.push_str("=\"");
            escape_attribute(&attr.value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        visible.retain(|_, uri| !uri.is_empty());
        Ok(visible)
    }

    /// Nearest-ancestor value of every `xml:*` attribute.
    fn inherited_xml_attributes(&self) -> Vec<Attribute> {
        let mut merged: BTreeMap<&str, &Attribute> = BTreeMap::new();
        for frame in &self.ancestor_xml_attrs {
            for attr in frame {
                merged.insert(attr.qname.as_str(), attr);
            }
        }
        merged.into_values().cloned().collect()
    }
}

fn escape_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
