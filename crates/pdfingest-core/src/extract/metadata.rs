//! Document metadata from the `/Info` dictionary and the catalog's XMP
//! packet

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::encoding::decode_text_string;
use crate::parser::{Object, ParsedDocument};

/// Where a metadata value came from. Higher priority wins on duplicates
/// regardless of the order sources are read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    Info = 1,
    /// `dc:subject`, used for Keywords only when `pdf:Keywords` is absent
    XmpSubject = 2,
    Xmp = 3,
}

/// XMP properties, the Info key each maps onto and its priority
const XMP_PROPERTIES: &[(&str, &str, Source)] = &[
    ("dc:title", "Title", Source::Xmp),
    ("dc:creator", "Author", Source::Xmp),
    ("dc:description", "Subject", Source::Xmp),
    ("dc:subject", "Keywords", Source::XmpSubject),
    ("pdf:Keywords", "Keywords", Source::Xmp),
    ("pdf:Producer", "Producer", Source::Xmp),
    ("xmp:CreatorTool", "Creator", Source::Xmp),
    ("xmp:CreateDate", "CreationDate", Source::Xmp),
    ("xmp:ModifyDate", "ModDate", Source::Xmp),
];

fn info_key(qualified: &[u8]) -> Option<(&'static str, Source)> {
    XMP_PROPERTIES
        .iter()
        .find(|(name, _, _)| name.as_bytes() == qualified)
        .map(|(_, key, source)| (*key, *source))
}

/// One mapped XMP value
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmpValue {
    pub key: &'static str,
    source: Source,
    pub value: String,
}

#[derive(Debug, Default)]
struct Collected {
    values: BTreeMap<String, (Source, String)>,
}

impl Collected {
    fn offer(&mut self, key: &str, value: String, source: Source) {
        let value = value.trim().to_string();
        if value.is_empty() {
            return;
        }
        match self.values.get(key) {
            Some((existing, _)) if *existing > source => {}
            _ => {
                self.values.insert(key.to_string(), (source, value));
            }
        }
    }

    fn into_map(self) -> BTreeMap<String, String> {
        self.values.into_iter().map(|(k, (_, v))| (k, v)).collect()
    }
}

/// Merged metadata. XMP values override the Info keys they map onto;
/// other Info keys pass through.
pub(crate) fn extract_metadata(doc: &ParsedDocument<'_>) -> BTreeMap<String, String> {
    let mut collected = Collected::default();

    if let Some(xml) = xmp_packet(doc) {
        for property in parse_xmp(&xml) {
            collected.offer(property.key, property.value, property.source);
        }
    }

    if let Some(info) = doc.info() {
        for (key, value) in info.iter() {
            let text = match doc.resolve(value) {
                Object::String(bytes) => decode_text_string(bytes),
                Object::Name(name) => name.clone(),
                Object::Integer(n) => n.to_string(),
                Object::Real(f) => f.to_string(),
                Object::Boolean(b) => b.to_string(),
                _ => continue,
            };
            collected.offer(key, text, Source::Info);
        }
    }

    collected.into_map()
}

fn xmp_packet(doc: &ParsedDocument<'_>) -> Option<String> {
    let stream = doc.dict_get(doc.catalog(), "Metadata")?.as_stream()?;
    match doc.decode_stream(stream) {
        Ok(data) => Some(String::from_utf8_lossy(&data).into_owned()),
        Err(e) => {
            debug!(error = %e, "Undecodable XMP stream ignored");
            None
        }
    }
}

/// Open property element and the values gathered inside it
struct OpenProperty {
    key: &'static str,
    source: Source,
    depth: usize,
    /// `rdf:Alt` keeps the first alternative only
    alternative: bool,
    values: Vec<String>,
}

/// Mapped properties in document order. Malformed XML yields whatever was
/// read before the error.
pub(crate) fn parse_xmp(xml: &str) -> Vec<XmpValue> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<OpenProperty> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                attribute_properties(&e, &mut found);
                match open.as_mut() {
                    Some(property) => {
                        if e.name().as_ref() == b"rdf:Alt" {
                            property.alternative = true;
                        }
                    }
                    None => {
                        if let Some((key, source)) = info_key(e.name().as_ref()) {
                            open = Some(OpenProperty {
                                key,
                                source,
                                depth,
                                alternative: false,
                                values: Vec::new(),
                            });
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => attribute_properties(&e, &mut found),
            Ok(Event::Text(t)) => {
                if let (Some(property), Ok(text)) = (open.as_mut(), t.unescape()) {
                    property.values.push(text.into_owned());
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(property) = open.as_mut() {
                    property.values.push(String::from_utf8_lossy(&c.into_inner()).into_owned());
                }
            }
            Ok(Event::End(_)) => {
                if open.as_ref().is_some_and(|p| p.depth == depth) {
                    if let Some(property) = open.take() {
                        let value = if property.alternative {
                            property.values.into_iter().next().unwrap_or_default()
                        } else {
                            property.values.join(", ")
                        };
                        found.push(XmpValue {
                            key: property.key,
                            source: property.source,
                            value,
                        });
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(error = %e, position = reader.buffer_position(), "Malformed XMP, keeping partial metadata");
                break;
            }
            _ => {}
        }
    }

    found
}

/// Properties written in attribute form, e.g.
/// `<rdf:Description pdf:Producer="...">`
fn attribute_properties(element: &BytesStart<'_>, found: &mut Vec<XmpValue>) {
    for attribute in element.attributes().flatten() {
        if let Some((key, source)) = info_key(attribute.key.as_ref()) {
            if let Ok(value) = attribute.unescape_value() {
                found.push(XmpValue {
                    key,
                    source,
                    value: value.into_owned(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PACKET: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:pdf="http://ns.adobe.com/pdf/1.3/"
        xmlns:xmp="http://ns.adobe.com/xap/1.0/"
        pdf:Producer="Typesetter 2.1"
        xmp:CreateDate="2024-03-01T10:00:00Z">
      <dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">
        <rdf:Alt>
          <rdf:li xml:lang="x-default">Design &amp; Drawings</rdf:li>
          <rdf:li xml:lang="de">Entwurf</rdf:li>
        </rdf:Alt>
      </dc:title>
      <dc:creator xmlns:dc="http://purl.org/dc/elements/1.1/">
        <rdf:Seq>
          <rdf:li>Ada</rdf:li>
          <rdf:li>Grace</rdf:li>
        </rdf:Seq>
      </dc:creator>
      <xmp:CreatorTool><![CDATA[Editor <beta>]]></xmp:CreatorTool>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn test_xmp_elements_and_attributes() {
        let found: BTreeMap<_, _> = parse_xmp(PACKET).into_iter().map(|p| (p.key, p.value)).collect();
        assert_eq!(found.get("Producer").map(String::as_str), Some("Typesetter 2.1"));
        assert_eq!(found.get("CreationDate").map(String::as_str), Some("2024-03-01T10:00:00Z"));
        assert_eq!(found.get("Title").map(String::as_str), Some("Design & Drawings"));
        assert_eq!(found.get("Author").map(String::as_str), Some("Ada, Grace"));
        assert_eq!(found.get("Creator").map(String::as_str), Some("Editor <beta>"));
    }

    #[test]
    fn test_malformed_xmp_keeps_prefix() {
        let xml = "<x><pdf:Producer>Maker</pdf:Producer><dc:title><oops></x>";
        let found = parse_xmp(xml);
        assert_eq!(found.first().map(|p| (p.key, p.value.as_str())), Some(("Producer", "Maker")));
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_order() {
        let mut collected = Collected::default();
        collected.offer("Title", "From XMP".into(), Source::Xmp);
        collected.offer("Title", "From Info".into(), Source::Info);
        collected.offer("Custom", "kept".into(), Source::Info);
        collected.offer("Empty", "   ".into(), Source::Info);

        let map = collected.into_map();
        assert_eq!(map.get("Title").map(String::as_str), Some("From XMP"));
        assert_eq!(map.get("Custom").map(String::as_str), Some("kept"));
        assert!(!map.contains_key("Empty"));
    }

    fn merged_keywords(xml: &str) -> Option<String> {
        let mut collected = Collected::default();
        for property in parse_xmp(xml) {
            collected.offer(property.key, property.value, property.source);
        }
        collected.into_map().remove("Keywords")
    }

    #[test]
    fn test_pdf_keywords_win_over_dc_subject_in_either_order() {
        let subject = "<dc:subject><rdf:Bag><rdf:li>maps</rdf:li><rdf:li>survey</rdf:li></rdf:Bag></dc:subject>";
        let keywords = "<pdf:Keywords>cartography</pdf:Keywords>";

        let subject_first = format!("<x>{}{}</x>", subject, keywords);
        let keywords_first = format!("<x>{}{}</x>", keywords, subject);
        assert_eq!(merged_keywords(&subject_first).as_deref(), Some("cartography"));
        assert_eq!(merged_keywords(&keywords_first).as_deref(), Some("cartography"));

        let subject_only = format!("<x>{}</x>", subject);
        assert_eq!(merged_keywords(&subject_only).as_deref(), Some("maps, survey"));
    }
}
