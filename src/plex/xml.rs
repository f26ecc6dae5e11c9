//! Streaming driver for Plex `MediaContainer` XML.
//!
//! Handlers receive `start`/`end` callbacks keyed by element name and build
//! their records incrementally; self-closing elements produce both calls.
//! The driver owns the envelope rules: a document without a
//! `MediaContainer`, or one that ends before the container closes, is a
//! parse error.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

pub const CONTAINER: &str = "MediaContainer";

/// Attributes of one element, copied out of the reader buffer.
#[derive(Debug, Default, Clone)]
pub struct Attrs {
    pairs: Vec<(String, String)>,
}

impl Attrs {
    fn from_element(e: &BytesStart<'_>) -> Result<Self> {
        let mut pairs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::parse(format!("bad attribute: {}", err)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| Error::parse(format!("bad value for '{}': {}", key, err)))?
                .into_owned();
            pairs.push((key, value));
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty string value.
    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// String value, empty when absent.
    pub fn text(&self, key: &str) -> String {
        self.string(key).unwrap_or_default()
    }

    pub fn u64_or_zero(&self, key: &str) -> u64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn i32_opt(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn f64_opt(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn f64_or_zero(&self, key: &str) -> f64 {
        self.f64_opt(key).unwrap_or(0.0)
    }

    /// Plex writes booleans as `1`/`0`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1") | Some("true"))
    }
}

pub trait XmlHandler {
    /// `depth` is the number of open ancestors; the container itself sits at 0
    /// in a well-formed Plex response.
    fn start(&mut self, name: &str, attrs: &Attrs, depth: usize);
    fn end(&mut self, name: &str, depth: usize);
}

/// Feed every element of `bytes` to `handler`, enforcing the envelope.
pub fn parse_document<H: XmlHandler>(bytes: &[u8], handler: &mut H) -> Result<()> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut container_seen = false;
    let mut container_closed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = Attrs::from_element(e)?;
                if name == CONTAINER {
                    container_seen = true;
                }
                handler.start(&name, &attrs, stack.len());
                stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = Attrs::from_element(e)?;
                let depth = stack.len();
                handler.start(&name, &attrs, depth);
                handler.end(&name, depth);
                if name == CONTAINER {
                    container_seen = true;
                    container_closed = true;
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.pop();
                handler.end(&name, stack.len());
                if name == CONTAINER {
                    container_closed = true;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::parse(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !container_seen {
        return Err(Error::parse("response has no MediaContainer element"));
    }
    if !container_closed {
        return Err(Error::parse("response ended before MediaContainer closed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl XmlHandler for Recorder {
        fn start(&mut self, name: &str, _attrs: &Attrs, depth: usize) {
            self.events.push(format!("+{}@{}", name, depth));
        }
        fn end(&mut self, name: &str, depth: usize) {
            self.events.push(format!("-{}@{}", name, depth));
        }
    }

    #[test]
    fn self_closing_elements_emit_start_and_end() {
        let xml = br#"<?xml version="1.0"?><MediaContainer size="1"><Video ratingKey="1"><User id="2"/></Video></MediaContainer>"#;
        let mut rec = Recorder::default();
        parse_document(xml, &mut rec).unwrap();
        assert_eq!(
            rec.events,
            vec![
                "+MediaContainer@0",
                "+Video@1",
                "+User@2",
                "-User@2",
                "-Video@1",
                "-MediaContainer@0"
            ]
        );
    }

    #[test]
    fn missing_container_is_an_error() {
        let mut rec = Recorder::default();
        let err = parse_document(br#"<Response status="ok"/>"#, &mut rec).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn truncated_container_is_an_error() {
        let mut rec = Recorder::default();
        let err =
            parse_document(br#"<MediaContainer size="1"><Video ratingKey="1">"#, &mut rec)
                .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn empty_self_closing_container_is_fine() {
        let mut rec = Recorder::default();
        parse_document(br#"<MediaContainer size="0"/>"#, &mut rec).unwrap();
        assert_eq!(rec.events, vec!["+MediaContainer@0", "-MediaContainer@0"]);
    }

    #[test]
    fn lenient_attribute_access() {
        let attrs = Attrs {
            pairs: vec![
                ("duration".to_string(), "7800000".to_string()),
                ("year".to_string(), "".to_string()),
                ("local".to_string(), "1".to_string()),
            ],
        };
        assert_eq!(attrs.u64_or_zero("duration"), 7_800_000);
        assert_eq!(attrs.u64_or_zero("viewOffset"), 0);
        assert_eq!(attrs.i32_opt("year"), None);
        assert_eq!(attrs.string("year"), None);
        assert!(attrs.flag("local"));
        assert!(!attrs.flag("secure"));
    }
}
