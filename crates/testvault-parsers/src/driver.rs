//! Streaming XML driver shared by every report adapter.

use crate::errors::{ParseError, ParseResult};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::io::BufRead;
use testvault_core::{Status, Tracker};

pub const DEFAULT_SUITE_NAME: &str = "Unnamed suite";

/// Attributes of one element, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlAttributes {
    entries: Vec<(String, String)>,
}

impl XmlAttributes {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn require(&self, element: &str, name: &str) -> ParseResult<&str> {
        self.get(name)
            .ok_or_else(|| ParseError::missing(element, name))
    }

    /// Integer attribute; absent counts as zero.
    pub fn count(&self, name: &str) -> ParseResult<i64> {
        match self.get(name) {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| ParseError::InvalidAttribute {
                attribute: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// A duration in (fractional) seconds, converted to whole milliseconds.
    pub fn millis(&self, name: &str) -> ParseResult<Option<i64>> {
        self.get(name)
            .map(|raw| seconds_to_millis(name, raw))
            .transpose()
    }
}

pub(crate) fn seconds_to_millis(attribute: &str, raw: &str) -> ParseResult<i64> {
    let seconds: f64 = raw
        .trim()
        .replace(',', "")
        .parse()
        .map_err(|_| ParseError::InvalidAttribute {
            attribute: attribute.to_string(),
            value: raw.to_string(),
        })?;
    Ok((seconds * 1000.0) as i64)
}

/// Suite outcome of JUnit-family reports: any error or failure fails the suite.
pub(crate) fn junit_suite_status(attributes: &XmlAttributes) -> ParseResult<Status> {
    if attributes.count("errors")? + attributes.count("failures")? == 0 {
        Ok(Status::Pass)
    } else {
        Ok(Status::Fail)
    }
}

/// Logs non-empty element text under the current node.
pub(crate) fn log_content(tracker: &mut Tracker, level: &str, content: &str) -> ParseResult<()> {
    if !content.is_empty() {
        tracker.log_message(level, content)?;
    }
    Ok(())
}

/// A per-format state machine fed element by element.
///
/// Handlers only ever talk to the [`Tracker`]; they never persist anything themselves.
pub trait ReportHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()>;

    /// `content` is the trimmed text collected since the previous element boundary.
    fn end_element(&mut self, tracker: &mut Tracker, name: &str, content: &str)
    -> ParseResult<()>;

    /// Sections whose whole subtree is ignored.
    fn excluded_section(&self, _name: &str) -> bool {
        false
    }

    /// While true, text is not collected.
    fn skipping_content(&self) -> bool {
        false
    }
}

/// Feeds `source` through `handler`, collecting text between element boundaries.
pub fn drive<R: BufRead>(
    source: R,
    handler: &mut dyn ReportHandler,
    tracker: &mut Tracker,
) -> ParseResult<()> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(false);
    let mut buffer = Vec::new();
    let mut content = String::new();
    let mut excluded_depth = 0usize;

    loop {
        let event = reader
            .read_event_into(&mut buffer)
            .map_err(|error| xml_error(&reader, error))?;
        match event {
            Event::Start(start) => {
                let name = element_name(&start);
                if excluded_depth > 0 || handler.excluded_section(&name) {
                    excluded_depth += 1;
                } else {
                    let attributes = attributes(&reader, &start)?;
                    content.clear();
                    handler.start_element(tracker, &name, &attributes)?;
                }
            }
            Event::Empty(start) => {
                let name = element_name(&start);
                if excluded_depth == 0 && !handler.excluded_section(&name) {
                    let attributes = attributes(&reader, &start)?;
                    content.clear();
                    handler.start_element(tracker, &name, &attributes)?;
                    handler.end_element(tracker, &name, "")?;
                }
            }
            Event::End(end) => {
                if excluded_depth > 0 {
                    excluded_depth -= 1;
                } else {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    let text = trim_content(&content).to_string();
                    content.clear();
                    handler.end_element(tracker, &name, &text)?;
                }
            }
            Event::Text(text) => {
                if excluded_depth == 0 && !handler.skipping_content() {
                    let text = text.unescape().map_err(|error| xml_error(&reader, error))?;
                    content.push_str(&text);
                }
            }
            Event::CData(data) => {
                if excluded_depth == 0 && !handler.skipping_content() {
                    content.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buffer.clear();
    }
    Ok(())
}

fn trim_content(content: &str) -> &str {
    content.trim_matches(|c| c == ' ' || c == '\n' || c == '\r')
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attributes<R>(reader: &Reader<R>, start: &BytesStart<'_>) -> ParseResult<XmlAttributes> {
    let mut entries = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|error| xml_error(reader, error))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|error| xml_error(reader, error))?
            .into_owned();
        entries.push((key, value));
    }
    Ok(XmlAttributes::new(entries))
}

fn xml_error<R>(reader: &Reader<R>, error: impl std::fmt::Display) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position() as u64,
        message: error.to_string(),
    }
}
