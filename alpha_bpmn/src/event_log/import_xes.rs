use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::bufread::GzDecoder;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Error as QuickXMLError;
use quick_xml::Reader;

use super::activity::ActivityRegistry;
use super::constants::{ACTIVITY_NAME, RESOURCE_NAME, TIMESTAMP_NAME};
use super::event_log_struct::{Event, EventLog, Trace};

///
/// Error encountered while parsing XES
///
#[derive(Debug)]
pub enum XESParseError {
    /// There is no top-level `<log>`
    NoTopLevelLog,
    /// An `<event>` had no `concept:name` attribute (byte position of the event included)
    MissingEventActivity(u64),
    /// Invalid value of an XML attribute with key (key and byte position included)
    InvalidKeyValue(&'static str, u64),
    /// IO error
    IOError(std::io::Error),
    /// XML error (e.g., incorrect XML format)
    XMLParsingError(QuickXMLError),
}

impl std::fmt::Display for XESParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse XES: {:?}", self)
    }
}

impl std::error::Error for XESParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XESParseError::IOError(e) => Some(e),
            XESParseError::XMLParsingError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for XESParseError {
    fn from(e: std::io::Error) -> Self {
        Self::IOError(e)
    }
}

impl From<QuickXMLError> for XESParseError {
    fn from(e: QuickXMLError) -> Self {
        Self::XMLParsingError(e)
    }
}

/// Current parsing mode (i.e., which tag is currently open / being parsed)
#[derive(Clone, Copy, Debug)]
enum Mode {
    None,
    Log,
    Trace,
    Event,
}

fn get_attribute(t: &BytesStart<'_>, key: &str) -> Result<Option<String>, QuickXMLError> {
    Ok(t.try_get_attribute(key)?
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string()))
}

/// Collected attribute values of the `<event>` currently being parsed
#[derive(Debug, Default)]
struct PendingEvent {
    start_pos: u64,
    activity_name: Option<String>,
    resource: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl PendingEvent {
    fn apply_attribute(
        &mut self,
        element: &BytesStart<'_>,
        position: u64,
    ) -> Result<(), XESParseError> {
        match element.name().as_ref() {
            b"string" => {
                let key = get_attribute(element, "key")?;
                let value = get_attribute(element, "value")?;
                match (key.as_deref(), value) {
                    (Some(ACTIVITY_NAME), Some(v)) => self.activity_name = Some(v),
                    (Some(RESOURCE_NAME), Some(v)) => self.resource = Some(v),
                    _ => {}
                }
            }
            b"date" => {
                let key = get_attribute(element, "key")?;
                let value = get_attribute(element, "value")?;
                if let (Some(TIMESTAMP_NAME), Some(v)) = (key.as_deref(), value) {
                    self.timestamp = Some(
                        parse_timestamp(&v)
                            .ok_or(XESParseError::InvalidKeyValue(TIMESTAMP_NAME, position))?,
                    );
                }
            }
            _ => {} // other attribute types are ignored
        }
        Ok(())
    }

    fn into_event(self, registry: &mut ActivityRegistry) -> Result<Event, XESParseError> {
        let name = self
            .activity_name
            .ok_or(XESParseError::MissingEventActivity(self.start_pos))?;
        Ok(Event {
            activity: registry.intern(&name),
            resource: self.resource.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or(DateTime::UNIX_EPOCH),
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Zone-less timestamps (e.g., "2010-12-30T13:32:00.000") are assumed to be UTC
    NaiveDateTime::parse_from_str(value, "%FT%T%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

///
/// Parse XES from the given reader into an [`EventLog`]
///
/// Every event needs a `concept:name` attribute; `org:resource` and `time:timestamp` are picked
/// up when present, all other attributes are ignored. Activity names are interned through the
/// passed registry, so equally-named activities of different traces map to the identical
/// [`Activity`](super::activity::Activity) value.
///
pub fn import_xes<T>(reader: T, registry: &mut ActivityRegistry) -> Result<EventLog, XESParseError>
where
    T: BufRead,
{
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);
    let mut buf: Vec<u8> = Vec::new();

    let mut mode = Mode::None;
    let mut saw_log = false;
    let mut traces: Vec<Trace> = Vec::new();
    let mut events: Vec<Event> = Vec::new();
    let mut pending = PendingEvent::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(t)) => match (mode, t.name().as_ref()) {
                (Mode::None, b"log") => {
                    saw_log = true;
                    mode = Mode::Log;
                }
                (Mode::Log, b"trace") => {
                    events.clear();
                    mode = Mode::Trace;
                }
                (Mode::Trace, b"event") => {
                    pending = PendingEvent {
                        start_pos: reader.buffer_position(),
                        ..PendingEvent::default()
                    };
                    mode = Mode::Event;
                }
                (Mode::Event, _) => {
                    let position = reader.buffer_position();
                    pending.apply_attribute(&t, position)?;
                }
                _ => {} // unrecognized elements (extensions, globals, classifiers, ...) are ignored
            },
            Ok(XmlEvent::Empty(t)) => match (mode, t.name().as_ref()) {
                (Mode::Trace, b"event") => {
                    return Err(XESParseError::MissingEventActivity(reader.buffer_position()));
                }
                (Mode::Event, _) => {
                    let position = reader.buffer_position();
                    pending.apply_attribute(&t, position)?;
                }
                _ => {}
            },
            Ok(XmlEvent::End(t)) => match (mode, t.name().as_ref()) {
                (Mode::Event, b"event") => {
                    events.push(std::mem::take(&mut pending).into_event(registry)?);
                    mode = Mode::Trace;
                }
                (Mode::Trace, b"trace") => {
                    traces.push(Trace {
                        events: std::mem::take(&mut events),
                    });
                    mode = Mode::Log;
                }
                (Mode::Log, b"log") => {
                    mode = Mode::None;
                }
                _ => {}
            },
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(XESParseError::XMLParsingError(e)),
        }
        buf.clear();
    }

    if !saw_log {
        return Err(XESParseError::NoTopLevelLog);
    }

    Ok(EventLog { traces })
}

///
/// Import a XES [`EventLog`] from a file path
///
/// Files ending in `.gz` are transparently decompressed.
///
pub fn import_xes_file<P: AsRef<Path>>(
    path: P,
    registry: &mut ActivityRegistry,
) -> Result<EventLog, XESParseError> {
    let path = path.as_ref();
    if path.extension().is_some_and(|e| e == "gz") {
        let file = File::open(path)?;
        let dec: GzDecoder<BufReader<&File>> = GzDecoder::new(BufReader::new(&file));
        import_xes(BufReader::new(dec), registry)
    } else {
        let file = File::open(path)?;
        import_xes(BufReader::new(file), registry)
    }
}

///
/// Import a XES [`EventLog`] directly from a string
///
pub fn import_xes_str(
    xes_str: &str,
    registry: &mut ActivityRegistry,
) -> Result<EventLog, XESParseError> {
    import_xes(BufReader::new(xes_str.as_bytes()), registry)
}

///
/// Import a XES [`EventLog`] from a byte slice (&\[u8\])
///
/// * `is_compressed_gz`: Parse the passed `xes_data` as a compressed .gz archive
///
pub fn import_xes_slice(
    xes_data: &[u8],
    is_compressed_gz: bool,
    registry: &mut ActivityRegistry,
) -> Result<EventLog, XESParseError> {
    if is_compressed_gz {
        let gz: GzDecoder<&[u8]> = GzDecoder::new(xes_data);
        return import_xes(BufReader::new(gz), registry);
    }
    import_xes(BufReader::new(xes_data), registry)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::utils::test_utils::get_test_data_path;

    #[test]
    fn parse_full_log() {
        let mut registry = ActivityRegistry::new();
        let path = get_test_data_path().join("eventlog-full.xes");
        let log = import_xes_file(path, &mut registry).unwrap();

        assert_eq!(log.traces.len(), 6);
        let first_trace = &log.traces[0];
        assert_eq!(first_trace.events.len(), 9);
        let first_event = &first_trace.events[0];
        assert_eq!(registry.name_of(first_event.activity), "register request");
        assert_eq!(first_event.resource, "Pete");
        assert_eq!(
            first_event.timestamp,
            Utc.with_ymd_and_hms(2010, 12, 30, 13, 32, 0).unwrap()
        );

        // Not two instances are created for the same activity
        assert_eq!(
            first_event.activity,
            log.traces[1].events[0].activity
        );
    }

    #[test]
    fn parse_full_log_gz() {
        let mut registry = ActivityRegistry::new();
        let plain = import_xes_file(
            get_test_data_path().join("eventlog-full.xes"),
            &mut ActivityRegistry::new(),
        )
        .unwrap();
        let gz = import_xes_file(
            get_test_data_path().join("eventlog-full.xes.gz"),
            &mut registry,
        )
        .unwrap();
        assert_eq!(plain.traces.len(), gz.traces.len());
        assert_eq!(plain.event_count(), gz.event_count());
    }

    #[test]
    fn parse_single_event_log() {
        let mut registry = ActivityRegistry::new();
        let path = get_test_data_path().join("eventlog-single.xes");
        let log = import_xes_file(path, &mut registry).unwrap();

        assert_eq!(log.traces.len(), 1);
        assert_eq!(log.traces[0].events.len(), 1);
        // 1 in file + start + end
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn missing_activity_name_is_an_error() {
        let mut registry = ActivityRegistry::new();
        let xes = r#"<log><trace><event><string key="org:resource" value="Pete"/></event></trace></log>"#;
        let res = import_xes_str(xes, &mut registry);
        assert!(matches!(res, Err(XESParseError::MissingEventActivity(_))));
    }

    #[test]
    fn missing_top_level_log_is_an_error() {
        let mut registry = ActivityRegistry::new();
        let res = import_xes_str("<foo/>", &mut registry);
        assert!(matches!(res, Err(XESParseError::NoTopLevelLog)));
    }

    #[test]
    fn mismatched_tags_are_an_error() {
        let mut registry = ActivityRegistry::new();
        let res = import_xes_str("<log><trace></log></trace>", &mut registry);
        assert!(matches!(res, Err(XESParseError::XMLParsingError(_))));
    }

    #[test]
    fn invalid_timestamp_is_an_error() {
        let mut registry = ActivityRegistry::new();
        let xes = r#"<log><trace><event><string key="concept:name" value="a"/><date key="time:timestamp" value="yesterday"/></event></trace></log>"#;
        let res = import_xes_str(xes, &mut registry);
        assert!(matches!(
            res,
            Err(XESParseError::InvalidKeyValue(TIMESTAMP_NAME, _))
        ));
    }
}
