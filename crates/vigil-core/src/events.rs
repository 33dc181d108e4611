//! Run event log lines.
//!
//! One line per event:
//!
//! ```text
//! - 2026-01-15T10:30:00Z | question | q1 | text="pick A or B" | source=agent
//! ```
//!
//! Fields are pipe-delimited. Names and attribute values that contain
//! whitespace, control characters, quotes, pipes or backslashes are written
//! quoted, with `\"`, `\\`, `\n`, `\r` and `\t` escapes, so every event
//! stays on one physical line.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Artifact,
    Phase,
    Question,
    Answer,
    Note,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Artifact => "artifact",
            EventKind::Phase => "phase",
            EventKind::Question => "question",
            EventKind::Answer => "answer",
            EventKind::Note => "note",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = EventParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "status" => Ok(EventKind::Status),
            "artifact" => Ok(EventKind::Artifact),
            "phase" => Ok(EventKind::Phase),
            "question" => Ok(EventKind::Question),
            "answer" => Ok(EventKind::Answer),
            "note" => Ok(EventKind::Note),
            other => Err(EventParseError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("event line must start with '- ' bullet marker")]
    MissingBullet,
    #[error("event line needs at least '<timestamp> | <kind> | <name>', found {found} field(s)")]
    MissingFields { found: usize },
    #[error("invalid RFC3339 timestamp '{value}': {message}")]
    Timestamp { value: String, message: String },
    #[error("unknown event kind '{kind}'")]
    UnknownKind { kind: String },
    #[error("event name must not be empty")]
    EmptyName,
    #[error("invalid event name '{value}': {message}")]
    Name { value: String, message: String },
    #[error("invalid event attribute '{field}': {message}")]
    Attribute { field: String, message: String },
    #[error("unterminated quote in event line")]
    UnterminatedQuote,
}

/// One immutable, timestamped record in a run's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub name: String,
    /// Attributes in insertion order.
    #[serde(default)]
    pub attrs: Vec<(String, String)>,
}

impl Event {
    pub fn new(at: DateTime<Utc>, kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            at,
            kind,
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn parse_line(line: &str) -> Result<Self, EventParseError> {
        parse_event_line(line)
    }

    pub fn to_line(&self) -> String {
        let mut out = format!(
            "- {} | {} | {}",
            self.at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.kind,
            render_value(&self.name)
        );
        for (key, value) in &self.attrs {
            out.push_str(" | ");
            out.push_str(key);
            out.push('=');
            out.push_str(&render_value(value));
        }
        out
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

impl std::str::FromStr for Event {
    type Err = EventParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_event_line(value)
    }
}

pub fn parse_event_line(line: &str) -> Result<Event, EventParseError> {
    let body = line
        .trim_end_matches(['\r', '\n'])
        .trim_start()
        .strip_prefix("- ")
        .ok_or(EventParseError::MissingBullet)?;

    let fields = split_fields(body)?;
    if fields.len() < 3 {
        return Err(EventParseError::MissingFields {
            found: fields.iter().filter(|field| !field.is_empty()).count(),
        });
    }

    let raw_ts = fields[0].as_str();
    let at = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|err| EventParseError::Timestamp {
            value: raw_ts.to_string(),
            message: err.to_string(),
        })?
        .with_timezone(&Utc);
    let kind: EventKind = fields[1].parse()?;
    let name = unquote(&fields[2]).map_err(|message| EventParseError::Name {
        value: fields[2].clone(),
        message: message.to_string(),
    })?;
    if name.is_empty() {
        return Err(EventParseError::EmptyName);
    }

    let mut attrs = Vec::with_capacity(fields.len() - 3);
    for field in &fields[3..] {
        attrs.push(parse_attribute(field)?);
    }

    Ok(Event {
        at,
        kind,
        name,
        attrs,
    })
}

/// Splits on `|` outside of double quotes and trims each field. Quotes and
/// escapes are left in place for `parse_attribute`.
fn split_fields(body: &str) -> Result<Vec<String>, EventParseError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in body.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            }
            '|' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(EventParseError::UnterminatedQuote);
    }
    fields.push(current.trim().to_string());
    Ok(fields)
}

fn parse_attribute(field: &str) -> Result<(String, String), EventParseError> {
    let invalid = |message: &str| EventParseError::Attribute {
        field: field.to_string(),
        message: message.to_string(),
    };

    let (key, raw_value) = field.split_once('=').ok_or_else(|| invalid("expected key=value"))?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(invalid("attribute key must be a non-empty word"));
    }

    let value = unquote(raw_value.trim()).map_err(invalid)?;
    Ok((key.to_string(), value))
}

fn unquote(raw: &str) -> Result<String, &'static str> {
    match raw.strip_prefix('"') {
        Some(rest) => {
            let inner = rest
                .strip_suffix('"')
                .ok_or("quoted value must end with '\"'")?;
            unescape(inner).ok_or("dangling escape in quoted value")
        }
        None => Ok(raw.to_string()),
    }
}

fn unescape(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            out.push(match chars.next()? {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

fn render_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || matches!(ch, '"' | '|' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn parses_minimal_line() {
        let event = parse_event_line("- 2026-01-15T10:30:00Z | status | running").expect("parse");
        assert_eq!(event.at, at(10, 30));
        assert_eq!(event.kind, EventKind::Status);
        assert_eq!(event.name, "running");
        assert!(event.attrs.is_empty());
    }

    #[test]
    fn parses_plain_and_quoted_attributes_in_order() {
        let event = parse_event_line(
            r#"- 2026-01-15T10:30:00+02:00 | question | q1 | text="pick A | or \"B\"" | source=agent"#,
        )
        .expect("parse");
        assert_eq!(event.at, at(8, 30));
        assert_eq!(
            event.attrs,
            vec![
                ("text".to_string(), r#"pick A | or "B""#.to_string()),
                ("source".to_string(), "agent".to_string()),
            ]
        );
        assert_eq!(event.attr("source"), Some("agent"));
        assert_eq!(event.attr("missing"), None);
    }

    #[test]
    fn rejects_missing_bullet() {
        let err = parse_event_line("2026-01-15T10:30:00Z | status | running").expect_err("no bullet");
        assert_eq!(err, EventParseError::MissingBullet);
    }

    #[test]
    fn rejects_missing_kind_or_name() {
        let err = parse_event_line("- 2026-01-15T10:30:00Z | status").expect_err("no name");
        assert!(matches!(err, EventParseError::MissingFields { .. }));

        let err = parse_event_line("- 2026-01-15T10:30:00Z | status | ").expect_err("empty name");
        assert_eq!(err, EventParseError::EmptyName);
    }

    #[test]
    fn rejects_bad_timestamp_and_kind() {
        let err = parse_event_line("- yesterday | status | running").expect_err("bad ts");
        assert!(matches!(err, EventParseError::Timestamp { value, .. } if value == "yesterday"));

        let err = parse_event_line("- 2026-01-15T10:30:00Z | shout | hi").expect_err("bad kind");
        assert_eq!(
            err,
            EventParseError::UnknownKind {
                kind: "shout".to_string()
            }
        );
    }

    #[test]
    fn rejects_attribute_without_equals_and_unterminated_quotes() {
        let err = parse_event_line("- 2026-01-15T10:30:00Z | note | n1 | loose").expect_err("attr");
        assert!(matches!(err, EventParseError::Attribute { .. }));

        let err = parse_event_line(r#"- 2026-01-15T10:30:00Z | note | n1 | text="open"#)
            .expect_err("quote");
        assert_eq!(err, EventParseError::UnterminatedQuote);
    }

    #[test]
    fn serializes_with_quotes_only_when_needed() {
        let event = Event::new(at(10, 30), EventKind::Artifact, "pr")
            .with_attr("url", "https://github.com/o/r/pull/7")
            .with_attr("note", "two words")
            .with_attr("empty", "");
        assert_eq!(
            event.to_line(),
            r#"- 2026-01-15T10:30:00Z | artifact | pr | url=https://github.com/o/r/pull/7 | note="two words" | empty="""#
        );
    }

    #[test]
    fn parse_inverts_serialize_for_awkward_values() {
        let event = Event::new(at(23, 59), EventKind::Answer, "q1")
            .with_attr("text", r#"use "B" | not \A"#)
            .with_attr("by", "operator");
        let decoded = parse_event_line(&event.to_line()).expect("parse serialized");
        assert_eq!(decoded, event);
    }

    #[test]
    fn subsecond_timestamps_survive_serialization() {
        let precise = at(10, 30) + chrono::Duration::milliseconds(250);
        let event = Event::new(precise, EventKind::Note, "tick");
        let decoded: Event = event.to_string().parse().expect("parse");
        assert_eq!(decoded.at, precise);
    }

    #[test]
    fn multi_line_values_stay_on_one_line_and_round_trip() {
        let event = Event::new(at(11, 0), EventKind::Answer, "q1")
            .with_attr("text", "use A\nbecause B\r\n\tindented");
        let line = event.to_line();
        assert_eq!(line.lines().count(), 1, "{line}");
        assert!(line.ends_with(r#"text="use A\nbecause B\r\n\tindented""#), "{line}");
        assert_eq!(parse_event_line(&line).expect("parse"), event);
    }

    #[test]
    fn names_with_delimiters_are_quoted_and_round_trip() {
        let event = Event::new(at(11, 5), EventKind::Question, "pick | one=two")
            .with_attr("text", "A or B");
        let line = event.to_line();
        assert!(line.contains(r#"| question | "pick | one=two" |"#), "{line}");
        let decoded = parse_event_line(&line).expect("parse");
        assert_eq!(decoded.name, "pick | one=two");
        assert_eq!(decoded, event);

        let plain = Event::new(at(11, 5), EventKind::Status, "running");
        assert!(plain.to_line().ends_with("| status | running"));
    }

    #[test]
    fn rejects_malformed_quoted_names() {
        let err = parse_event_line(r#"- 2026-01-15T10:30:00Z | note | "n1\" | a=b"#)
            .expect_err("dangling name quote");
        assert_eq!(err, EventParseError::UnterminatedQuote);

        let err = parse_event_line(r#"- 2026-01-15T10:30:00Z | note | "n1"tail"#)
            .expect_err("text after closing quote");
        assert!(matches!(err, EventParseError::Name { value, .. } if value == r#""n1"tail"#));
    }
}
