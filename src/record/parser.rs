// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use super::{HealthRecord, RawRecord, RECORD_OPEN};

/// Why one record was skipped. Never fatal for the job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("record is not valid utf-8")]
    InvalidUtf8,

    #[error("fragment does not start with <Record")]
    NotARecord,

    #[error("malformed attributes near byte {0}")]
    MalformedAttributes(usize),

    #[error("missing attribute `{0}`")]
    MissingAttribute(&'static str),

    #[error("invalid value `{0}`")]
    InvalidValue(String),

    #[error("no parseable timestamp (startDate, creationDate, endDate)")]
    InvalidTimestamp,
}

/// Timestamp attributes in order of preference.
const TIMESTAMP_ATTRIBUTES: [&str; 3] = ["startDate", "creationDate", "endDate"];

/// Parses one reassembled `<Record>` element.
///
/// Only the opening tag is read; nested metadata elements are ignored.
pub fn parse_record(raw: &RawRecord) -> Result<HealthRecord, ParseError> {
    let text = raw.as_str().map_err(|_| ParseError::InvalidUtf8)?;
    let attributes = Attributes::parse(text)?;

    let record_type = attributes
        .get("type")
        .filter(|t| !t.trim().is_empty())
        .ok_or(ParseError::MissingAttribute("type"))?;

    let raw_value = attributes
        .get("value")
        .ok_or(ParseError::MissingAttribute("value"))?;
    let value = raw_value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidValue(raw_value.to_string()))?;

    let start_time = TIMESTAMP_ATTRIBUTES
        .iter()
        .filter_map(|name| attributes.get(name))
        .find_map(|ts| parse_timestamp(&ts))
        .ok_or(ParseError::InvalidTimestamp)?;
    let end_time = attributes.get("endDate").and_then(|ts| parse_timestamp(&ts));

    Ok(HealthRecord {
        record_type: record_type.into_owned(),
        value,
        date: start_time
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        source_name: attributes
            .get("sourceName")
            .map(Cow::into_owned)
            .unwrap_or_default(),
        unit: attributes
            .get("unit")
            .filter(|u| !u.is_empty())
            .map(Cow::into_owned),
        start_time,
        end_time,
    })
}

/// Accepts RFC 3339, the export's `2024-01-01 08:00:00 -0500`, naive date-times
/// (taken as UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S %z") {
        return Some(ts);
    }
    let utc = FixedOffset::east_opt(0)?;
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc().with_timezone(&utc));
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().with_timezone(&utc))
}

/// Attributes of the opening tag, in document order.
struct Attributes<'a> {
    pairs: Vec<(&'a str, Cow<'a, str>)>,
}

impl<'a> Attributes<'a> {
    fn parse(text: &'a str) -> Result<Self, ParseError> {
        let bytes = text.as_bytes();
        if !bytes.starts_with(RECORD_OPEN) {
            return Err(ParseError::NotARecord);
        }
        let mut pos = RECORD_OPEN.len();
        let mut pairs = Vec::new();
        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos) {
                None => return Err(ParseError::MalformedAttributes(pos)),
                Some(b'>') | Some(b'/') => break,
                Some(_) => {}
            }

            let name_start = pos;
            while pos < bytes.len()
                && !bytes[pos].is_ascii_whitespace()
                && !matches!(bytes[pos], b'=' | b'>' | b'/')
            {
                pos += 1;
            }
            let name = &text[name_start..pos];

            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if bytes.get(pos) != Some(&b'=') || name.is_empty() {
                return Err(ParseError::MalformedAttributes(pos));
            }
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }

            let quote = match bytes.get(pos) {
                Some(q @ (b'"' | b'\'')) => *q,
                _ => return Err(ParseError::MalformedAttributes(pos)),
            };
            let value_start = pos + 1;
            let value_len = bytes[value_start..]
                .iter()
                .position(|b| *b == quote)
                .ok_or(ParseError::MalformedAttributes(value_start))?;
            let value = &text[value_start..value_start + value_len];
            pairs.push((name, unescape(value)));
            pos = value_start + value_len + 1;
        }
        Ok(Attributes { pairs })
    }

    fn get(&self, name: &str) -> Option<Cow<'a, str>> {
        self.pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    }
}

/// Resolves the predefined XML entities and numeric character references.
/// Unknown or broken references are kept verbatim.
fn unescape(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let resolved = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, semi))
        });
        match resolved {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn raw(text: &str) -> RawRecord {
        RawRecord::new(0, Bytes::copy_from_slice(text.as_bytes()))
    }

    #[test]
    fn parses_export_record() {
        let record = parse_record(&raw(
            r#"<Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch &amp; Co" unit="count/min" creationDate="2024-01-01 08:05:00 -0500" startDate="2024-01-01 08:00:00 -0500" endDate="2024-01-01 08:00:30 -0500" value="72"><MetadataEntry key="a" value="b"/></Record>"#,
        ))
        .unwrap();
        assert_eq!(record.record_type, "HKQuantityTypeIdentifierHeartRate");
        assert_eq!(record.value, 72.0);
        assert_eq!(record.date, "2024-01-01T13:00:00Z");
        assert_eq!(record.source_name, "Watch & Co");
        assert_eq!(record.unit.as_deref(), Some("count/min"));
        assert_eq!(
            record.end_time.map(|t| t.to_rfc3339()),
            Some("2024-01-01T08:00:30-05:00".to_string())
        );
    }

    #[test]
    fn falls_back_to_creation_date() {
        let record = parse_record(&raw(
            r#"<Record type='weight' value=' 80.5 ' startDate="garbage" creationDate="2024-02-03T04:05:06Z"/>"#,
        ))
        .unwrap();
        assert_eq!(record.value, 80.5);
        assert_eq!(record.date, "2024-02-03T04:05:06Z");
        assert_eq!(record.source_name, "");
        assert!(record.end_time.is_none());
    }

    #[test]
    fn rejects_bad_records() {
        let cases = [
            (r#"<Record value="1" startDate="2024-01-01"/>"#, ParseError::MissingAttribute("type")),
            (r#"<Record type="" value="1" startDate="2024-01-01"/>"#, ParseError::MissingAttribute("type")),
            (r#"<Record type="a" startDate="2024-01-01"/>"#, ParseError::MissingAttribute("value")),
            (r#"<Record type="a" value="abc" startDate="2024-01-01"/>"#, ParseError::InvalidValue("abc".into())),
            (r#"<Record type="a" value="NaN" startDate="2024-01-01"/>"#, ParseError::InvalidValue("NaN".into())),
            (r#"<Record type="a" value="inf" startDate="2024-01-01"/>"#, ParseError::InvalidValue("inf".into())),
            (r#"<Record type="a" value="1"/>"#, ParseError::InvalidTimestamp),
            (r#"<Record type="a" value="1" startDate="yesterday"/>"#, ParseError::InvalidTimestamp),
            (r#"<Record type="a value="1"/>"#, ParseError::MalformedAttributes(25)),
            (r#"<Workout type="a"/>"#, ParseError::NotARecord),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_record(&raw(text)), Err(expected), "{}", text);
        }
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let record = RawRecord::new(0, Bytes::from_static(b"<Record type=\"\xff\"/>"));
        assert_eq!(parse_record(&record), Err(ParseError::InvalidUtf8));
    }

    #[test]
    fn timestamp_forms() {
        let utc = |ts: &str| {
            parse_timestamp(ts).map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        };
        assert_eq!(utc("2024-01-01T00:00:00Z").as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(utc("2024-01-01T02:00:00+02:00").as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(utc("2024-01-01 00:00:00 +0100").as_deref(), Some("2023-12-31T23:00:00Z"));
        assert_eq!(utc("2024-01-01 00:00:00").as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(utc("2024-01-01").as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(utc(""), None);
        assert_eq!(utc("2024-13-01"), None);
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("a &lt;b&gt; &quot;c&quot; &apos;d&apos;"), "a <b> \"c\" 'd'");
        assert_eq!(unescape("&#233;&#xE9;"), "éé");
        assert_eq!(unescape("AT&T &bogus; &"), "AT&T &bogus; &");
    }
}
