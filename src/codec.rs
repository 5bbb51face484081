//! Datagram codec for the UDP ingestion protocol
//!
//! Two self-delimiting encodings are supported, selected by `ingress.format`:
//!
//! ```text
//! json:  {"source":"a1","metric":"cpu.load","value":0.7,"timestamp":1700000000000,"tags":{"dc":"eu"}}
//!        [ {...}, {...} ]
//! line:  a1 cpu.load 0.7 1700000000000 dc=eu,rack=4\n
//! ```
//!
//! Timestamps are unix milliseconds. A payload that cannot be parsed at all is
//! rejected as a whole; inside a valid payload every broken entry is counted
//! individually so its valid siblings still get through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WireFormat;
use crate::{MetricSample, Tags};

/// Why a whole datagram was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid UTF-8 / JSON at all
    InvalidPayload(String),

    /// Payload parsed but carries nothing that looks like a sample
    UnexpectedShape(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidPayload(msg) => write!(f, "invalid datagram payload: {msg}"),
            DecodeError::UnexpectedShape(msg) => write!(f, "unexpected datagram shape: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result of decoding one datagram
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Decoded {
    pub samples: Vec<MetricSample>,

    /// Entries that were present but malformed
    pub malformed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSample {
    source: String,
    metric: String,
    value: f64,
    timestamp: i64,
    #[serde(default)]
    tags: Tags,
}

impl WireSample {
    fn into_sample(self) -> Option<MetricSample> {
        if self.source.is_empty() {
            return None;
        }
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.timestamp)?;
        Some(MetricSample {
            source: self.source,
            metric: self.metric,
            value: self.value,
            timestamp,
            tags: self.tags,
        })
    }
}

pub fn decode(format: WireFormat, payload: &[u8]) -> Result<Decoded, DecodeError> {
    match format {
        WireFormat::Json => decode_json(payload),
        WireFormat::Line => decode_line(payload),
    }
}

fn decode_json(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        object @ serde_json::Value::Object(_) => vec![object],
        other => {
            return Err(DecodeError::UnexpectedShape(format!(
                "expected object or array, got {other}"
            )));
        }
    };

    let mut decoded = Decoded::default();
    for entry in entries {
        match serde_json::from_value::<WireSample>(entry)
            .ok()
            .and_then(WireSample::into_sample)
        {
            Some(sample) => decoded.samples.push(sample),
            None => decoded.malformed += 1,
        }
    }

    Ok(decoded)
}

fn decode_line(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let text =
        std::str::from_utf8(payload).map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    let mut decoded = Decoded::default();
    let mut rest = text;

    while !rest.is_empty() {
        let Some(end) = rest.find('\n') else {
            // no terminator: the datagram was cut short
            if !rest.trim().is_empty() {
                decoded.malformed += 1;
            }
            break;
        };

        let line = rest[..end].trim();
        rest = &rest[end + 1..];

        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Some(sample) => decoded.samples.push(sample),
            None => decoded.malformed += 1,
        }
    }

    Ok(decoded)
}

fn parse_line(line: &str) -> Option<MetricSample> {
    let mut fields = line.split_whitespace();

    let source = fields.next()?;
    let metric = fields.next()?;
    let value = fields.next()?.parse::<f64>().ok()?;
    let timestamp = fields.next()?.parse::<i64>().ok()?;
    let tags = match fields.next() {
        Some(raw) => parse_tags(raw)?,
        None => Tags::new(),
    };

    if fields.next().is_some() {
        return None;
    }

    Some(MetricSample {
        source: source.to_string(),
        metric: metric.to_string(),
        value,
        timestamp: DateTime::<Utc>::from_timestamp_millis(timestamp)?,
        tags,
    })
}

fn parse_tags(raw: &str) -> Option<Tags> {
    raw.split(',')
        .map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Encode samples into one datagram payload
///
/// Used by agents and test harnesses; the collector itself only decodes.
pub fn encode(format: WireFormat, samples: &[MetricSample]) -> Vec<u8> {
    match format {
        WireFormat::Json => {
            let wire: Vec<WireSample> = samples
                .iter()
                .map(|s| WireSample {
                    source: s.source.clone(),
                    metric: s.metric.clone(),
                    value: s.value,
                    timestamp: s.timestamp.timestamp_millis(),
                    tags: s.tags.clone(),
                })
                .collect();
            serde_json::to_vec(&wire).unwrap_or_default()
        }
        WireFormat::Line => {
            let mut out = String::new();
            for s in samples {
                out.push_str(&format!(
                    "{} {} {} {}",
                    s.source,
                    s.metric,
                    s.value,
                    s.timestamp.timestamp_millis()
                ));
                if !s.tags.is_empty() {
                    let tags: Vec<String> =
                        s.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    out.push(' ');
                    out.push_str(&tags.join(","));
                }
                out.push('\n');
            }
            out.into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_single_json_object() {
        let payload = br#"{"source":"agent-1","metric":"cpu.load","value":0.5,"timestamp":1700000000000,"tags":{"dc":"eu"}}"#;
        let decoded = decode(WireFormat::Json, payload).unwrap();

        assert_eq!(decoded.malformed, 0);
        assert_eq!(decoded.samples.len(), 1);
        let sample = &decoded.samples[0];
        assert_eq!(sample.source, "agent-1");
        assert_eq!(sample.metric, "cpu.load");
        assert_eq!(sample.value, 0.5);
        assert_eq!(sample.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(sample.tags.get("dc").map(String::as_str), Some("eu"));
    }

    #[test]
    fn test_decode_json_array_counts_broken_entries() {
        let payload = br#"[
            {"source":"a","metric":"m","value":1,"timestamp":1700000000000},
            {"source":"a","metric":"m","timestamp":1700000000000},
            {"source":"","metric":"m","value":1,"timestamp":1700000000000},
            {"source":"b","metric":"m","value":2.5,"timestamp":1700000001000}
        ]"#;
        let decoded = decode(WireFormat::Json, payload).unwrap();

        assert_eq!(decoded.samples.len(), 2);
        assert_eq!(decoded.malformed, 2);
    }

    #[test]
    fn test_decode_truncated_json_is_rejected() {
        let payload = br#"{"source":"agent-1","metric":"cpu.lo"#;
        assert_matches!(
            decode(WireFormat::Json, payload),
            Err(DecodeError::InvalidPayload(_))
        );
    }

    #[test]
    fn test_decode_json_scalar_is_rejected() {
        assert_matches!(
            decode(WireFormat::Json, b"42"),
            Err(DecodeError::UnexpectedShape(_))
        );
    }

    #[test]
    fn test_decode_lines() {
        let payload = b"a1 cpu.load 0.7 1700000000000 dc=eu,rack=4\n\na2 mem.used 1024 1700000000500\n";
        let decoded = decode(WireFormat::Line, payload).unwrap();

        assert_eq!(decoded.malformed, 0);
        assert_eq!(decoded.samples.len(), 2);
        assert_eq!(decoded.samples[0].tags.len(), 2);
        assert_eq!(decoded.samples[1].value, 1024.0);
    }

    #[test]
    fn test_decode_line_without_terminator_is_truncated() {
        let payload = b"a1 cpu.load 0.7 1700000000000\na1 cpu.load 0.8 17000";
        let decoded = decode(WireFormat::Line, payload).unwrap();

        assert_eq!(decoded.samples.len(), 1);
        assert_eq!(decoded.malformed, 1);
    }

    #[test]
    fn test_decode_line_rejects_bad_fields() {
        let payload = b"a1 cpu.load notanumber 1700000000000\na1 cpu.load 1\na1 m 1 1 =x\na1 m 1 1 k=v extra\n";
        let decoded = decode(WireFormat::Line, payload).unwrap();

        assert!(decoded.samples.is_empty());
        assert_eq!(decoded.malformed, 4);
    }

    #[test]
    fn test_decode_line_rejects_invalid_utf8() {
        assert_matches!(
            decode(WireFormat::Line, &[0xff, 0xfe, b'\n']),
            Err(DecodeError::InvalidPayload(_))
        );
    }

    #[test]
    fn test_encoded_payload_decodes_in_both_formats() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let samples = vec![
            MetricSample::new("a1", "cpu.load", 0.25, ts).with_tag("dc", "eu"),
            MetricSample::new("a2", "cpu.load", 3.0, ts),
        ];

        for format in [WireFormat::Json, WireFormat::Line] {
            let decoded = decode(format, &encode(format, &samples)).unwrap();
            assert_eq!(decoded.samples, samples, "format {format:?}");
        }
    }
}
