//! Parsing and validation of raw event streams
//!
//! Upstream batches arrive either as a JSON array or as NDJSON (one event per
//! line). Parsing stops at the first malformed line; validation never fails and
//! only reports which events will be normalized with safe defaults.

use crate::error::EngineError;
use crate::schema::raw_event::RawEvent;
use serde::Serialize;

/// Adapter for turning upstream text into [`RawEvent`]s
pub struct RawEventAdapter;

impl RawEventAdapter {
    /// Parse a JSON string containing an array of RawEvents
    pub fn parse_array(json: &str) -> Result<Vec<RawEvent>, EngineError> {
        let events: Vec<RawEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse a single NDJSON line; blank lines yield `None`
    pub fn parse_line(line_num: usize, line: &str) -> Result<Option<RawEvent>, EngineError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<RawEvent>(trimmed)
            .map(Some)
            .map_err(|e| {
                EngineError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawEvents
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawEvent>, EngineError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            if let Some(event) = Self::parse_line(line_num, line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Report every event that is missing fields
    pub fn validate_events(events: &[RawEvent]) -> Vec<ValidationResult> {
        events
            .iter()
            .enumerate()
            .filter_map(|(idx, event)| {
                let degraded = event.degraded_fields();
                if degraded.is_empty() {
                    None
                } else {
                    Some(ValidationResult {
                        index: idx,
                        event_type: event.kind(),
                        degraded_fields: degraded,
                    })
                }
            })
            .collect()
    }
}

/// An event that will be normalized with defaults
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub index: usize,
    pub event_type: &'static str,
    pub degraded_fields: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let ndjson = r#"{"type": "keydown", "timestamp": 1, "key": "a", "code": "KeyA"}

{"type": "keyup", "timestamp": 80, "key": "a", "code": "KeyA"}
"#;
        let events = RawEventAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), "keyup");
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let ndjson = "{\"type\": \"click\", \"timestamp\": 1}\n{not json}\n";
        let err = RawEventAdapter::parse_ndjson(ndjson).unwrap_err();
        match err {
            EngineError::ParseError(msg) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"type": "focus_in", "timestamp": 1}, {"type": "scroll", "timestamp": 2, "delta_y": 40.0}]"#;
        let events = RawEventAdapter::parse_array(json).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_validate_events_lists_only_degraded() {
        let events = vec![
            RawEvent::keydown(1, "a"),
            serde_json::from_str(r#"{"type": "mousedown"}"#).unwrap(),
        ];
        let report = RawEventAdapter::validate_events(&events);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].index, 1);
        assert_eq!(report[0].event_type, "mousedown");
        assert_eq!(
            report[0].degraded_fields,
            vec!["timestamp", "client_x", "client_y"]
        );
    }
}
