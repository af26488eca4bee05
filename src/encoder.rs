//! Snapshot export encoding
//!
//! Wraps the engine's retained state in a versioned document with producer
//! metadata, suitable for writing to disk or handing to another process.

use crate::clock::{to_rfc3339, Millis};
use crate::error::EngineError;
use crate::types::{
    FocusEvent, KeyEvent, LongWindowAggregate, LoopRecord, MediumWindowAggregate, PointerEvent,
    RealtimeMetrics, ScrollEvent, SessionCounters, ShortWindowAggregate,
};
use crate::{PRODUCER_NAME, STRAIN_VERSION};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current snapshot document version
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Who produced a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Retained aggregates per window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateHistory {
    #[serde(rename = "5s")]
    pub window_5s: Vec<ShortWindowAggregate>,
    #[serde(rename = "30s")]
    pub window_30s: Vec<MediumWindowAggregate>,
    #[serde(rename = "60s")]
    pub window_60s: Vec<LongWindowAggregate>,
}

/// Retained raw records per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHistory {
    pub key_events: Vec<KeyEvent>,
    pub pointer_events: Vec<PointerEvent>,
    pub focus_events: Vec<FocusEvent>,
    pub scroll_events: Vec<ScrollEvent>,
}

/// Engine state captured for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub session_id: String,
    pub is_recording: bool,
    pub session: SessionCounters,
    pub realtime: RealtimeMetrics,
    pub aggregates: AggregateHistory,
    pub loops: Vec<LoopRecord>,
    pub history: RawHistory,
}

/// The full export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub snapshot_version: String,
    pub producer: SnapshotProducer,
    pub exported_at: String,
    pub exported_at_ms: Millis,
    #[serde(flatten)]
    pub body: SnapshotBody,
}

/// Snapshot encoder with a stable per-process instance id
pub struct SnapshotEncoder {
    instance_id: String,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wrap `body` in a document stamped at `now`
    pub fn encode(&self, body: SnapshotBody, now: Millis) -> SnapshotDocument {
        SnapshotDocument {
            snapshot_version: SNAPSHOT_VERSION.to_string(),
            producer: SnapshotProducer {
                name: PRODUCER_NAME.to_string(),
                version: STRAIN_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            exported_at: to_rfc3339(now),
            exported_at_ms: now,
            body,
        }
    }

    /// Encode to a pretty JSON string
    pub fn encode_to_json(&self, body: SnapshotBody, now: Millis) -> Result<String, EngineError> {
        let document = self.encode(body, now);
        serde_json::to_string_pretty(&document).map_err(EngineError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body() -> SnapshotBody {
        SnapshotBody {
            session_id: "session-1".to_string(),
            is_recording: true,
            session: SessionCounters::new(1_705_327_200_000),
            realtime: RealtimeMetrics::default(),
            aggregates: AggregateHistory::default(),
            loops: Vec::new(),
            history: RawHistory::default(),
        }
    }

    #[test]
    fn test_encode_stamps_producer() {
        let encoder = SnapshotEncoder::with_instance_id("test-instance".to_string());
        let doc = encoder.encode(body(), 1_705_327_260_000);

        assert_eq!(doc.snapshot_version, SNAPSHOT_VERSION);
        assert_eq!(doc.producer.name, PRODUCER_NAME);
        assert_eq!(doc.producer.version, STRAIN_VERSION);
        assert_eq!(doc.producer.instance_id, "test-instance");
        assert_eq!(doc.exported_at, "2024-01-15T14:01:00+00:00");
    }

    #[test]
    fn test_json_layout() {
        let encoder = SnapshotEncoder::new();
        let json = encoder.encode_to_json(body(), 0).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["session_id"], "session-1");
        assert!(value["aggregates"]["5s"].is_array());
        assert!(value["history"]["key_events"].is_array());
        assert_eq!(value["session"]["cumulative_keystrokes"], 0);
    }

    #[test]
    fn test_unique_instance_ids() {
        assert_ne!(
            SnapshotEncoder::new().instance_id(),
            SnapshotEncoder::new().instance_id()
        );
    }
}
