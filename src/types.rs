//! Core data types for Synheart Strain
//!
//! These types represent normalized interaction records, window aggregates and the
//! outward-facing state vector that flow through the engine.

use crate::clock::Millis;
use crate::config::HistoryLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Keyboard modifier state at the time of a key event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

/// Key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Keydown,
    Keyup,
}

/// A normalized keydown or keyup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: Millis,
    pub event_type: KeyPhase,
    /// Physical key code (e.g. "KeyA")
    pub key_code: String,
    /// Produced key value (e.g. "a", "Backspace")
    pub key_value: String,
    pub key_length: usize,
    /// Printable character without ctrl/alt
    pub is_char: bool,
    pub is_control: bool,
    pub is_navigation: bool,
    pub is_backspace: bool,
    pub is_delete: bool,
    pub is_enter: bool,
    pub is_undo: bool,
    pub is_repeat: bool,
    pub modifiers: Modifiers,
    /// Milliseconds between keydown and matching keyup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<i64>,
    /// Milliseconds since the previous matched key release (keyups only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_key_latency: Option<i64>,
    pub target_tag: String,
    pub target_type: String,
}

impl KeyEvent {
    /// Backspace or delete
    pub fn is_correction(&self) -> bool {
        self.is_backspace || self.is_delete
    }
}

/// Pointer event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerKind {
    #[serde(rename = "mousemove")]
    Move,
    #[serde(rename = "mousedown")]
    Down,
    #[serde(rename = "mouseup")]
    Up,
    #[serde(rename = "click")]
    Click,
}

/// A 2-D coordinate in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Movement since the previous pointer move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

/// Movement velocity in pixels per millisecond
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
}

/// A normalized pointer event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub timestamp: Millis,
    pub event_type: PointerKind,
    /// Client (viewport) position
    pub position: Point,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_count: Option<u32>,
    pub target_tag: String,
    pub target_id: String,
    pub target_class: String,
}

/// Focus transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusKind {
    FocusIn,
    FocusOut,
}

/// A normalized focus transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusEvent {
    pub timestamp: Millis,
    pub event_type: FocusKind,
    /// Time spent unfocused (focus_in directly after focus_out only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_duration: Option<i64>,
}

/// A normalized scroll event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub timestamp: Millis,
    /// Scroll offsets of the viewport after the scroll
    pub offset: Point,
    pub delta: Point,
    pub target_tag: String,
}

/// Output of the normalizer: one typed record per input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Key(KeyEvent),
    Pointer(PointerEvent),
    Focus(FocusEvent),
    Scroll(ScrollEvent),
}

impl NormalizedRecord {
    pub fn timestamp(&self) -> Millis {
        match self {
            NormalizedRecord::Key(e) => e.timestamp,
            NormalizedRecord::Pointer(e) => e.timestamp,
            NormalizedRecord::Focus(e) => e.timestamp,
            NormalizedRecord::Scroll(e) => e.timestamp,
        }
    }
}

/// Cumulative session counters; only reset by an explicit clear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub session_start_time: Millis,
    pub last_activity_time: Millis,
    pub cumulative_keystrokes: u64,
    pub cumulative_clicks: u64,
    pub cumulative_corrections: u64,
    pub total_key_events: u64,
    pub total_mouse_events: u64,
    pub periods_truncated: u64,
}

impl SessionCounters {
    /// Fresh counters for a session starting at `now`
    pub fn new(now: Millis) -> Self {
        Self {
            session_start_time: now,
            last_activity_time: now,
            cumulative_keystrokes: 0,
            cumulative_clicks: 0,
            cumulative_corrections: 0,
            total_key_events: 0,
            total_mouse_events: 0,
            periods_truncated: 0,
        }
    }

    /// Cumulative corrections per cumulative keystroke
    pub fn correction_pressure(&self) -> f64 {
        if self.cumulative_keystrokes == 0 {
            return 0.0;
        }
        self.cumulative_corrections as f64 / self.cumulative_keystrokes as f64
    }

    /// Milliseconds since the session started
    pub fn duration_ms(&self, now: Millis) -> i64 {
        (now - self.session_start_time).max(0)
    }
}

/// Summary of typing bursts in a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstStats {
    pub count: u32,
    pub mean_duration: f64,
    /// Mean events per burst
    pub intensity: f64,
    /// Fraction of burst events that are corrections
    pub correction_ratio: f64,
}

/// Summary of typing pauses in a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseStats {
    pub count: u32,
    pub mean_duration: f64,
    pub long_count: u32,
    pub micro_rate: f64,
}

/// 5 second tumbling window aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortWindowAggregate {
    pub timestamp: Millis,
    pub window_ms: i64,
    pub key_event_count: usize,
    pub inter_key_latency_mean: f64,
    pub inter_key_latency_std: f64,
    pub inter_key_latency_entropy: f64,
    pub typing_speed_wpm: f64,
    /// Relative change vs the previous 5s aggregate's wpm
    pub typing_speed_delta: f64,
    pub hold_time_mean: f64,
    pub hold_time_variance: f64,
    pub backspace_rate: f64,
    pub delete_rate: f64,
    pub undo_rate: f64,
    /// Corrections per printable character, within [0, 1]
    pub correction_ratio: f64,
    pub burst_count: u32,
    pub burst_duration_mean: f64,
    pub burst_intensity: f64,
    pub burst_correction_ratio: f64,
    pub click_rate: f64,
    pub mouse_velocity_mean: f64,
}

/// 30 second tumbling window aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumWindowAggregate {
    pub timestamp: Millis,
    pub window_ms: i64,
    pub key_event_count: usize,
    pub pause_count: u32,
    pub pause_mean_duration: f64,
    pub long_pause_count: u32,
    pub micro_pause_rate: f64,
    /// Events per second right after a pause
    pub speed_after_pause: f64,
    pub correction_after_pause: f64,
    pub latency_after_pause: f64,
    pub cumulative_keystrokes: u64,
    pub cumulative_corrections: u64,
    pub correction_pressure: f64,
}

/// Ring occupancy at the time of a 60s tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub key_events_count: usize,
    pub pointer_events_count: usize,
    pub focus_events_count: usize,
    pub scroll_events_count: usize,
    pub periods_truncated: u64,
}

/// 60 second tumbling window aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongWindowAggregate {
    pub timestamp: Millis,
    pub window_ms: i64,
    /// RFC 3339 session start
    pub session_start_time: String,
    pub session_duration: i64,
    pub time_since_last_break: i64,
    pub work_continuity_index: f64,
    pub night_hours_flag: bool,
    pub event_intensity: f64,
    pub correction_intensity: f64,
    pub variability_index: f64,
    pub memory_metrics: MemoryMetrics,
}

/// Loop classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    CursorPositionLoop,
}

/// A detected repeated-editing loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub loop_id: String,
    pub timestamp: Millis,
    pub loop_type: LoopType,
    pub loop_duration: i64,
    pub iterations: usize,
    pub correction_pressure: f64,
    pub exit_success: bool,
    /// Within [0, 1]
    pub region_stability: f64,
}

/// Categorical warning signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    HighCorrectionRate,
    VerySlowTyping,
    HighVariability,
    FrequentPauses,
}

/// Coarse session state label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Neutral,
    Flow,
    Overload,
}

/// What caused a state vector to be emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishTrigger {
    Heartbeat,
    ShortWindow,
    LongWindow,
    Debounced,
    Cleared,
}

/// Outward-facing snapshot of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub state_vector_id: String,
    pub session_id: String,
    pub timestamp: Millis,
    pub trigger: PublishTrigger,
    /// Within [0, 100]
    pub load_heuristic: f64,
    pub cognitive_pressure_index: f64,
    /// Rounded realtime wpm
    pub wpm: f64,
    pub correction_rate: f64,
    /// Unrounded wpm of the latest 5s aggregate
    pub current_speed_wpm: f64,
    pub warning_signals: BTreeSet<Warning>,
    pub previous_state_similarity: f64,
    pub state_delta_magnitude: f64,
    pub time_to_user_realization: i64,
    pub session_state: SessionState,
    pub session_duration: i64,
    pub is_recording: bool,
    pub counters: SessionCounters,
}

/// Metrics refreshed every second from the latest 5s aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMetrics {
    pub last_update: Millis,
    pub wpm: f64,
    pub correction_rate: f64,
    pub load_heuristic: f64,
}

/// Activity context attached to a manual tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagContext {
    pub recent_events_count: usize,
    pub recent_corrections: usize,
    pub time_since_last_activity: i64,
}

/// A manual annotation from the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub timestamp: Millis,
    pub session_id: String,
    pub category: String,
    /// Only the length of the note is retained
    pub note_length: usize,
    pub context: TagContext,
}

/// Engine-originated notable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Millis,
    pub metrics: RealtimeMetrics,
    pub suggestion: String,
}

/// Retained record counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub key_events: usize,
    pub pointer_events: usize,
    pub focus_events: usize,
    pub scroll_events: usize,
    pub total_key_events: u64,
    pub total_mouse_events: u64,
}

/// Retained aggregate counts per window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounts {
    pub aggregates_5s: usize,
    pub aggregates_30s: usize,
    pub aggregates_60s: usize,
    pub loop_records: usize,
}

/// Read-only diagnostic view of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub session_id: String,
    pub session_duration: i64,
    pub is_recording: bool,
    pub event_counts: EventCounts,
    pub aggregate_counts: AggregateCounts,
    pub history_limits: HistoryLimits,
    pub periods_truncated: u64,
    /// Records and flushes the sink refused
    pub sink_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_publish_time: Option<Millis>,
}
