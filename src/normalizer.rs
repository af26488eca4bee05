//! Event normalization
//!
//! Converts raw wire events into typed records, derives hold time, inter-key
//! latency and pointer velocity, and applies the record to the history store
//! and session counters.

use crate::clock::Millis;
use crate::config::HistoryLimits;
use crate::history::HistoryStore;
use crate::schema::{RawEvent, RawKey, RawPointer, RawScroll, RawTarget};
use crate::types::{
    Delta, FocusEvent, FocusKind, KeyEvent, KeyPhase, Modifiers, NormalizedRecord, Point,
    PointerEvent, PointerKind, ScrollEvent, SessionCounters, Velocity,
};
use tracing::debug;

/// Placeholder for absent target descriptors
const NONE: &str = "none";

/// Key code used when the capture layer sent none
const UNIDENTIFIED: &str = "Unidentified";

const NAVIGATION_KEYS: [&str; 8] = [
    "ArrowUp",
    "ArrowDown",
    "ArrowLeft",
    "ArrowRight",
    "Home",
    "End",
    "PageUp",
    "PageDown",
];

/// Stateful normalizer for one session
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    scan_limit: usize,
    last_release: Option<Millis>,
}

impl EventNormalizer {
    pub fn new(limits: &HistoryLimits) -> Self {
        Self {
            scan_limit: limits.key_match_scan_limit,
            last_release: None,
        }
    }

    /// Forget per-session matching state
    pub fn reset(&mut self) {
        self.last_release = None;
    }

    /// Normalize `raw`, append it to `history` and update `counters`
    ///
    /// Events without a timestamp are stamped with `now`.
    pub fn ingest(
        &mut self,
        raw: RawEvent,
        now: Millis,
        history: &mut HistoryStore,
        counters: &mut SessionCounters,
    ) -> NormalizedRecord {
        let timestamp = raw.timestamp().unwrap_or(now);
        match raw {
            RawEvent::Keydown(key) => {
                let event = key_event(key, timestamp, KeyPhase::Keydown);
                counters.total_key_events += 1;
                counters.cumulative_keystrokes += 1;
                if event.is_correction() {
                    counters.cumulative_corrections += 1;
                }
                counters.last_activity_time = timestamp;
                if history.keys.push(event.clone()) {
                    counters.periods_truncated += 1;
                    debug!(ring = "keys", retained = history.keys.len(), "trimmed history");
                }
                NormalizedRecord::Key(event)
            }
            RawEvent::Keyup(key) => {
                let mut event = key_event(key, timestamp, KeyPhase::Keyup);
                self.match_keydown(&mut event, history);
                counters.last_activity_time = timestamp;
                NormalizedRecord::Key(event)
            }
            RawEvent::MouseMove(p) => pointer(p, PointerKind::Move, timestamp, history, counters),
            RawEvent::MouseDown(p) => pointer(p, PointerKind::Down, timestamp, history, counters),
            RawEvent::MouseUp(p) => pointer(p, PointerKind::Up, timestamp, history, counters),
            RawEvent::Click(p) => {
                counters.cumulative_clicks += 1;
                pointer(p, PointerKind::Click, timestamp, history, counters)
            }
            RawEvent::FocusIn(_) => focus(FocusKind::FocusIn, timestamp, history),
            RawEvent::FocusOut(_) => focus(FocusKind::FocusOut, timestamp, history),
            RawEvent::Scroll(s) => scroll(s, timestamp, history),
        }
    }

    /// Annotate the newest unmatched keydown with the same code
    fn match_keydown(&mut self, keyup: &mut KeyEvent, history: &mut HistoryStore) {
        let keydown = history
            .keys
            .iter_mut()
            .rev()
            .take(self.scan_limit)
            .find(|k| k.key_code == keyup.key_code && k.hold_time.is_none());

        let Some(keydown) = keydown else {
            return;
        };
        let hold = (keyup.timestamp - keydown.timestamp).max(0);
        keydown.hold_time = Some(hold);
        keyup.hold_time = Some(hold);

        if let Some(prev) = self.last_release {
            keyup.inter_key_latency = Some(keyup.timestamp - prev);
        }
        self.last_release = Some(keyup.timestamp);
    }
}

fn pointer(
    raw: RawPointer,
    kind: PointerKind,
    timestamp: Millis,
    history: &mut HistoryStore,
    counters: &mut SessionCounters,
) -> NormalizedRecord {
    let position = Point {
        x: raw.client_x.unwrap_or(0.0),
        y: raw.client_y.unwrap_or(0.0),
    };

    let (delta, velocity) = match history.pointer.last() {
        Some(prev) if kind == PointerKind::Move && prev.event_type == PointerKind::Move => {
            let (d, v) = movement(prev, position, timestamp);
            (Some(d), Some(v))
        }
        _ => (None, None),
    };

    let target = raw.target.unwrap_or_default();
    let event = PointerEvent {
        timestamp,
        event_type: kind,
        position,
        screen: point(raw.screen_x, raw.screen_y),
        page: point(raw.page_x, raw.page_y),
        delta,
        velocity,
        button: raw.button,
        click_count: raw.detail,
        target_tag: or_none(target.tag),
        target_id: or_none(target.id),
        target_class: or_none(target.class),
    };

    counters.total_mouse_events += 1;
    counters.last_activity_time = timestamp;
    if history.pointer.push(event.clone()) {
        counters.periods_truncated += 1;
        debug!(ring = "pointer", retained = history.pointer.len(), "trimmed history");
    }
    NormalizedRecord::Pointer(event)
}

fn key_event(raw: RawKey, timestamp: Millis, phase: KeyPhase) -> KeyEvent {
    let key_value = raw.key.unwrap_or_default();
    let key_code = raw.code.unwrap_or_else(|| UNIDENTIFIED.to_string());
    let target = raw.target.unwrap_or_default();
    let target_type = target_type(&target);
    let key_length = key_value.chars().count();
    let command = raw.ctrl || raw.meta;

    KeyEvent {
        timestamp,
        event_type: phase,
        is_char: key_length == 1 && !raw.ctrl && !raw.alt,
        is_control: command,
        is_navigation: NAVIGATION_KEYS.contains(&key_value.as_str()),
        is_backspace: key_value == "Backspace",
        is_delete: key_value == "Delete",
        is_enter: key_value == "Enter",
        is_undo: command && key_value == "z",
        is_repeat: raw.repeat,
        modifiers: Modifiers {
            ctrl: raw.ctrl,
            shift: raw.shift,
            alt: raw.alt,
            meta: raw.meta,
        },
        hold_time: None,
        inter_key_latency: None,
        target_tag: or_none(target.tag),
        target_type,
        key_code,
        key_value,
        key_length,
    }
}

fn target_type(target: &RawTarget) -> String {
    target
        .input_type
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NONE.to_string())
}

fn movement(prev: &PointerEvent, position: Point, timestamp: Millis) -> (Delta, Velocity) {
    let dx = position.x - prev.position.x;
    let dy = position.y - prev.position.y;
    let distance = (dx * dx + dy * dy).sqrt();
    let dt = (timestamp - prev.timestamp) as f64;

    let velocity = if dt > 0.0 {
        Velocity {
            x: dx / dt,
            y: dy / dt,
            speed: distance / dt,
        }
    } else {
        Velocity::default()
    };
    (
        Delta {
            x: dx,
            y: dy,
            distance,
        },
        velocity,
    )
}

fn focus(kind: FocusKind, timestamp: Millis, history: &mut HistoryStore) -> NormalizedRecord {
    let blur_duration = match history.focus.last() {
        Some(prev) if kind == FocusKind::FocusIn && prev.event_type == FocusKind::FocusOut => {
            Some(timestamp - prev.timestamp)
        }
        _ => None,
    };
    let event = FocusEvent {
        timestamp,
        event_type: kind,
        blur_duration,
    };
    history.focus.push(event.clone());
    NormalizedRecord::Focus(event)
}

fn scroll(raw: RawScroll, timestamp: Millis, history: &mut HistoryStore) -> NormalizedRecord {
    let event = ScrollEvent {
        timestamp,
        offset: Point {
            x: raw.scroll_x.unwrap_or(0.0),
            y: raw.scroll_y.unwrap_or(0.0),
        },
        delta: Point {
            x: raw.delta_x.unwrap_or(0.0),
            y: raw.delta_y.unwrap_or(0.0),
        },
        target_tag: or_none(raw.target.and_then(|t| t.tag)),
    };
    history.scroll.push(event.clone());
    NormalizedRecord::Scroll(event)
}

fn point(x: Option<f64>, y: Option<f64>) -> Option<Point> {
    match (x, y) {
        (Some(x), Some(y)) => Some(Point { x, y }),
        _ => None,
    }
}

fn or_none(value: Option<String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| NONE.to_string())
}
