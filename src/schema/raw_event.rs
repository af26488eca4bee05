//! strain.raw_event.v1 schema definition
//!
//! The upstream capture layer pushes one JSON object per interaction event,
//! tagged by `"type"`. Every field except the tag is optional: the normalizer
//! fills safe defaults for anything missing, and [`RawEvent::degraded_fields`]
//! reports which defaults were needed.

use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "strain.raw_event.v1";

/// Element the event was dispatched to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTarget {
    /// Element tag name (e.g. "TEXTAREA")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Input type attribute (e.g. "text")
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

/// Keyboard payload shared by keydown and keyup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
    /// Produced key value (e.g. "a", "Backspace")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Physical key code (e.g. "KeyA")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawTarget>,
}

/// Pointer payload shared by move, down, up and click
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPointer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<i32>,
    /// Click count reported by the UI runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawTarget>,
}

/// Focus payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFocus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
}

/// Scroll payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScroll {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawTarget>,
}

/// One raw interaction event, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Keydown(RawKey),
    Keyup(RawKey),
    #[serde(rename = "mousemove")]
    MouseMove(RawPointer),
    #[serde(rename = "mousedown")]
    MouseDown(RawPointer),
    #[serde(rename = "mouseup")]
    MouseUp(RawPointer),
    Click(RawPointer),
    FocusIn(RawFocus),
    FocusOut(RawFocus),
    Scroll(RawScroll),
}

impl RawEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            RawEvent::Keydown(_) => "keydown",
            RawEvent::Keyup(_) => "keyup",
            RawEvent::MouseMove(_) => "mousemove",
            RawEvent::MouseDown(_) => "mousedown",
            RawEvent::MouseUp(_) => "mouseup",
            RawEvent::Click(_) => "click",
            RawEvent::FocusIn(_) => "focus_in",
            RawEvent::FocusOut(_) => "focus_out",
            RawEvent::Scroll(_) => "scroll",
        }
    }

    /// Source timestamp, if the capture layer supplied one
    pub fn timestamp(&self) -> Option<Millis> {
        match self {
            RawEvent::Keydown(k) | RawEvent::Keyup(k) => k.timestamp,
            RawEvent::MouseMove(p)
            | RawEvent::MouseDown(p)
            | RawEvent::MouseUp(p)
            | RawEvent::Click(p) => p.timestamp,
            RawEvent::FocusIn(f) | RawEvent::FocusOut(f) => f.timestamp,
            RawEvent::Scroll(s) => s.timestamp,
        }
    }

    /// Whether ingesting this event should request a debounced publish
    pub fn requests_publish(&self) -> bool {
        !matches!(self, RawEvent::MouseMove(_) | RawEvent::Scroll(_))
    }

    /// Names of fields that are missing and will be filled with defaults
    pub fn degraded_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.timestamp().is_none() {
            missing.push("timestamp");
        }
        match self {
            RawEvent::Keydown(k) | RawEvent::Keyup(k) => {
                if k.key.is_none() {
                    missing.push("key");
                }
                if k.code.is_none() {
                    missing.push("code");
                }
                target_gaps(k.target.as_ref(), true, &mut missing);
            }
            RawEvent::MouseMove(p)
            | RawEvent::MouseDown(p)
            | RawEvent::MouseUp(p)
            | RawEvent::Click(p) => {
                if p.client_x.is_none() {
                    missing.push("client_x");
                }
                if p.client_y.is_none() {
                    missing.push("client_y");
                }
                if matches!(self, RawEvent::Click(_)) {
                    target_gaps(p.target.as_ref(), false, &mut missing);
                }
            }
            RawEvent::FocusIn(_) | RawEvent::FocusOut(_) => {}
            RawEvent::Scroll(s) => {
                if s.delta_x.is_none() {
                    missing.push("delta_x");
                }
                if s.delta_y.is_none() {
                    missing.push("delta_y");
                }
            }
        }
        missing
    }

    /// Keydown for `key` with a derived key code
    pub fn keydown(timestamp: Millis, key: &str) -> Self {
        RawEvent::Keydown(RawKey::new(timestamp, key))
    }

    /// Keyup for `key` with a derived key code
    pub fn keyup(timestamp: Millis, key: &str) -> Self {
        RawEvent::Keyup(RawKey::new(timestamp, key))
    }

    pub fn mouse_move(timestamp: Millis, x: f64, y: f64) -> Self {
        RawEvent::MouseMove(RawPointer::at(timestamp, x, y))
    }

    pub fn click(timestamp: Millis, x: f64, y: f64) -> Self {
        RawEvent::Click(RawPointer {
            button: Some(0),
            detail: Some(1),
            ..RawPointer::at(timestamp, x, y)
        })
    }

    pub fn focus_in(timestamp: Millis) -> Self {
        RawEvent::FocusIn(RawFocus {
            timestamp: Some(timestamp),
        })
    }

    pub fn focus_out(timestamp: Millis) -> Self {
        RawEvent::FocusOut(RawFocus {
            timestamp: Some(timestamp),
        })
    }

    pub fn scroll(timestamp: Millis, delta_x: f64, delta_y: f64) -> Self {
        RawEvent::Scroll(RawScroll {
            timestamp: Some(timestamp),
            delta_x: Some(delta_x),
            delta_y: Some(delta_y),
            ..RawScroll::default()
        })
    }
}

impl RawKey {
    /// Key payload with a code derived the way browsers name letter and digit keys
    pub fn new(timestamp: Millis, key: &str) -> Self {
        Self {
            timestamp: Some(timestamp),
            key: Some(key.to_string()),
            code: Some(derive_code(key)),
            target: Some(RawTarget {
                tag: Some("TEXTAREA".to_string()),
                input_type: Some("textarea".to_string()),
                ..RawTarget::default()
            }),
            ..Self::default()
        }
    }

    /// Same payload with ctrl held
    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }
}

impl RawPointer {
    pub fn at(timestamp: Millis, x: f64, y: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            client_x: Some(x),
            client_y: Some(y),
            ..Self::default()
        }
    }
}

fn derive_code(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
        (Some(c), None) if c.is_ascii_digit() => format!("Digit{c}"),
        (Some(' '), None) => "Space".to_string(),
        _ => key.to_string(),
    }
}

fn target_gaps(target: Option<&RawTarget>, wants_type: bool, missing: &mut Vec<&'static str>) {
    match target {
        None => missing.push("target"),
        Some(t) => {
            if t.tag.is_none() {
                missing.push("target.tag");
            }
            if wants_type && t.input_type.is_none() {
                missing.push("target.type");
            }
        }
    }
}
