//! Repeated-editing loop detection
//!
//! Keystrokes are replayed into a one-dimensional simulated cursor. A point is
//! part of a loop when the cursor revisited roughly the same position several
//! times within the preceding window.

use super::newest;
use crate::clock::Millis;
use crate::config::LoopConfig;
use crate::stats;
use crate::types::KeyEvent;

/// One simulated cursor sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPoint {
    pub timestamp: Millis,
    pub position: i64,
    pub is_correction: bool,
}

/// A loop found at one cursor point
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLoop {
    /// Timestamp of the point that closed the loop
    pub timestamp: Millis,
    /// Earliest matching point to the closing point
    pub duration: i64,
    pub iterations: usize,
    pub correction_pressure: f64,
    pub exit_success: bool,
    pub region_stability: f64,
}

/// Replay keystrokes into cursor positions
///
/// Printable characters and ArrowRight advance the cursor; Backspace and
/// ArrowLeft move it back, never below zero. Everything else leaves it in place.
pub fn simulate_cursor(events: &[&KeyEvent]) -> Vec<CursorPoint> {
    let mut position: i64 = 0;
    events
        .iter()
        .map(|event| {
            if event.is_char {
                position += 1;
            } else if event.is_backspace {
                position = (position - 1).max(0);
            } else if event.is_navigation {
                match event.key_value.as_str() {
                    "ArrowLeft" => position = (position - 1).max(0),
                    "ArrowRight" => position += 1,
                    _ => {}
                }
            }
            CursorPoint {
                timestamp: event.timestamp,
                position,
                is_correction: event.is_correction(),
            }
        })
        .collect()
}

/// Find loops among the newest `search_points` cursor points
pub fn detect_loops(points: &[CursorPoint], config: &LoopConfig) -> Vec<DetectedLoop> {
    let search = newest(points, config.search_points);
    let mut loops = Vec::new();

    for current in search {
        let window_start = current.timestamp - config.window_ms;
        let similar: Vec<&CursorPoint> = search
            .iter()
            .filter(|p| {
                p.timestamp >= window_start
                    && p.timestamp < current.timestamp
                    && (p.position - current.position).abs() < config.position_tolerance
            })
            .collect();

        if similar.len() < config.min_matches {
            continue;
        }
        let corrections = similar.iter().filter(|p| p.is_correction).count();
        loops.push(DetectedLoop {
            timestamp: current.timestamp,
            duration: current.timestamp - similar[0].timestamp,
            iterations: similar.len(),
            correction_pressure: corrections as f64 / similar.len() as f64,
            exit_success: exit_success(&similar),
            region_stability: region_stability(&similar, config.stability_scale),
        });
    }
    loops
}

/// At least three matches, and the last three are not all at one position
fn exit_success(similar: &[&CursorPoint]) -> bool {
    if similar.len() < 3 {
        return false;
    }
    let tail = newest(similar, 3);
    tail.iter().any(|p| p.position != tail[0].position)
}

/// Formula: `max(0, 1 - variance(positions) / scale)`; 1 for fewer than two points
fn region_stability(similar: &[&CursorPoint], scale: f64) -> f64 {
    if similar.len() < 2 {
        return 1.0;
    }
    let positions: Vec<f64> = similar.iter().map(|p| p.position as f64).collect();
    (1.0 - stats::variance(&positions) / scale).clamp(0.0, 1.0)
}
