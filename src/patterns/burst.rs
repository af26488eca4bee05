//! Burst detection
//!
//! A burst is a run of keystrokes where every gap to the previous keystroke is
//! shorter than `gap_ms`. Runs shorter than `min_events` are discarded.

use super::newest;
use crate::config::BurstConfig;
use crate::types::{BurstStats, KeyEvent};

struct Burst {
    start: i64,
    end: i64,
    events: usize,
    corrections: usize,
}

impl Burst {
    fn open(event: &KeyEvent) -> Self {
        Self {
            start: event.timestamp,
            end: event.timestamp,
            events: 1,
            corrections: 0,
        }
    }
}

/// Summarize bursts among the newest `max_events` keystrokes
pub fn detect_bursts(events: &[&KeyEvent], config: &BurstConfig) -> BurstStats {
    let mut bursts: Vec<Burst> = Vec::new();
    let mut current: Option<Burst> = None;

    for event in newest(events, config.max_events) {
        match current.as_mut() {
            Some(burst) if event.timestamp - burst.end < config.gap_ms => {
                burst.end = event.timestamp;
                burst.events += 1;
                if event.is_correction() {
                    burst.corrections += 1;
                }
            }
            _ => {
                if let Some(done) = current.take() {
                    if done.events >= config.min_events {
                        bursts.push(done);
                    }
                }
                current = Some(Burst::open(event));
            }
        }
    }
    if let Some(done) = current {
        if done.events >= config.min_events {
            bursts.push(done);
        }
    }

    if bursts.is_empty() {
        return BurstStats::default();
    }

    let count = bursts.len() as f64;
    let total_events: usize = bursts.iter().map(|b| b.events).sum();
    let total_corrections: usize = bursts.iter().map(|b| b.corrections).sum();
    let total_duration: i64 = bursts.iter().map(|b| b.end - b.start).sum();

    BurstStats {
        count: bursts.len() as u32,
        mean_duration: total_duration as f64 / count,
        intensity: total_events as f64 / count,
        correction_ratio: total_corrections as f64 / total_events as f64,
    }
}
