//! Pause detection and post-pause recovery metrics

use super::newest;
use crate::config::PauseConfig;
use crate::types::{KeyEvent, PauseStats};

/// How typing resumes after a pause
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecoveryMetrics {
    /// Events per second over the three keystrokes following a pause
    pub speed_after_pause: f64,
    /// Correction fraction over the five keystrokes following a pause
    pub correction_after_pause: f64,
    /// First inter-key gap after a pause
    pub latency_after_pause: f64,
}

/// Summarize pauses among the newest `max_events` keystrokes
pub fn detect_pauses(events: &[&KeyEvent], config: &PauseConfig) -> PauseStats {
    let window = newest(events, config.max_events);

    let mut count = 0u32;
    let mut long_count = 0u32;
    let mut micro_count = 0u32;
    let mut total = 0i64;

    for pair in window.windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        if gap <= config.threshold_ms {
            continue;
        }
        count += 1;
        total += gap;
        if gap > config.long_ms {
            long_count += 1;
        }
        // only reachable when threshold_ms < micro_max_ms
        if gap > config.micro_min_ms && gap < config.micro_max_ms {
            micro_count += 1;
        }
    }

    PauseStats {
        count,
        mean_duration: if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        },
        long_count,
        micro_rate: micro_count as f64 / window.len().max(1) as f64,
    }
}

/// Recovery behavior after every gap of at least `recovery_gap_ms`
pub fn recovery_metrics(events: &[&KeyEvent], config: &PauseConfig) -> RecoveryMetrics {
    let window = newest(events, config.recovery_events);
    let n = window.len();

    let mut speed_sum = 0.0;
    let mut speed_samples = 0u32;
    let mut corrections = 0usize;
    let mut correction_events = 0usize;
    let mut latency_sum = 0i64;
    let mut latency_samples = 0u32;

    for i in 1..n {
        if window[i].timestamp - window[i - 1].timestamp < config.recovery_gap_ms {
            continue;
        }
        if i + 3 < n {
            let duration = window[i + 2].timestamp - window[i].timestamp;
            speed_sum += if duration > 0 {
                3.0 / duration as f64 * 1000.0
            } else {
                0.0
            };
            speed_samples += 1;
        }
        if i + 5 < n {
            corrections += window[i..i + 5].iter().filter(|e| e.is_correction()).count();
            correction_events += 5;
        }
        if i + 1 < n {
            latency_sum += window[i + 1].timestamp - window[i].timestamp;
            latency_samples += 1;
        }
    }

    RecoveryMetrics {
        speed_after_pause: ratio(speed_sum, speed_samples as f64),
        correction_after_pause: ratio(corrections as f64, correction_events as f64),
        latency_after_pause: ratio(latency_sum as f64, latency_samples as f64),
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
