//! Load heuristic scoring
//!
//! Pure functions of the latest aggregates (and, for cognitive pressure, the
//! newest keystrokes). Every weight and threshold comes from [`ScoringConfig`].

use crate::config::{LoopConfig, ScoringConfig};
use crate::patterns::{detect_loops, simulate_cursor};
use crate::stats;
use crate::types::{KeyEvent, MediumWindowAggregate, SessionState, ShortWindowAggregate, Warning};
use std::collections::BTreeSet;

/// Upper bound of the load and pressure scales
pub const MAX_SCORE: f64 = 100.0;

/// Bounded 0-100 load score from the latest 5s and 30s aggregates
///
/// Formula: `correction_ratio·40 + [wpm < 20]·20 + min(latency_std / 100, 20) + [pauses > 3]·15`
pub fn load_score(
    short: Option<&ShortWindowAggregate>,
    medium: Option<&MediumWindowAggregate>,
    config: &ScoringConfig,
) -> f64 {
    let Some(short) = short else {
        return 0.0;
    };

    let corrections = (short.correction_ratio * config.correction_weight)
        .clamp(0.0, config.correction_weight);
    let slow = if short.typing_speed_wpm < config.slow_wpm {
        config.slow_penalty
    } else {
        0.0
    };
    let variability =
        (short.inter_key_latency_std / config.latency_std_divisor).clamp(0.0, config.latency_cap);
    let pauses = match medium {
        Some(m) if m.pause_count > config.pause_count_threshold => config.pause_penalty,
        _ => 0.0,
    };

    (corrections + slow + variability + pauses).clamp(0.0, MAX_SCORE)
}

/// Secondary pressure index over the newest keystrokes
///
/// `keys` should already be limited to the newest `pressure_window` events.
pub fn cognitive_pressure(keys: &[&KeyEvent], scoring: &ScoringConfig, loops: &LoopConfig) -> f64 {
    if keys.len() < scoring.pressure_min_events {
        return 0.0;
    }
    let mut pressure = 0.0;

    let corrections = keys.iter().filter(|k| k.is_correction()).count();
    if corrections >= scoring.pressure_correction_count {
        pressure += scoring.pressure_correction_bonus;
    }

    let timestamps: Vec<i64> = keys.iter().map(|k| k.timestamp).collect();
    let cv = stats::coefficient_of_variation(&stats::gaps(&timestamps));
    pressure += (cv * scoring.pressure_cv_weight).min(scoring.pressure_cv_cap);

    let found = detect_loops(&simulate_cursor(keys), loops).len();
    pressure += found as f64 * scoring.pressure_per_loop;

    pressure.clamp(0.0, MAX_SCORE)
}

/// Categorical warnings
///
/// The 5s warnings need a 5s aggregate; `frequent_pauses` only looks at the latest 30s aggregate.
pub fn warnings(
    short: Option<&ShortWindowAggregate>,
    medium: Option<&MediumWindowAggregate>,
    config: &ScoringConfig,
) -> BTreeSet<Warning> {
    let mut signals = BTreeSet::new();
    if let Some(s) = short {
        if s.correction_ratio > config.warn_correction_ratio {
            signals.insert(Warning::HighCorrectionRate);
        }
        if s.typing_speed_wpm < config.warn_slow_wpm {
            signals.insert(Warning::VerySlowTyping);
        }
        if s.inter_key_latency_std > config.warn_latency_std {
            signals.insert(Warning::HighVariability);
        }
    }
    if let Some(m) = medium {
        if m.pause_count > config.warn_pause_count {
            signals.insert(Warning::FrequentPauses);
        }
    }
    signals
}

fn state_metrics(a: &ShortWindowAggregate) -> [f64; 3] {
    [
        a.typing_speed_wpm,
        a.correction_ratio,
        a.inter_key_latency_mean,
    ]
}

/// Mean per-metric similarity of two 5s aggregates, within [0, 1]
///
/// Formula: for each of wpm, correction ratio and latency mean where both
/// values are non-zero, `1 - |a - b| / max(a, b)`; summed and divided by 3.
pub fn state_similarity(
    current: Option<&ShortWindowAggregate>,
    previous: Option<&ShortWindowAggregate>,
) -> f64 {
    let (Some(current), Some(previous)) = (current, previous) else {
        return 0.0;
    };
    let a = state_metrics(current);
    let b = state_metrics(previous);
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| **x != 0.0 && **y != 0.0)
        .map(|(x, y)| {
            let max = x.max(*y);
            if max > 0.0 {
                1.0 - (x - y).abs() / max
            } else {
                0.0
            }
        })
        .sum();
    (total / a.len() as f64).clamp(0.0, 1.0)
}

/// Mean absolute difference of wpm, correction ratio and latency mean
pub fn state_delta(
    current: Option<&ShortWindowAggregate>,
    previous: Option<&ShortWindowAggregate>,
) -> f64 {
    let (Some(current), Some(previous)) = (current, previous) else {
        return 0.0;
    };
    let deltas: Vec<f64> = state_metrics(current)
        .iter()
        .zip(state_metrics(previous).iter())
        .map(|(x, y)| (x - y).abs())
        .collect();
    stats::mean(&deltas)
}

/// Estimated milliseconds before the user notices their own load
pub fn time_to_realization(load: f64, config: &ScoringConfig) -> i64 {
    if load > config.realization_fast_load {
        5_000
    } else if load > config.realization_medium_load {
        15_000
    } else {
        30_000
    }
}

/// Coarse label from load, speed and stability
pub fn session_state(load: f64, wpm: f64, stability: f64, config: &ScoringConfig) -> SessionState {
    if load > config.high_load_threshold {
        SessionState::Overload
    } else if wpm > config.flow_wpm && stability > config.flow_stability {
        SessionState::Flow
    } else {
        SessionState::Neutral
    }
}
