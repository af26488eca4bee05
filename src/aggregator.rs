//! Windowed aggregation
//!
//! Three independent tumbling jobs read the history store and produce
//! immutable aggregates. Each job receives the tick's `now` and never samples
//! the clock itself.

use crate::clock::Millis;
use crate::config::{EngineConfig, SessionHeuristics};
use crate::history::HistoryStore;
use crate::patterns::{detect_bursts, detect_pauses, recovery_metrics};
use crate::stats;
use crate::types::{
    KeyEvent, LongWindowAggregate, MediumWindowAggregate, PointerKind, SessionCounters,
    ShortWindowAggregate,
};

/// Characters per word for typing speed
const CHARS_PER_WORD: f64 = 5.0;

/// 5 second aggregate; `None` when the window holds no key events
///
/// `previous` is the latest 5s aggregate before this tick and feeds the speed delta.
pub fn short_window(
    history: &HistoryStore,
    previous: Option<&ShortWindowAggregate>,
    now: Millis,
    config: &EngineConfig,
) -> Option<ShortWindowAggregate> {
    let window_ms = config.windows.short_ms;
    let keys = history.keys_since(now - window_ms);
    if keys.is_empty() {
        return None;
    }
    let pointer = history.pointer_since(now - window_ms);

    let window_secs = window_ms as f64 / 1000.0;
    let window_mins = window_ms as f64 / 60_000.0;

    let latencies = typing_latencies(&keys, config.windows.latency_ceiling_ms);
    let holds: Vec<f64> = keys
        .iter()
        .filter_map(|k| k.hold_time)
        .map(|h| h as f64)
        .collect();

    let chars = keys.iter().filter(|k| k.is_char).count();
    let backspaces = keys.iter().filter(|k| k.is_backspace).count();
    let deletes = keys.iter().filter(|k| k.is_delete).count();
    let undos = keys.iter().filter(|k| k.is_undo).count();
    let corrections = backspaces + deletes;

    let wpm = (chars as f64 / CHARS_PER_WORD) / window_mins;
    let typing_speed_delta = match previous {
        Some(prev) if prev.typing_speed_wpm > 0.0 => {
            (wpm - prev.typing_speed_wpm) / prev.typing_speed_wpm
        }
        _ => 0.0,
    };
    let correction_ratio = if chars > 0 {
        (corrections as f64 / chars as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let bursts = detect_bursts(&keys, &config.bursts);
    let clicks = pointer
        .iter()
        .filter(|p| p.event_type == PointerKind::Click)
        .count();
    let speeds: Vec<f64> = pointer
        .iter()
        .filter_map(|p| p.velocity.map(|v| v.speed))
        .collect();

    Some(ShortWindowAggregate {
        timestamp: now,
        window_ms,
        key_event_count: keys.len(),
        inter_key_latency_mean: stats::mean(&latencies),
        inter_key_latency_std: stats::std_dev(&latencies),
        inter_key_latency_entropy: stats::entropy(&latencies, config.windows.entropy_bucket_ms),
        typing_speed_wpm: wpm,
        typing_speed_delta,
        hold_time_mean: stats::mean(&holds),
        hold_time_variance: stats::variance(&holds),
        backspace_rate: backspaces as f64 / window_secs,
        delete_rate: deletes as f64 / window_secs,
        undo_rate: undos as f64 / window_secs,
        correction_ratio,
        burst_count: bursts.count,
        burst_duration_mean: bursts.mean_duration,
        burst_intensity: bursts.intensity,
        burst_correction_ratio: bursts.correction_ratio,
        click_rate: clicks as f64 / window_secs,
        mouse_velocity_mean: stats::mean(&speeds),
    })
}

/// 30 second aggregate; `None` below `medium_min_events` key events
pub fn medium_window(
    history: &HistoryStore,
    counters: &SessionCounters,
    now: Millis,
    config: &EngineConfig,
) -> Option<MediumWindowAggregate> {
    let window_ms = config.windows.medium_ms;
    let keys = history.keys_since(now - window_ms);
    if keys.len() < config.windows.medium_min_events {
        return None;
    }

    let pauses = detect_pauses(&keys, &config.pauses);
    let recovery = recovery_metrics(&keys, &config.pauses);

    Some(MediumWindowAggregate {
        timestamp: now,
        window_ms,
        key_event_count: keys.len(),
        pause_count: pauses.count,
        pause_mean_duration: pauses.mean_duration,
        long_pause_count: pauses.long_count,
        micro_pause_rate: pauses.micro_rate,
        speed_after_pause: recovery.speed_after_pause,
        correction_after_pause: recovery.correction_after_pause,
        latency_after_pause: recovery.latency_after_pause,
        cumulative_keystrokes: counters.cumulative_keystrokes,
        cumulative_corrections: counters.cumulative_corrections,
        correction_pressure: counters.correction_pressure(),
    })
}

/// 60 second session-level aggregate; always produced
///
/// `local_hour` is the wall-clock hour of `now` in the clock's zone.
pub fn long_window(
    history: &HistoryStore,
    counters: &SessionCounters,
    now: Millis,
    local_hour: u32,
    config: &EngineConfig,
) -> LongWindowAggregate {
    let session = &config.session;
    let duration = counters.duration_ms(now);
    let elapsed_secs = duration as f64 / 1000.0;

    let per_second = |count: u64| {
        if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        }
    };

    LongWindowAggregate {
        timestamp: now,
        window_ms: config.windows.long_ms,
        session_start_time: crate::clock::to_rfc3339(counters.session_start_time),
        session_duration: duration,
        time_since_last_break: time_since_last_break(history, counters, now, session),
        work_continuity_index: continuity_index(history, duration, session),
        night_hours_flag: is_night_hour(local_hour, session),
        event_intensity: per_second(counters.cumulative_keystrokes),
        correction_intensity: per_second(counters.cumulative_corrections),
        variability_index: variability_index(history, session),
        memory_metrics: history.memory_metrics(counters.periods_truncated),
    }
}

/// Consecutive keydown gaps strictly between 0 and `ceiling`
fn typing_latencies(keys: &[&KeyEvent], ceiling: i64) -> Vec<f64> {
    keys.windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|gap| *gap > 0 && *gap < ceiling)
        .map(|gap| gap as f64)
        .collect()
}

fn key_timestamps(history: &HistoryStore, n: usize) -> Vec<Millis> {
    history.keys.newest(n).map(|k| k.timestamp).collect()
}

/// Time since the end of the most recent break, or since session start
///
/// A break is a gap longer than `break_gap_ms` between consecutive keydowns
/// among the newest `break_scan_events`.
fn time_since_last_break(
    history: &HistoryStore,
    counters: &SessionCounters,
    now: Millis,
    session: &SessionHeuristics,
) -> i64 {
    let timestamps = key_timestamps(history, session.break_scan_events);
    let resumed = timestamps
        .windows(2)
        .rev()
        .find(|w| w[1] - w[0] > session.break_gap_ms)
        .map(|w| w[1]);

    match resumed {
        Some(ts) => now - ts,
        None => counters.duration_ms(now),
    }
}

/// Formula: `Σ(intervals < active_gap_ms) / session_duration`, within [0, 1]
fn continuity_index(history: &HistoryStore, duration: i64, session: &SessionHeuristics) -> f64 {
    if duration <= 0 {
        return 0.0;
    }
    let timestamps = key_timestamps(history, session.continuity_scan_events);
    let active: i64 = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap < session.active_gap_ms)
        .sum();
    (active as f64 / duration as f64).clamp(0.0, 1.0)
}

/// Coefficient of variation of inter-key gaps over the newest keystrokes
fn variability_index(history: &HistoryStore, session: &SessionHeuristics) -> f64 {
    let timestamps = key_timestamps(history, session.variability_window);
    if timestamps.len() < session.variability_min_events {
        return 0.0;
    }
    stats::coefficient_of_variation(&stats::gaps(&timestamps))
}

/// Night spans midnight when the start hour is after the end hour
pub fn is_night_hour(hour: u32, session: &SessionHeuristics) -> bool {
    if session.night_start_hour > session.night_end_hour {
        hour >= session.night_start_hour || hour <= session.night_end_hour
    } else {
        hour >= session.night_start_hour && hour <= session.night_end_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryLimits;
    use crate::normalizer::EventNormalizer;
    use crate::schema::RawEvent;

    const T0: Millis = 1_705_327_200_000;

    struct Session {
        config: EngineConfig,
        normalizer: EventNormalizer,
        history: HistoryStore,
        counters: SessionCounters,
    }

    impl Session {
        fn new() -> Self {
            let config = EngineConfig::default();
            Self {
                normalizer: EventNormalizer::new(&config.history),
                history: HistoryStore::new(&config.history),
                counters: SessionCounters::new(T0),
                config,
            }
        }

        fn push(&mut self, raw: RawEvent) {
            self.normalizer
                .ingest(raw, T0, &mut self.history, &mut self.counters);
        }

        fn type_keys(&mut self, start: Millis, spacing: i64, keys: &[&str]) {
            for (i, key) in keys.iter().enumerate() {
                self.push(RawEvent::keydown(start + spacing * i as i64, key));
            }
        }
    }

    #[test]
    fn test_five_chars_is_twelve_wpm() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 300, &["h", "e", "l", "l", "o"]);

        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert!((agg.typing_speed_wpm - 12.0).abs() < 1e-9);
        assert_eq!(agg.key_event_count, 5);
        assert_eq!(agg.correction_ratio, 0.0);
        assert_eq!(agg.typing_speed_delta, 0.0);
    }

    #[test]
    fn test_constant_latency_has_zero_std() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["a", "b", "c", "d", "e"]);

        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert_eq!(agg.inter_key_latency_mean, 100.0);
        assert_eq!(agg.inter_key_latency_std, 0.0);
        assert_eq!(agg.inter_key_latency_entropy, 0.0);
    }

    #[test]
    fn test_empty_window_is_skipped() {
        let mut s = Session::new();
        s.type_keys(T0, 100, &["a"]);
        assert!(short_window(&s.history, None, T0 + 10_000, &s.config).is_none());
    }

    #[test]
    fn test_correction_ratio_is_clamped() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["a", "Backspace", "Backspace", "Delete"]);
        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert_eq!(agg.correction_ratio, 1.0);
        assert!((agg.backspace_rate - 0.4).abs() < 1e-9);
        assert!((agg.delete_rate - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_corrections_without_chars_have_zero_ratio() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["Backspace", "Backspace"]);
        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert_eq!(agg.correction_ratio, 0.0);
    }

    #[test]
    fn test_speed_delta_against_previous() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["a", "b", "c", "d", "e"]);
        let first = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();

        s.type_keys(T0 + 6_000, 100, &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let second = short_window(&s.history, Some(&first), T0 + 10_000, &s.config).unwrap();
        assert!((second.typing_speed_wpm - 24.0).abs() < 1e-9);
        assert!((second.typing_speed_delta - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pointer_metrics() {
        let mut s = Session::new();
        s.type_keys(T0 + 100, 100, &["a"]);
        for i in 0..5 {
            s.push(RawEvent::mouse_move(
                T0 + 1_000 + 50 * i,
                10.0 * i as f64,
                10.0 * i as f64,
            ));
        }
        s.push(RawEvent::click(T0 + 2_000, 40.0, 40.0));

        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert!((agg.mouse_velocity_mean - 200f64.sqrt() / 50.0).abs() < 1e-9);
        assert!((agg.click_rate - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_medium_window_needs_three_events() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["a", "b"]);
        assert!(medium_window(&s.history, &s.counters, T0 + 30_000, &s.config).is_none());

        s.type_keys(T0 + 3_000, 100, &["c"]);
        let agg = medium_window(&s.history, &s.counters, T0 + 30_000, &s.config).unwrap();
        assert_eq!(agg.pause_count, 1);
        assert_eq!(agg.cumulative_keystrokes, 3);
        assert_eq!(agg.correction_pressure, 0.0);
    }

    #[test]
    fn test_long_window_session_metrics() {
        let mut s = Session::new();
        // a burst, a six minute break, then another burst
        s.type_keys(T0 + 1_000, 100, &["a", "b", "c"]);
        s.type_keys(T0 + 400_000, 100, &["d", "e", "f"]);
        let now = T0 + 420_000;

        let agg = long_window(&s.history, &s.counters, now, 14, &s.config);
        assert_eq!(agg.session_duration, 420_000);
        assert_eq!(agg.time_since_last_break, 20_000);
        assert!(!agg.night_hours_flag);
        assert!((agg.work_continuity_index - 400.0 / 420_000.0).abs() < 1e-12);
        assert_eq!(agg.memory_metrics.key_events_count, 6);
        assert_eq!(agg.session_start_time, "2024-01-15T14:00:00+00:00");
    }

    #[test]
    fn test_no_break_falls_back_to_session_start() {
        let mut s = Session::new();
        s.type_keys(T0 + 1_000, 100, &["a", "b"]);
        let agg = long_window(&s.history, &s.counters, T0 + 60_000, 9, &s.config);
        assert_eq!(agg.time_since_last_break, 60_000);
    }

    #[test]
    fn test_variability_index() {
        let mut s = Session::new();
        s.type_keys(T0, 100, &["a"; 5]);
        let agg = long_window(&s.history, &s.counters, T0 + 60_000, 12, &s.config);
        // fewer than 10 events
        assert_eq!(agg.variability_index, 0.0);

        s.type_keys(T0 + 500, 100, &["a"; 10]);
        let agg = long_window(&s.history, &s.counters, T0 + 60_000, 12, &s.config);
        assert_eq!(agg.variability_index, 0.0);
    }

    #[test]
    fn test_night_hours() {
        let session = SessionHeuristics::default();
        assert!(is_night_hour(22, &session));
        assert!(is_night_hour(3, &session));
        assert!(is_night_hour(6, &session));
        assert!(!is_night_hour(7, &session));
        assert!(!is_night_hour(21, &session));

        let daytime = SessionHeuristics {
            night_start_hour: 9,
            night_end_hour: 17,
            ..SessionHeuristics::default()
        };
        assert!(is_night_hour(12, &daytime));
        assert!(!is_night_hour(18, &daytime));
    }

    #[test]
    fn test_retained_limits_respected_by_window() {
        let config = EngineConfig {
            history: HistoryLimits {
                key_events: 3,
                trim_slack: 0.0,
                ..HistoryLimits::default()
            },
            ..EngineConfig::default()
        };
        let mut s = Session::new();
        s.history = HistoryStore::new(&config.history);
        s.config = config;
        s.type_keys(T0 + 1_000, 100, &["a", "b", "c", "d", "e"]);

        let agg = short_window(&s.history, None, T0 + 5_000, &s.config).unwrap();
        assert_eq!(agg.key_event_count, 3);
    }
}
