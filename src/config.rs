//! Engine configuration
//!
//! All heuristic thresholds and weights live here as named, overridable values.
//! Every section deserializes with defaults, so a partial JSON document only
//! overrides the keys it names.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest accepted `history.trim_slack` ratio
pub const MAX_TRIM_SLACK: f64 = 10.0;

/// Capacity limits for retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryLimits {
    pub key_events: usize,
    pub pointer_events: usize,
    pub focus_events: usize,
    pub scroll_events: usize,
    pub aggregates_5s: usize,
    pub aggregates_30s: usize,
    pub aggregates_60s: usize,
    pub loop_records: usize,
    /// Rings trim physically once they exceed `capacity * (1 + trim_slack)`
    pub trim_slack: f64,
    /// Key and pointer records older than this are swept on the 60s tick
    pub retention_ms: i64,
    /// How many keydowns a keyup may scan back for its match
    pub key_match_scan_limit: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            key_events: 10_000,
            pointer_events: 5_000,
            focus_events: 100,
            scroll_events: 500,
            aggregates_5s: 720,
            aggregates_30s: 120,
            aggregates_60s: 60,
            loop_records: 1_000,
            trim_slack: 0.1,
            retention_ms: 5 * 60 * 1000,
            key_match_scan_limit: 64,
        }
    }
}

/// Tick periods and window sizes, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub short_ms: i64,
    pub medium_ms: i64,
    pub long_ms: i64,
    pub realtime_ms: i64,
    pub heartbeat_ms: i64,
    pub debounce_ms: i64,
    pub flush_ms: i64,
    /// Minimum key events for the 30s job to emit
    pub medium_min_events: usize,
    /// Inter-key gaps at or above this are not treated as typing latency
    pub latency_ceiling_ms: i64,
    /// Histogram bucket width for latency entropy
    pub entropy_bucket_ms: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            short_ms: 5_000,
            medium_ms: 30_000,
            long_ms: 60_000,
            realtime_ms: 1_000,
            heartbeat_ms: 5_000,
            debounce_ms: 500,
            flush_ms: 30_000,
            medium_min_events: 3,
            latency_ceiling_ms: 5_000,
            entropy_bucket_ms: 10.0,
        }
    }
}

/// Burst detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub gap_ms: i64,
    pub min_events: usize,
    pub max_events: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            gap_ms: 200,
            min_events: 3,
            max_events: 100,
        }
    }
}

/// Pause detector and recovery-metric tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseConfig {
    pub threshold_ms: i64,
    pub long_ms: i64,
    pub micro_min_ms: i64,
    pub micro_max_ms: i64,
    pub max_events: usize,
    pub recovery_gap_ms: i64,
    pub recovery_events: usize,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 1_000,
            long_ms: 5_000,
            micro_min_ms: 50,
            micro_max_ms: 200,
            max_events: 50,
            recovery_gap_ms: 2_000,
            recovery_events: 30,
        }
    }
}

/// Loop detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub lookback_ms: i64,
    pub min_events: usize,
    pub max_events: usize,
    pub search_points: usize,
    pub window_ms: i64,
    pub position_tolerance: i64,
    pub min_matches: usize,
    pub stability_scale: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            lookback_ms: 60_000,
            min_events: 10,
            max_events: 200,
            search_points: 100,
            window_ms: 30_000,
            position_tolerance: 3,
            min_matches: 2,
            stability_scale: 100.0,
        }
    }
}

/// Load score, pressure and warning weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub correction_weight: f64,
    pub slow_wpm: f64,
    pub slow_penalty: f64,
    pub latency_std_divisor: f64,
    pub latency_cap: f64,
    pub pause_count_threshold: u32,
    pub pause_penalty: f64,

    pub warn_correction_ratio: f64,
    pub warn_slow_wpm: f64,
    pub warn_latency_std: f64,
    pub warn_pause_count: u32,

    pub pressure_window: usize,
    pub pressure_min_events: usize,
    pub pressure_correction_count: usize,
    pub pressure_correction_bonus: f64,
    pub pressure_cv_weight: f64,
    pub pressure_cv_cap: f64,
    pub pressure_per_loop: f64,

    pub high_load_threshold: f64,
    pub flow_wpm: f64,
    pub flow_stability: f64,
    pub realization_fast_load: f64,
    pub realization_medium_load: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            correction_weight: 40.0,
            slow_wpm: 20.0,
            slow_penalty: 20.0,
            latency_std_divisor: 100.0,
            latency_cap: 20.0,
            pause_count_threshold: 3,
            pause_penalty: 15.0,

            warn_correction_ratio: 0.3,
            warn_slow_wpm: 10.0,
            warn_latency_std: 500.0,
            warn_pause_count: 5,

            pressure_window: 100,
            pressure_min_events: 20,
            pressure_correction_count: 5,
            pressure_correction_bonus: 30.0,
            pressure_cv_weight: 20.0,
            pressure_cv_cap: 40.0,
            pressure_per_loop: 10.0,

            high_load_threshold: 80.0,
            flow_wpm: 40.0,
            flow_stability: 0.8,
            realization_fast_load: 70.0,
            realization_medium_load: 40.0,
        }
    }
}

/// Session-level heuristics used by the 60s job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionHeuristics {
    pub break_gap_ms: i64,
    pub break_scan_events: usize,
    pub active_gap_ms: i64,
    pub continuity_scan_events: usize,
    pub variability_window: usize,
    pub variability_min_events: usize,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub tag_context_events: usize,
}

impl Default for SessionHeuristics {
    fn default() -> Self {
        Self {
            break_gap_ms: 5 * 60 * 1000,
            break_scan_events: 500,
            active_gap_ms: 2_000,
            continuity_scan_events: 1_000,
            variability_window: 50,
            variability_min_events: 10,
            night_start_hour: 22,
            night_end_hour: 6,
            tag_context_events: 1_000,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistoryLimits,
    pub windows: WindowConfig,
    pub bursts: BurstConfig,
    pub pauses: PauseConfig,
    pub loops: LoopConfig,
    pub scoring: ScoringConfig,
    pub session: SessionHeuristics,
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let h = &self.history;
        let capacities = [
            ("history.key_events", h.key_events),
            ("history.pointer_events", h.pointer_events),
            ("history.focus_events", h.focus_events),
            ("history.scroll_events", h.scroll_events),
            ("history.aggregates_5s", h.aggregates_5s),
            ("history.aggregates_30s", h.aggregates_30s),
            ("history.aggregates_60s", h.aggregates_60s),
            ("history.loop_records", h.loop_records),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(EngineError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if !(0.0..=MAX_TRIM_SLACK).contains(&h.trim_slack) {
            return Err(EngineError::InvalidConfig(format!(
                "history.trim_slack must be within 0-{MAX_TRIM_SLACK}"
            )));
        }

        let w = &self.windows;
        let periods = [
            ("windows.short_ms", w.short_ms),
            ("windows.medium_ms", w.medium_ms),
            ("windows.long_ms", w.long_ms),
            ("windows.realtime_ms", w.realtime_ms),
            ("windows.heartbeat_ms", w.heartbeat_ms),
            ("windows.flush_ms", w.flush_ms),
        ];
        for (name, value) in periods {
            if value <= 0 {
                return Err(EngineError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if w.debounce_ms < 0 {
            return Err(EngineError::InvalidConfig(
                "windows.debounce_ms must be >= 0".to_string(),
            ));
        }
        if w.entropy_bucket_ms <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "windows.entropy_bucket_ms must be > 0".to_string(),
            ));
        }
        self.validate_scoring()?;
        if self.session.night_start_hour > 23 || self.session.night_end_hour > 23 {
            return Err(EngineError::InvalidConfig(
                "session night hours must be within 0-23".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_scoring(&self) -> Result<(), EngineError> {
        let s = &self.scoring;
        let weights = [
            ("scoring.correction_weight", s.correction_weight),
            ("scoring.slow_wpm", s.slow_wpm),
            ("scoring.slow_penalty", s.slow_penalty),
            ("scoring.latency_std_divisor", s.latency_std_divisor),
            ("scoring.latency_cap", s.latency_cap),
            ("scoring.pause_penalty", s.pause_penalty),
            ("scoring.warn_correction_ratio", s.warn_correction_ratio),
            ("scoring.warn_slow_wpm", s.warn_slow_wpm),
            ("scoring.warn_latency_std", s.warn_latency_std),
            ("scoring.pressure_correction_bonus", s.pressure_correction_bonus),
            ("scoring.pressure_cv_weight", s.pressure_cv_weight),
            ("scoring.pressure_cv_cap", s.pressure_cv_cap),
            ("scoring.pressure_per_loop", s.pressure_per_loop),
            ("scoring.high_load_threshold", s.high_load_threshold),
            ("scoring.flow_wpm", s.flow_wpm),
            ("scoring.flow_stability", s.flow_stability),
            ("scoring.realization_fast_load", s.realization_fast_load),
            ("scoring.realization_medium_load", s.realization_medium_load),
        ];
        for (name, value) in weights {
            if !value.is_finite() {
                return Err(EngineError::InvalidConfig(format!("{name} must be finite")));
            }
        }
        if s.latency_std_divisor <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "scoring.latency_std_divisor must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.key_events, 10_000);
        assert_eq!(config.windows.debounce_ms, 500);
        assert_eq!(config.scoring.correction_weight, 40.0);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = EngineConfig::from_json(
            r#"{ "history": { "key_events": 50 }, "scoring": { "pause_penalty": 25.0 } }"#,
        )
        .unwrap();

        assert_eq!(config.history.key_events, 50);
        assert_eq!(config.history.pointer_events, 5_000);
        assert_eq!(config.scoring.pause_penalty, 25.0);
        assert_eq!(config.windows, WindowConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = EngineConfig::from_json(r#"{ "history": { "focus_events": 0 } }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_period_rejected() {
        let result = EngineConfig::from_json(r#"{ "windows": { "heartbeat_ms": 0 } }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_latency_divisor_rejected() {
        for divisor in ["0.0", "-5.0"] {
            let json = format!(r#"{{ "scoring": {{ "latency_std_divisor": {divisor} }} }}"#);
            let result = EngineConfig::from_json(&json);
            assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_non_finite_weight_rejected() {
        let mut config = EngineConfig::default();
        config.scoring.correction_weight = f64::NAN;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_trim_slack_bounds() {
        let mut config = EngineConfig::default();
        config.history.trim_slack = MAX_TRIM_SLACK;
        assert!(config.validate().is_ok());

        for slack in [MAX_TRIM_SLACK + 1.0, 1e300, -0.1, f64::NAN] {
            config.history.trim_slack = slack;
            assert!(
                matches!(config.validate(), Err(EngineError::InvalidConfig(_))),
                "slack {slack} accepted"
            );
        }
    }

    #[test]
    fn test_roundtrip_through_json() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        let loaded = EngineConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }
}
