//! The behavioral signal aggregation engine
//!
//! [`Engine`] owns every piece of session state: raw histories, aggregate
//! rings, counters, the sink and the publisher. It is synchronous and
//! single-writer; the async runtime in [`crate::runtime`] drives it by
//! sending messages, and tests drive it directly with a manual clock.
//!
//! Every public operation samples the injected clock once and threads that
//! instant through all of its steps.

use crate::aggregator;
use crate::clock::{Clock, Millis};
use crate::config::{EngineConfig, WindowConfig};
use crate::encoder::{AggregateHistory, RawHistory, SnapshotBody, SnapshotDocument, SnapshotEncoder};
use crate::error::EngineError;
use crate::history::{BoundedRing, HistoryStore, TrimReport};
use crate::normalizer::EventNormalizer;
use crate::patterns::{detect_loops, simulate_cursor};
use crate::publisher::{NullConsumer, Publisher, StateConsumer};
use crate::schema::RawEvent;
use crate::scorer;
use crate::sink::{NullSink, PersistenceSink, RecordKind};
use crate::types::{
    AggregateCounts, CognitiveEvent, EngineStatus, EventCounts, KeyEvent, LongWindowAggregate,
    LoopRecord, LoopType, MediumWindowAggregate, NormalizedRecord, PublishTrigger,
    RealtimeMetrics, SessionCounters, ShortWindowAggregate, StateVector, TagContext, TagRecord,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cognitive event emitted when the load first crosses the high-load threshold
pub const HIGH_LOAD_EVENT: &str = "high_load_detected";

/// Suggestion attached to [`HIGH_LOAD_EVENT`]
pub const HIGH_LOAD_SUGGESTION: &str = "consider_break";

/// Periodic engine job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ShortWindow,
    MediumWindow,
    LongWindow,
    Realtime,
    Heartbeat,
    Flush,
}

impl Job {
    /// Every job, in the order same-instant jobs run
    pub const ALL: [Job; 6] = [
        Job::ShortWindow,
        Job::MediumWindow,
        Job::LongWindow,
        Job::Realtime,
        Job::Heartbeat,
        Job::Flush,
    ];

    pub fn period_ms(self, windows: &WindowConfig) -> i64 {
        match self {
            Job::ShortWindow => windows.short_ms,
            Job::MediumWindow => windows.medium_ms,
            Job::LongWindow => windows.long_ms,
            Job::Realtime => windows.realtime_ms,
            Job::Heartbeat => windows.heartbeat_ms,
            Job::Flush => windows.flush_ms,
        }
    }
}

/// Single owner of all session state
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    session_id: String,
    is_recording: bool,
    normalizer: EventNormalizer,
    history: HistoryStore,
    counters: SessionCounters,
    short: BoundedRing<ShortWindowAggregate>,
    medium: BoundedRing<MediumWindowAggregate>,
    long: BoundedRing<LongWindowAggregate>,
    loops: BoundedRing<LoopRecord>,
    realtime: RealtimeMetrics,
    high_load_active: bool,
    sink: Box<dyn PersistenceSink>,
    sink_failures: u64,
    publisher: Publisher,
    encoder: SnapshotEncoder,
}

impl Engine {
    /// Create an engine with a null sink and consumer
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        session_id: impl Into<String>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let now = clock.now_ms();
        let limits = &config.history;

        Ok(Self {
            normalizer: EventNormalizer::new(limits),
            history: HistoryStore::new(limits),
            counters: SessionCounters::new(now),
            short: BoundedRing::new(limits.aggregates_5s),
            medium: BoundedRing::new(limits.aggregates_30s),
            long: BoundedRing::new(limits.aggregates_60s),
            loops: BoundedRing::new(limits.loop_records),
            realtime: RealtimeMetrics {
                last_update: now,
                ..RealtimeMetrics::default()
            },
            high_load_active: false,
            sink: Box::new(NullSink),
            sink_failures: 0,
            publisher: Publisher::new(Box::new(NullConsumer), config.windows.debounce_ms),
            encoder: SnapshotEncoder::new(),
            session_id: session_id.into(),
            is_recording: true,
            clock,
            config,
        })
    }

    /// Replace the persistence sink
    pub fn with_sink(mut self, sink: Box<dyn PersistenceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the state vector consumer
    pub fn with_consumer(mut self, consumer: Box<dyn StateConsumer>) -> Self {
        self.publisher = Publisher::new(consumer, self.config.windows.debounce_ms);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time from the injected clock
    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn realtime(&self) -> RealtimeMetrics {
        self.realtime
    }

    pub fn latest_short(&self) -> Option<&ShortWindowAggregate> {
        self.short.last()
    }

    pub fn latest_medium(&self) -> Option<&MediumWindowAggregate> {
        self.medium.last()
    }

    pub fn latest_long(&self) -> Option<&LongWindowAggregate> {
        self.long.last()
    }

    pub fn loop_records(&self) -> Vec<LoopRecord> {
        self.loops.to_vec()
    }

    /// Pending debounced publish deadline
    pub fn debounce_deadline(&self) -> Option<Millis> {
        self.publisher.deadline()
    }

    /// Normalize and retain one raw event
    ///
    /// Returns `None` while recording is paused; the event is dropped untouched.
    pub fn ingest(&mut self, raw: RawEvent) -> Option<NormalizedRecord> {
        if !self.is_recording {
            return None;
        }
        let now = self.clock.now_ms();
        let requests_publish = raw.requests_publish();

        let record = self
            .normalizer
            .ingest(raw, now, &mut self.history, &mut self.counters);

        let kind = RecordKind::for_record(&record);
        match &record {
            NormalizedRecord::Key(e) => self.persist(kind, e),
            NormalizedRecord::Pointer(e) => self.persist(kind, e),
            NormalizedRecord::Focus(e) => self.persist(kind, e),
            NormalizedRecord::Scroll(e) => self.persist(kind, e),
        }

        if requests_publish {
            self.publisher.request(now);
        }
        Some(record)
    }

    /// Run one periodic job
    pub fn run_job(&mut self, job: Job) {
        match job {
            Job::ShortWindow => {
                self.tick_short();
            }
            Job::MediumWindow => {
                self.tick_medium();
            }
            Job::LongWindow => {
                self.tick_long();
            }
            Job::Realtime => {
                self.tick_realtime();
            }
            Job::Heartbeat => {
                self.heartbeat();
            }
            Job::Flush => {
                // counted by flush; the sink keeps its buffer for the next period
                let _ = self.flush();
            }
        }
    }

    /// 5 second job; publishes when an aggregate was produced
    pub fn tick_short(&mut self) -> Option<StateVector> {
        let now = self.clock.now_ms();
        let aggregate =
            aggregator::short_window(&self.history, self.short.last(), now, &self.config)?;

        self.persist(RecordKind::Aggregate5s, &aggregate);
        self.short.push(aggregate);
        self.refresh_realtime(now);
        self.check_high_load(now);
        Some(self.publish(now, PublishTrigger::ShortWindow))
    }

    /// 30 second job
    pub fn tick_medium(&mut self) -> Option<MediumWindowAggregate> {
        let now = self.clock.now_ms();
        let aggregate =
            aggregator::medium_window(&self.history, &self.counters, now, &self.config)?;

        self.persist(RecordKind::Aggregate30s, &aggregate);
        self.medium.push(aggregate.clone());
        Some(aggregate)
    }

    /// 60 second job: aggregate, detect loops, publish, then sweep by age
    pub fn tick_long(&mut self) -> StateVector {
        let now = self.clock.now_ms();
        let hour = self.clock.local_hour(now);

        let aggregate =
            aggregator::long_window(&self.history, &self.counters, now, hour, &self.config);
        self.persist(RecordKind::Aggregate60s, &aggregate);
        self.long.push(aggregate);

        self.detect_loops(now);
        let vector = self.publish(now, PublishTrigger::LongWindow);

        let expired = self.history.sweep_expired(now);
        if expired > 0 {
            debug!(expired, "swept expired history");
        }
        vector
    }

    /// 1 second job: refresh realtime metrics from the latest 5s aggregate
    pub fn tick_realtime(&mut self) -> RealtimeMetrics {
        let now = self.clock.now_ms();
        self.refresh_realtime(now);
        self.realtime
    }

    /// Unconditional publish on the heartbeat cadence
    pub fn heartbeat(&mut self) -> StateVector {
        let now = self.clock.now_ms();
        self.publish(now, PublishTrigger::Heartbeat)
    }

    /// Publish if the debounce deadline has passed
    pub fn poll_debounce(&mut self) -> Option<StateVector> {
        let now = self.clock.now_ms();
        if self.publisher.take_due(now) {
            Some(self.publish(now, PublishTrigger::Debounced))
        } else {
            None
        }
    }

    /// Record a manual annotation and request a debounced publish
    pub fn tag(&mut self, category: &str, note: &str) -> TagRecord {
        let now = self.clock.now_ms();
        let recent: Vec<&KeyEvent> = self
            .history
            .keys
            .newest(self.config.session.tag_context_events)
            .collect();

        let record = TagRecord {
            timestamp: now,
            session_id: self.session_id.clone(),
            category: category.to_string(),
            note_length: note.chars().count(),
            context: TagContext {
                recent_events_count: recent.len(),
                recent_corrections: recent.iter().filter(|k| k.is_correction()).count(),
                time_since_last_activity: now - self.counters.last_activity_time,
            },
        };
        self.persist(RecordKind::UserTag, &record);
        self.publisher.request(now);
        record
    }

    /// Reset counters, histories and aggregates, then publish immediately
    pub fn clear_session(&mut self) -> StateVector {
        let now = self.clock.now_ms();
        let limits = &self.config.history;

        self.counters = SessionCounters::new(now);
        self.history.clear();
        self.short = BoundedRing::new(limits.aggregates_5s);
        self.medium = BoundedRing::new(limits.aggregates_30s);
        self.long = BoundedRing::new(limits.aggregates_60s);
        self.loops = BoundedRing::new(limits.loop_records);
        self.realtime = RealtimeMetrics {
            last_update: now,
            ..RealtimeMetrics::default()
        };
        self.high_load_active = false;
        self.normalizer.reset();
        self.publisher.reset();

        info!(session_id = %self.session_id, "session cleared");
        self.publish(now, PublishTrigger::Cleared)
    }

    /// Pause or resume recording
    pub fn set_recording(&mut self, recording: bool) {
        if self.is_recording != recording {
            info!(recording, "recording state changed");
        }
        self.is_recording = recording;
    }

    /// Diagnostic view of ring sizes and counters
    pub fn status(&self) -> EngineStatus {
        let now = self.clock.now_ms();
        EngineStatus {
            session_id: self.session_id.clone(),
            session_duration: self.counters.duration_ms(now),
            is_recording: self.is_recording,
            event_counts: EventCounts {
                key_events: self.history.keys.len(),
                pointer_events: self.history.pointer.len(),
                focus_events: self.history.focus.len(),
                scroll_events: self.history.scroll.len(),
                total_key_events: self.counters.total_key_events,
                total_mouse_events: self.counters.total_mouse_events,
            },
            aggregate_counts: AggregateCounts {
                aggregates_5s: self.short.len(),
                aggregates_30s: self.medium.len(),
                aggregates_60s: self.long.len(),
                loop_records: self.loops.len(),
            },
            history_limits: self.config.history.clone(),
            periods_truncated: self.counters.periods_truncated,
            sink_failures: self.sink_failures,
            last_publish_time: self.publisher.last_publish(),
        }
    }

    /// Counters, aggregate rings, loop records and bounded raw histories
    pub fn export_snapshot(&self) -> SnapshotDocument {
        let now = self.clock.now_ms();
        let body = SnapshotBody {
            session_id: self.session_id.clone(),
            is_recording: self.is_recording,
            session: self.counters.clone(),
            realtime: self.realtime,
            aggregates: AggregateHistory {
                window_5s: self.short.to_vec(),
                window_30s: self.medium.to_vec(),
                window_60s: self.long.to_vec(),
            },
            loops: self.loops.to_vec(),
            history: RawHistory {
                key_events: self.history.keys.to_vec(),
                pointer_events: self.history.pointer.to_vec(),
                focus_events: self.history.focus.to_vec(),
                scroll_events: self.history.scroll.to_vec(),
            },
        };
        self.encoder.encode(body, now)
    }

    /// Flush buffered sink data
    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.sink.flush_buffer().map_err(|e| {
            self.sink_failures += 1;
            warn!(error = %e, failures = self.sink_failures, "sink flush failed");
            e
        })
    }

    /// Trim every ring to capacity and sweep expired records now
    pub fn trim_memory(&mut self) -> TrimReport {
        let now = self.clock.now_ms();
        let report = self.history.trim_all(now);
        self.counters.periods_truncated += report.rings_trimmed;
        debug!(
            rings_trimmed = report.rings_trimmed,
            expired = report.expired,
            "trimmed memory"
        );
        report
    }

    /// Disarm the debounce slot and flush the sink
    pub fn shutdown(&mut self) {
        self.publisher.cancel();
        // already logged by flush
        let _ = self.flush();
        info!(
            session_id = %self.session_id,
            delivered = self.publisher.delivered(),
            dropped = self.publisher.dropped(),
            "engine shut down"
        );
    }

    fn refresh_realtime(&mut self, now: Millis) {
        let latest = self.short.last();
        self.realtime = RealtimeMetrics {
            last_update: now,
            wpm: latest.map_or(0.0, |a| a.typing_speed_wpm.round()),
            correction_rate: latest.map_or(0.0, |a| a.correction_ratio),
            load_heuristic: scorer::load_score(latest, self.medium.last(), &self.config.scoring),
        };
    }

    fn check_high_load(&mut self, now: Millis) {
        let load = self.realtime.load_heuristic;
        if load <= self.config.scoring.high_load_threshold {
            self.high_load_active = false;
            return;
        }
        if self.high_load_active {
            return;
        }
        self.high_load_active = true;
        let event = CognitiveEvent {
            event_type: HIGH_LOAD_EVENT.to_string(),
            timestamp: now,
            metrics: self.realtime,
            suggestion: HIGH_LOAD_SUGGESTION.to_string(),
        };
        info!(load, "high load detected");
        self.persist(RecordKind::CognitiveEvent, &event);
    }

    fn detect_loops(&mut self, now: Millis) {
        let cfg = &self.config.loops;
        let recent = self.history.keys_since(now - cfg.lookback_ms);
        let start = recent.len().saturating_sub(cfg.max_events);
        let recent = &recent[start..];
        if recent.len() < cfg.min_events {
            return;
        }

        let found = detect_loops(&simulate_cursor(recent), cfg);
        if found.is_empty() {
            return;
        }
        debug!(count = found.len(), "loops detected");
        for detected in found {
            let record = LoopRecord {
                loop_id: format!("loop_{}", Uuid::new_v4().simple()),
                timestamp: now,
                loop_type: LoopType::CursorPositionLoop,
                loop_duration: detected.duration,
                iterations: detected.iterations,
                correction_pressure: detected.correction_pressure,
                exit_success: detected.exit_success,
                region_stability: detected.region_stability,
            };
            self.persist(RecordKind::CognitiveLoop, &record);
            self.loops.push(record);
        }
    }

    fn build_vector(&self, now: Millis, trigger: PublishTrigger) -> StateVector {
        let scoring = &self.config.scoring;
        let latest = self.short.last();
        let previous = self.short.second_last();
        let medium = self.medium.last();

        let load = scorer::load_score(latest, medium, scoring);
        let pressure_keys: Vec<&KeyEvent> =
            self.history.keys.newest(scoring.pressure_window).collect();
        let pressure = scorer::cognitive_pressure(&pressure_keys, scoring, &self.config.loops);
        let similarity = scorer::state_similarity(latest, previous);
        let current_wpm = latest.map_or(0.0, |a| a.typing_speed_wpm);

        StateVector {
            state_vector_id: format!("state_{}", Uuid::new_v4().simple()),
            session_id: self.session_id.clone(),
            timestamp: now,
            trigger,
            load_heuristic: load,
            cognitive_pressure_index: pressure,
            wpm: current_wpm.round(),
            correction_rate: latest.map_or(0.0, |a| a.correction_ratio),
            current_speed_wpm: current_wpm,
            warning_signals: scorer::warnings(latest, medium, scoring),
            previous_state_similarity: similarity,
            state_delta_magnitude: scorer::state_delta(latest, previous),
            time_to_user_realization: scorer::time_to_realization(load, scoring),
            session_state: scorer::session_state(load, current_wpm, similarity, scoring),
            session_duration: self.counters.duration_ms(now),
            is_recording: self.is_recording,
            counters: self.counters.clone(),
        }
    }

    fn publish(&mut self, now: Millis, trigger: PublishTrigger) -> StateVector {
        let vector = self.build_vector(now, trigger);
        self.persist(RecordKind::StateVector, &vector);
        self.publisher.deliver(&vector);
        vector
    }

    fn persist<T: Serialize>(&mut self, kind: RecordKind, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, ?kind, "record not serializable");
                return;
            }
        };
        if let Err(e) = self.sink.save_record(kind, value) {
            self.sink_failures += 1;
            warn!(error = %e, ?kind, "sink rejected record");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_id", &self.session_id)
            .field("is_recording", &self.is_recording)
            .field("counters", &self.counters)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{HistoryLimits, ScoringConfig};
    use crate::publisher::CollectingConsumer;
    use crate::schema::RawKey;
    use crate::sink::MemorySink;
    use crate::types::{SessionState, Warning};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const T0: Millis = 1_705_327_200_000;

    struct Harness {
        clock: ManualClock,
        sink: MemorySink,
        consumer: CollectingConsumer,
        engine: Engine,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let clock = ManualClock::new(T0);
            let sink = MemorySink::new();
            let consumer = CollectingConsumer::new();
            let engine = Engine::new(config, Arc::new(clock.clone()), "test-session")
                .unwrap()
                .with_sink(Box::new(sink.clone()))
                .with_consumer(Box::new(consumer.clone()));
            Self {
                clock,
                sink,
                consumer,
                engine,
            }
        }

        fn at(&self, ms: i64) {
            self.clock.set(T0 + ms);
        }

        /// Keydown + keyup pairs starting at `start`, `spacing` apart
        fn type_keys(&mut self, start: i64, spacing: i64, keys: &[&str]) {
            for (i, key) in keys.iter().enumerate() {
                let ts = T0 + start + spacing * i as i64;
                self.clock.set(ts);
                self.engine.ingest(RawEvent::keydown(ts, key));
                self.engine.ingest(RawEvent::keyup(ts + 40, key));
            }
        }
    }

    struct FailingSink;

    impl PersistenceSink for FailingSink {
        fn save_record(&mut self, _: RecordKind, _: serde_json::Value) -> Result<(), EngineError> {
            Err(EngineError::SinkUnavailable("disk full".to_string()))
        }

        fn flush_buffer(&mut self) -> Result<(), EngineError> {
            Err(EngineError::SinkUnavailable("disk full".to_string()))
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            history: HistoryLimits {
                key_events: 0,
                ..HistoryLimits::default()
            },
            ..EngineConfig::default()
        };
        let result = Engine::new(config, Arc::new(ManualClock::new(T0)), "s");
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_five_chars_publish_twelve_wpm() {
        let mut h = Harness::new();
        h.type_keys(1_000, 300, &["h", "e", "l", "l", "o"]);
        h.at(5_000);

        let vector = h.engine.tick_short().expect("aggregate produced");
        assert_eq!(vector.trigger, PublishTrigger::ShortWindow);
        assert_eq!(vector.wpm, 12.0);
        assert_eq!(vector.correction_rate, 0.0);
        assert_eq!(h.engine.realtime().wpm, 12.0);

        assert_eq!(h.sink.count(RecordKind::Aggregate5s), 1);
        assert_eq!(h.sink.count(RecordKind::RawKeydown), 5);
        assert_eq!(h.sink.count(RecordKind::RawKeyup), 5);
        assert_eq!(h.consumer.len(), 1);
    }

    #[test]
    fn test_hold_time_reaches_aggregate() {
        let mut h = Harness::new();
        h.type_keys(1_000, 300, &["a", "b", "c"]);
        h.at(5_000);
        h.engine.tick_short();
        assert_eq!(h.engine.latest_short().unwrap().hold_time_mean, 40.0);
    }

    #[test]
    fn test_empty_short_window_keeps_previous_latest() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "b"]);
        h.at(5_000);
        let first = h.engine.tick_short().unwrap();

        h.at(10_000);
        assert!(h.engine.tick_short().is_none());
        assert_eq!(h.sink.count(RecordKind::Aggregate5s), 1);
        assert_eq!(h.engine.latest_short().unwrap().timestamp, first.timestamp);
        assert_eq!(h.consumer.len(), 1);
    }

    #[test]
    fn test_frequent_pauses_appears_and_clears() {
        let mut h = Harness::new();
        // 7 keystrokes 1.5s apart: 6 pauses
        h.type_keys(1_000, 1_500, &["a"; 7]);
        h.at(30_000);
        let medium = h.engine.tick_medium().unwrap();
        assert_eq!(medium.pause_count, 6);
        assert!(h
            .engine
            .heartbeat()
            .warning_signals
            .contains(&Warning::FrequentPauses));

        h.type_keys(70_000, 100, &["b"; 5]);
        h.at(90_000);
        let medium = h.engine.tick_medium().unwrap();
        assert_eq!(medium.pause_count, 0);
        assert!(!h
            .engine
            .heartbeat()
            .warning_signals
            .contains(&Warning::FrequentPauses));
    }

    #[test]
    fn test_medium_window_below_minimum_is_noop() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "b"]);
        h.at(30_000);
        assert!(h.engine.tick_medium().is_none());
        assert!(h.engine.latest_medium().is_none());
        assert_eq!(h.sink.count(RecordKind::Aggregate30s), 0);
    }

    #[test]
    fn test_loops_detected_on_long_tick() {
        let mut h = Harness::new();
        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.extend(["a", "b", "c", "d", "e"]);
            keys.extend(["Backspace"; 5]);
        }
        h.type_keys(1_000, 150, &keys);
        h.at(10_000);

        let vector = h.engine.tick_long();
        assert_eq!(vector.trigger, PublishTrigger::LongWindow);
        assert!(vector.cognitive_pressure_index >= 30.0);

        let loops = h.engine.loop_records();
        assert!(!loops.is_empty());
        assert!(loops.iter().any(|l| l.correction_pressure > 0.0));
        assert!(loops
            .iter()
            .all(|l| (0.0..=1.0).contains(&l.region_stability)));
        assert_eq!(h.sink.count(RecordKind::CognitiveLoop), loops.len());
    }

    #[test]
    fn test_too_few_events_for_loops() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "Backspace", "a", "Backspace"]);
        h.at(10_000);
        h.engine.tick_long();
        assert!(h.engine.loop_records().is_empty());
    }

    #[test]
    fn test_long_tick_publishes_before_sweep() {
        let mut h = Harness::new();
        h.type_keys(0, 100, &["a", "b", "c"]);
        h.at(400_000);

        h.engine.tick_long();
        let long = h.engine.latest_long().unwrap();
        assert_eq!(long.memory_metrics.key_events_count, 3);
        assert_eq!(h.engine.status().event_counts.key_events, 0);

        let published = h.sink.payloads(RecordKind::StateVector);
        let last = published.last().unwrap();
        assert_eq!(last["cognitive_pressure_index"], 0.0);
        assert_eq!(last["trigger"], "long_window");
    }

    #[test]
    fn test_night_flag_uses_clock_zone() {
        let clock = ManualClock::with_offset(T0, 9 * 3600);
        let mut engine = Engine::new(EngineConfig::default(), Arc::new(clock), "s").unwrap();
        engine.tick_long();
        // 14:00 UTC is 23:00 at +09:00
        assert!(engine.latest_long().unwrap().night_hours_flag);
    }

    #[test]
    fn test_debounce_publishes_once() {
        let mut h = Harness::new();
        h.at(1_000);
        h.engine.ingest(RawEvent::keydown(T0 + 1_000, "a"));
        h.at(1_200);
        h.engine.ingest(RawEvent::keydown(T0 + 1_200, "b"));
        assert_eq!(h.engine.debounce_deadline(), Some(T0 + 1_500));

        h.at(1_499);
        assert!(h.engine.poll_debounce().is_none());
        h.at(1_500);
        let vector = h.engine.poll_debounce().unwrap();
        assert_eq!(vector.trigger, PublishTrigger::Debounced);
        assert!(h.engine.poll_debounce().is_none());
        assert_eq!(h.consumer.len(), 1);
    }

    #[test]
    fn test_sustained_typing_publishes_debounced() {
        let mut h = Harness::new();
        for i in 0..12 {
            let ms = 1_000 + 100 * i;
            h.at(ms);
            h.engine.ingest(RawEvent::keydown(T0 + ms, "a"));
            h.engine.poll_debounce();
        }

        let published: Vec<Millis> = h
            .consumer
            .vectors()
            .iter()
            .filter(|v| v.trigger == PublishTrigger::Debounced)
            .map(|v| v.timestamp)
            .collect();
        assert_eq!(published, vec![T0 + 1_500, T0 + 2_100]);
    }

    #[test]
    fn test_moves_do_not_request_publish() {
        let mut h = Harness::new();
        h.engine.ingest(RawEvent::mouse_move(T0, 1.0, 1.0));
        h.engine.ingest(RawEvent::scroll(T0, 0.0, 20.0));
        assert_eq!(h.engine.debounce_deadline(), None);

        h.engine.ingest(RawEvent::focus_out(T0));
        assert!(h.engine.debounce_deadline().is_some());
    }

    #[test]
    fn test_paused_recording_drops_events() {
        let mut h = Harness::new();
        h.engine.set_recording(false);
        assert!(h.engine.ingest(RawEvent::keydown(T0, "a")).is_none());
        assert_eq!(h.engine.counters().cumulative_keystrokes, 0);
        assert!(h.sink.records().is_empty());
        assert!(!h.engine.status().is_recording);

        h.engine.set_recording(true);
        assert!(h.engine.ingest(RawEvent::keydown(T0, "a")).is_some());
        assert_eq!(h.engine.counters().cumulative_keystrokes, 1);
    }

    #[test]
    fn test_tag_context() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "Backspace", "b"]);
        h.at(4_000);
        assert!(h.engine.poll_debounce().is_some());

        let tag = h.engine.tag("stuck", "cannot find the bug");
        assert_eq!(tag.category, "stuck");
        assert_eq!(tag.note_length, 19);
        assert_eq!(
            tag.context,
            TagContext {
                recent_events_count: 3,
                recent_corrections: 1,
                time_since_last_activity: 4_000 - 1_240,
            }
        );
        assert_eq!(h.sink.count(RecordKind::UserTag), 1);
        assert_eq!(h.engine.debounce_deadline(), Some(T0 + 4_500));
    }

    #[test]
    fn test_clear_session_twice_is_idempotent() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "b", "Backspace", "c"]);
        h.at(5_000);
        h.engine.tick_short();
        h.engine.tick_medium();
        h.engine.tick_long();

        h.at(6_000);
        let first = h.engine.clear_session();
        let after_first = h.engine.export_snapshot().body;
        let status_first = h.engine.status();

        let second = h.engine.clear_session();
        let after_second = h.engine.export_snapshot().body;

        assert_eq!(first.trigger, PublishTrigger::Cleared);
        assert_eq!(first.counters, second.counters);
        assert_eq!(after_first, after_second);
        assert_eq!(status_first.event_counts, EventCounts::default());
        assert_eq!(status_first.aggregate_counts, AggregateCounts::default());
        assert_eq!(after_first.session.cumulative_keystrokes, 0);
        assert_eq!(after_first.session.session_start_time, T0 + 6_000);
    }

    #[test]
    fn test_status_reports_rings_and_truncation() {
        let config = EngineConfig {
            history: HistoryLimits {
                key_events: 10,
                ..HistoryLimits::default()
            },
            ..EngineConfig::default()
        };
        let mut h = Harness::with_config(config);
        h.type_keys(0, 10, &["a"; 12]);
        h.engine.ingest(RawEvent::click(T0 + 200, 1.0, 1.0));

        let status = h.engine.status();
        assert_eq!(status.event_counts.key_events, 10);
        assert_eq!(status.event_counts.total_key_events, 12);
        assert_eq!(status.event_counts.pointer_events, 1);
        assert_eq!(status.periods_truncated, 1);
        assert_eq!(status.history_limits.key_events, 10);
        assert!(status.is_recording);
    }

    #[test]
    fn test_trim_memory_drops_expired() {
        let mut h = Harness::new();
        h.type_keys(0, 100, &["a", "b"]);
        h.engine.ingest(RawEvent::mouse_move(T0, 0.0, 0.0));
        h.at(301_000);
        h.type_keys(301_000, 100, &["c"]);

        let report = h.engine.trim_memory();
        assert_eq!(report.expired, 3);
        assert_eq!(h.engine.status().event_counts.key_events, 1);
    }

    #[test]
    fn test_export_snapshot_contents() {
        let mut h = Harness::new();
        h.type_keys(1_000, 100, &["a", "b", "c"]);
        h.engine.ingest(RawEvent::focus_out(T0 + 2_000));
        h.at(5_000);
        h.engine.tick_short();

        let doc = h.engine.export_snapshot();
        assert_eq!(doc.body.session_id, "test-session");
        assert_eq!(doc.body.history.key_events.len(), 3);
        assert_eq!(doc.body.history.focus_events.len(), 1);
        assert_eq!(doc.body.aggregates.window_5s.len(), 1);
        assert_eq!(doc.body.session.cumulative_keystrokes, 3);
        assert_eq!(doc.exported_at_ms, T0 + 5_000);
    }

    #[test]
    fn test_heartbeat_without_data() {
        let mut h = Harness::new();
        h.at(5_000);
        let vector = h.engine.heartbeat();
        assert_eq!(vector.trigger, PublishTrigger::Heartbeat);
        assert_eq!(vector.load_heuristic, 0.0);
        assert_eq!(vector.session_state, SessionState::Neutral);
        assert_eq!(vector.session_duration, 5_000);
        assert!(vector.warning_signals.is_empty());
        assert_eq!(h.consumer.len(), 1);
    }

    #[test]
    fn test_high_load_event_fires_once_and_rearms() {
        let config = EngineConfig {
            scoring: ScoringConfig {
                high_load_threshold: 50.0,
                ..ScoringConfig::default()
            },
            ..EngineConfig::default()
        };
        let mut h = Harness::with_config(config);
        let stressed = ["a", "Backspace", "Backspace", "Backspace"];

        h.type_keys(1_000, 100, &stressed);
        h.at(5_000);
        h.engine.tick_short();
        h.type_keys(6_000, 100, &stressed);
        h.at(10_000);
        h.engine.tick_short();
        assert_eq!(h.sink.count(RecordKind::CognitiveEvent), 1);

        // fast clean typing drops the load back under the threshold
        h.type_keys(11_000, 100, &["x"; 30]);
        h.at(15_000);
        h.engine.tick_short();
        assert!(h.engine.realtime().load_heuristic <= 50.0);

        h.type_keys(16_000, 100, &stressed);
        h.at(20_000);
        h.engine.tick_short();
        let events = h.sink.payloads(RecordKind::CognitiveEvent);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], HIGH_LOAD_EVENT);
        assert_eq!(events[0]["suggestion"], HIGH_LOAD_SUGGESTION);
    }

    #[test]
    fn test_sink_failures_do_not_propagate() {
        let clock = ManualClock::new(T0);
        let mut engine = Engine::new(EngineConfig::default(), Arc::new(clock.clone()), "s")
            .unwrap()
            .with_sink(Box::new(FailingSink));
        engine.ingest(RawEvent::keydown(T0 + 100, "a"));
        clock.set(T0 + 5_000);
        assert!(engine.tick_short().is_some());
        engine.tick_long();
        engine.shutdown();
        assert!(engine.flush().is_err());
        assert_eq!(engine.counters().cumulative_keystrokes, 1);
        assert!(engine.status().sink_failures > 2);
    }

    #[test]
    fn test_realtime_job_refreshes_between_short_ticks() {
        let mut h = Harness::new();
        h.type_keys(21_000, 1_500, &["a"; 7]);
        h.at(30_100);
        h.engine.tick_short().unwrap();
        let before = h.engine.realtime();
        assert_eq!(before.last_update, T0 + 30_100);

        // a fresh 30s aggregate with 6 pauses only reaches realtime on the next refresh
        h.at(31_000);
        assert_eq!(h.engine.tick_medium().unwrap().pause_count, 6);
        assert_eq!(h.engine.realtime(), before);

        h.at(32_000);
        h.engine.run_job(Job::Realtime);
        let after = h.engine.realtime();
        assert_eq!(after.last_update, T0 + 32_000);
        assert_eq!(after.wpm, before.wpm);
        assert_eq!(after.correction_rate, before.correction_rate);
        assert_eq!(after.load_heuristic, before.load_heuristic + 15.0);
        assert_eq!(h.consumer.len(), 1);
    }

    /// Flush fails until `failures` runs out; shares its counters with the test
    #[derive(Clone, Default)]
    struct FlakySink {
        failures: Arc<std::sync::Mutex<u32>>,
        flushed: Arc<std::sync::Mutex<u32>>,
    }

    impl PersistenceSink for FlakySink {
        fn save_record(&mut self, _: RecordKind, _: serde_json::Value) -> Result<(), EngineError> {
            Ok(())
        }

        fn flush_buffer(&mut self) -> Result<(), EngineError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(EngineError::SinkUnavailable("busy".to_string()));
            }
            *self.flushed.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_flush_job_counts_failures_and_retries() {
        let clock = ManualClock::new(T0);
        let sink = FlakySink::default();
        *sink.failures.lock().unwrap() = 1;
        let mut engine = Engine::new(EngineConfig::default(), Arc::new(clock.clone()), "s")
            .unwrap()
            .with_sink(Box::new(sink.clone()));

        engine.run_job(Job::Flush);
        assert_eq!(engine.status().sink_failures, 1);
        assert_eq!(*sink.flushed.lock().unwrap(), 0);

        clock.set(T0 + 10_000);
        engine.run_job(Job::Flush);
        assert_eq!(engine.status().sink_failures, 1);
        assert_eq!(*sink.flushed.lock().unwrap(), 1);
    }

    #[test]
    fn test_shutdown_flushes_sink() {
        let mut h = Harness::new();
        h.engine.ingest(RawEvent::keydown(T0, "a"));
        h.engine.shutdown();
        assert_eq!(h.sink.flush_count(), 1);
        assert_eq!(h.engine.debounce_deadline(), None);
    }

    #[test]
    fn test_undo_counts_in_rate() {
        let mut h = Harness::new();
        h.at(1_000);
        h.engine
            .ingest(RawEvent::Keydown(RawKey::new(T0 + 1_000, "z").with_ctrl()));
        h.at(5_000);
        h.engine.tick_short();
        assert!((h.engine.latest_short().unwrap().undo_rate - 0.2).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_scores_stay_bounded(
            keys in proptest::collection::vec((0usize..4, 1i64..400), 1..120),
        ) {
            let mut h = Harness::new();
            let mut ts = 0i64;
            for (choice, gap) in keys {
                ts += gap;
                let key = ["a", "Backspace", "Delete", "ArrowLeft"][choice];
                h.clock.set(T0 + ts);
                h.engine.ingest(RawEvent::keydown(T0 + ts, key));
            }
            h.clock.set(T0 + ts + 1);
            h.engine.tick_medium();
            if let Some(vector) = h.engine.tick_short() {
                prop_assert!((0.0..=100.0).contains(&vector.load_heuristic));
                prop_assert!((0.0..=1.0).contains(&vector.correction_rate));
                prop_assert!((0.0..=100.0).contains(&vector.cognitive_pressure_index));
            }
            h.engine.tick_long();
            for l in h.engine.loop_records() {
                prop_assert!((0.0..=1.0).contains(&l.region_stability));
            }
        }
    }
}
