//! Deterministic replay under simulated time
//!
//! Feeds recorded events through an [`Engine`] whose clock is a
//! [`ManualClock`]. Before each event the periodic jobs and the debounce slot
//! fire at exactly the instants the live runtime would have fired them, so the
//! same input always yields the same state vectors.

use crate::clock::{ManualClock, Millis};
use crate::engine::{Engine, Job};
use crate::schema::RawEvent;

/// Longest simulated tail `finish` will run (one day)
pub const MAX_TAIL_MS: Millis = 86_400_000;

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    job: Job,
    period: Millis,
    next: Millis,
}

/// Drives an engine through recorded input
#[derive(Debug)]
pub struct ReplayDriver {
    engine: Engine,
    clock: ManualClock,
    schedule: Vec<Scheduled>,
}

impl ReplayDriver {
    /// Jobs are anchored at the clock's current time
    ///
    /// `clock` must be the clock the engine was built with.
    pub fn new(engine: Engine, clock: ManualClock) -> Self {
        let start = engine.now();
        let windows = engine.config().windows.clone();
        let schedule = Job::ALL
            .into_iter()
            .filter_map(|job| {
                let period = job.period_ms(&windows).max(1);
                Some(Scheduled {
                    job,
                    period,
                    next: start.checked_add(period)?,
                })
            })
            .collect();
        Self {
            engine,
            clock,
            schedule,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Advance to the event's timestamp, then ingest it
    ///
    /// Events without a timestamp are ingested at the current simulated time.
    /// Timestamps behind the simulated clock never move it backwards.
    pub fn feed(&mut self, event: RawEvent) {
        if let Some(ts) = event.timestamp() {
            self.advance_to(ts);
        }
        self.engine.ingest(event);
    }

    /// Fire every job and debounce deadline due at or before `until`
    pub fn advance_to(&mut self, until: Millis) {
        loop {
            let Some((index, job_due)) = self
                .schedule
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.next)
                .map(|(i, s)| (i, s.next))
            else {
                break;
            };
            let debounce_due = self.engine.debounce_deadline().filter(|d| *d < job_due);

            let due = debounce_due.unwrap_or(job_due);
            if due > until {
                break;
            }
            self.set_time(due);

            if debounce_due.is_some() {
                self.engine.poll_debounce();
            } else {
                let scheduled = &mut self.schedule[index];
                let job = scheduled.job;
                // a job whose next run is past the end of time is retired
                match scheduled.next.checked_add(scheduled.period) {
                    Some(next) => scheduled.next = next,
                    None => {
                        self.schedule.swap_remove(index);
                    }
                }
                self.engine.run_job(job);
            }
        }
        self.set_time(until);
    }

    /// Run `tail_ms` (at most [`MAX_TAIL_MS`]) past the current time, shut down
    /// and return the engine
    pub fn finish(mut self, tail_ms: Millis) -> Engine {
        let end = self
            .engine
            .now()
            .saturating_add(tail_ms.clamp(0, MAX_TAIL_MS));
        self.advance_to(end);
        self.engine.shutdown();
        self.engine
    }

    fn set_time(&self, ts: Millis) {
        if ts > self.engine.now() {
            self.clock.set(ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::publisher::CollectingConsumer;
    use crate::sink::{MemorySink, RecordKind};
    use crate::types::{PublishTrigger, StateVector};
    use std::sync::Arc;

    const T0: Millis = 1_705_327_200_000;

    fn driver() -> (ReplayDriver, CollectingConsumer, MemorySink) {
        let clock = ManualClock::new(T0);
        let consumer = CollectingConsumer::new();
        let sink = MemorySink::new();
        let engine = Engine::new(EngineConfig::default(), Arc::new(clock.clone()), "replay")
            .unwrap()
            .with_consumer(Box::new(consumer.clone()))
            .with_sink(Box::new(sink.clone()));
        (ReplayDriver::new(engine, clock), consumer, sink)
    }

    fn typing() -> Vec<RawEvent> {
        ["h", "e", "l", "l", "o"]
            .iter()
            .enumerate()
            .flat_map(|(i, key)| {
                let ts = T0 + 1_000 + 300 * i as i64;
                [RawEvent::keydown(ts, key), RawEvent::keyup(ts + 50, key)]
            })
            .collect()
    }

    fn summary(vectors: &[StateVector]) -> Vec<(PublishTrigger, Millis, f64)> {
        vectors
            .iter()
            .map(|v| (v.trigger, v.timestamp, v.load_heuristic))
            .collect()
    }

    #[test]
    fn test_jobs_fire_on_schedule() {
        let (mut replay, consumer, sink) = driver();
        for event in typing() {
            replay.feed(event);
        }
        let engine = replay.finish(10_000);

        let vectors = consumer.vectors();
        let short: Vec<&StateVector> = vectors
            .iter()
            .filter(|v| v.trigger == PublishTrigger::ShortWindow)
            .collect();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].timestamp, T0 + 5_000);
        assert_eq!(short[0].wpm, 12.0);

        assert_eq!(sink.count(RecordKind::Aggregate5s), 1);
        assert!(sink.flush_count() >= 1);
        assert_eq!(engine.counters().cumulative_keystrokes, 5);
    }

    #[test]
    fn test_debounce_fires_before_later_jobs() {
        let (mut replay, consumer, _sink) = driver();
        replay.feed(RawEvent::keydown(T0 + 1_000, "a"));
        replay.feed(RawEvent::keydown(T0 + 1_200, "b"));
        replay.advance_to(T0 + 3_000);

        let vectors = consumer.vectors();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].trigger, PublishTrigger::Debounced);
        assert_eq!(vectors[0].timestamp, T0 + 1_500);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let run = || {
            let (mut replay, consumer, _sink) = driver();
            for event in typing() {
                replay.feed(event);
            }
            replay.finish(65_000);
            summary(&consumer.vectors())
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().any(|(t, _, _)| *t == PublishTrigger::LongWindow));
    }

    #[test]
    fn test_end_of_time_does_not_overflow() {
        let start = Millis::MAX - 2_000;
        let clock = ManualClock::new(start);
        let consumer = CollectingConsumer::new();
        let engine = Engine::new(EngineConfig::default(), Arc::new(clock.clone()), "replay")
            .unwrap()
            .with_consumer(Box::new(consumer.clone()));
        let mut replay = ReplayDriver::new(engine, clock);

        replay.feed(RawEvent::keydown(start + 100, "a"));
        let engine = replay.finish(Millis::MAX);

        assert_eq!(engine.now(), Millis::MAX);
        let triggers: Vec<PublishTrigger> = consumer.vectors().iter().map(|v| v.trigger).collect();
        assert_eq!(triggers, vec![PublishTrigger::Debounced]);
    }

    #[test]
    fn test_late_event_does_not_rewind_clock() {
        let (mut replay, _consumer, _sink) = driver();
        replay.advance_to(T0 + 2_000);
        replay.feed(RawEvent::keydown(T0 + 1_000, "a"));
        assert_eq!(replay.engine().now(), T0 + 2_000);
        assert_eq!(replay.engine().counters().last_activity_time, T0 + 1_000);
    }
}
