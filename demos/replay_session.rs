//! Replay a synthetic typing session and print the published state vectors

use std::sync::Arc;
use synheart_strain::schema::RawEvent;
use synheart_strain::{CollectingConsumer, Engine, EngineConfig, ManualClock, ReplayDriver};

// 2024-01-15T14:00:00Z
const START: i64 = 1_705_327_200_000;

fn main() {
    let clock = ManualClock::new(START);
    let consumer = CollectingConsumer::new();
    let engine = match Engine::new(EngineConfig::default(), Arc::new(clock.clone()), "demo") {
        Ok(engine) => engine.with_consumer(Box::new(consumer.clone())),
        Err(e) => {
            eprintln!("Error: {e}");
            return;
        }
    };

    let mut driver = ReplayDriver::new(engine, clock);
    let mut ts = START + 500;

    // steady typing, then a stretch of type-and-erase
    for word in ["the", "quick", "brown", "fox"] {
        for c in word.chars() {
            let key = c.to_string();
            driver.feed(RawEvent::keydown(ts, &key));
            driver.feed(RawEvent::keyup(ts + 60, &key));
            ts += 180;
        }
        driver.feed(RawEvent::keydown(ts, " "));
        ts += 400;
    }
    for _ in 0..4 {
        for key in ["a", "b", "c", "Backspace", "Backspace", "Backspace"] {
            driver.feed(RawEvent::keydown(ts, key));
            ts += 250;
        }
        ts += 1_500;
    }

    let engine = driver.finish(60_000);
    for vector in consumer.vectors() {
        match serde_json::to_string(&vector) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    eprintln!(
        "{} vectors, {} loops",
        consumer.len(),
        engine.loop_records().len()
    );
}
