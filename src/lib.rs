//! Synheart Strain - On-device engine for behavioral load signals
//!
//! Strain turns a live stream of keyboard, pointer, focus and scroll events into
//! windowed aggregates and a bounded 0-100 load heuristic:
//! raw event → normalization → bounded history → windowed aggregation →
//! pattern detection → scoring → state vector.
//!
//! ## Modules
//!
//! - **Engine**: synchronous single-writer core ([`Engine`])
//! - **Runtime**: tokio actor, tickers and debounce ([`EngineRuntime`])
//! - **Replay**: deterministic replay under simulated time ([`ReplayDriver`])

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod history;
pub mod normalizer;
pub mod patterns;
pub mod publisher;
pub mod replay;
pub mod runtime;
pub mod schema;
pub mod scorer;
pub mod sink;
pub mod stats;
pub mod types;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::EngineConfig;
pub use encoder::{SnapshotDocument, SnapshotEncoder};
pub use engine::{Engine, Job};
pub use error::EngineError;
pub use publisher::{ChannelConsumer, CollectingConsumer, NullConsumer, StateConsumer};
pub use replay::ReplayDriver;
pub use runtime::{EngineHandle, EngineRuntime};
pub use sink::{MemorySink, NdjsonFileSink, NullSink, PersistenceSink, RecordKind};

// Schema exports
pub use schema::{RawEvent, RawEventAdapter, SCHEMA_VERSION};

/// Strain version embedded in exported snapshots
pub const STRAIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported snapshots
pub const PRODUCER_NAME: &str = "synheart-strain";
