//! Typing pattern detectors
//!
//! Each detector is a pure function over a slice of keydown records, newest
//! last. The aggregator decides which window of events each one sees.

pub mod burst;
pub mod loops;
pub mod pause;

pub use burst::detect_bursts;
pub use loops::{detect_loops, simulate_cursor, CursorPoint, DetectedLoop};
pub use pause::{detect_pauses, recovery_metrics, RecoveryMetrics};

/// The newest `n` elements of `items`
pub(crate) fn newest<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
