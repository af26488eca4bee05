//! Bounded history retention
//!
//! Each record category lives in a [`BoundedRing`]. A ring only ever exposes
//! its newest `capacity` elements, while physical removal is batched: the
//! backing deque is allowed to grow to `capacity * (1 + slack)` before the
//! hidden prefix is dropped in one pass.

use crate::clock::Millis;
use crate::config::HistoryLimits;
use crate::types::{FocusEvent, KeyEvent, MemoryMetrics, PointerEvent, ScrollEvent};
use std::collections::VecDeque;

/// Fixed-capacity, oldest-first evicting ring
#[derive(Debug, Clone)]
pub struct BoundedRing<T> {
    items: VecDeque<T>,
    capacity: usize,
    slack: usize,
}

impl<T> BoundedRing<T> {
    /// Ring that trims on every overflowing push
    pub fn new(capacity: usize) -> Self {
        Self::with_slack(capacity, 0.0)
    }

    /// Ring that lets `capacity * slack_ratio` hidden elements accumulate before trimming
    pub fn with_slack(capacity: usize, slack_ratio: f64) -> Self {
        let slack = (capacity as f64 * slack_ratio.max(0.0)).floor() as usize;
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            slack,
        }
    }

    /// Append an element; returns true when the push caused a physical trim
    pub fn push(&mut self, item: T) -> bool {
        self.items.push_back(item);
        if self.items.len() > self.capacity.saturating_add(self.slack) {
            self.trim();
            return true;
        }
        false
    }

    /// Drop hidden elements now; returns true if any were dropped
    pub fn trim(&mut self) -> bool {
        let hidden = self.hidden();
        if hidden == 0 {
            return false;
        }
        self.items.drain(..hidden);
        true
    }

    fn hidden(&self) -> usize {
        self.items.len().saturating_sub(self.capacity)
    }

    /// Number of visible elements (never more than the capacity)
    pub fn len(&self) -> usize {
        self.items.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Visible elements, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter().skip(self.hidden())
    }

    /// Visible elements, mutable, oldest first
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> + ExactSizeIterator {
        let hidden = self.hidden();
        self.items.iter_mut().skip(hidden)
    }

    /// The newest `n` visible elements, oldest first
    pub fn newest(&self, n: usize) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        let skip = self.hidden() + self.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }

    /// Most recently pushed element
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// The element pushed before the most recent one
    pub fn second_last(&self) -> Option<&T> {
        if self.len() < 2 {
            return None;
        }
        self.items.get(self.items.len() - 2)
    }

    /// Pop elements from the oldest end while `expired` holds; returns how many were dropped
    pub fn drop_oldest_while<F>(&mut self, mut expired: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut dropped = 0;
        while let Some(front) = self.items.front() {
            if !expired(front) {
                break;
            }
            self.items.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedRing<T> {
    /// Copy of the visible elements, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

/// Outcome of a trim pass over the whole store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Rings that dropped hidden elements
    pub rings_trimmed: u64,
    /// Key and pointer records removed by age
    pub expired: usize,
}

/// Per-category raw event rings
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pub keys: BoundedRing<KeyEvent>,
    pub pointer: BoundedRing<PointerEvent>,
    pub focus: BoundedRing<FocusEvent>,
    pub scroll: BoundedRing<ScrollEvent>,
    retention_ms: i64,
}

impl HistoryStore {
    pub fn new(limits: &HistoryLimits) -> Self {
        Self {
            keys: BoundedRing::with_slack(limits.key_events, limits.trim_slack),
            pointer: BoundedRing::with_slack(limits.pointer_events, limits.trim_slack),
            focus: BoundedRing::new(limits.focus_events),
            scroll: BoundedRing::new(limits.scroll_events),
            retention_ms: limits.retention_ms,
        }
    }

    /// Key events with `timestamp >= since`, oldest first
    pub fn keys_since(&self, since: Millis) -> Vec<&KeyEvent> {
        collect_since(self.keys.iter(), since, |e| e.timestamp)
    }

    /// Pointer events with `timestamp >= since`, oldest first
    pub fn pointer_since(&self, since: Millis) -> Vec<&PointerEvent> {
        collect_since(self.pointer.iter(), since, |e| e.timestamp)
    }

    /// Remove key and pointer records older than the retention period
    pub fn sweep_expired(&mut self, now: Millis) -> usize {
        let cutoff = now - self.retention_ms;
        self.keys.drop_oldest_while(|e| e.timestamp < cutoff)
            + self.pointer.drop_oldest_while(|e| e.timestamp < cutoff)
    }

    /// Physically trim every ring, then sweep by age
    pub fn trim_all(&mut self, now: Millis) -> TrimReport {
        let rings_trimmed = [
            self.keys.trim(),
            self.pointer.trim(),
            self.focus.trim(),
            self.scroll.trim(),
        ]
        .iter()
        .filter(|trimmed| **trimmed)
        .count() as u64;

        TrimReport {
            rings_trimmed,
            expired: self.sweep_expired(now),
        }
    }

    pub fn memory_metrics(&self, periods_truncated: u64) -> MemoryMetrics {
        MemoryMetrics {
            key_events_count: self.keys.len(),
            pointer_events_count: self.pointer.len(),
            focus_events_count: self.focus.len(),
            scroll_events_count: self.scroll.len(),
            periods_truncated,
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.pointer.clear();
        self.focus.clear();
        self.scroll.clear();
    }
}

// Per-category timestamps are non-decreasing, so the window is a suffix.
fn collect_since<'a, T, I, F>(iter: I, since: Millis, ts: F) -> Vec<&'a T>
where
    I: DoubleEndedIterator<Item = &'a T>,
    F: Fn(&T) -> Millis,
{
    let mut recent: Vec<&T> = iter.rev().take_while(|e| ts(e) >= since).collect();
    recent.reverse();
    recent
}
