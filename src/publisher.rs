//! State vector delivery
//!
//! The publisher owns the consumer, the single-slot debounce deadline and the
//! publish bookkeeping. Building the vector is the engine's job; delivery is
//! at-most-once and never fails the caller.

use crate::clock::Millis;
use crate::error::EngineError;
use crate::types::StateVector;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Receiver of published state vectors
pub trait StateConsumer: Send {
    fn deliver(&mut self, vector: &StateVector) -> Result<(), EngineError>;
}

/// Forwards vectors into a bounded tokio channel without waiting
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::Sender<StateVector>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::Sender<StateVector>) -> Self {
        Self { tx }
    }

    /// Consumer plus the receiving end of a channel holding `capacity` vectors
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StateVector>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl StateConsumer for ChannelConsumer {
    fn deliver(&mut self, vector: &StateVector) -> Result<(), EngineError> {
        self.tx.try_send(vector.clone()).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::ConsumerFull,
            TrySendError::Closed(_) => EngineError::ConsumerClosed,
        })
    }
}

/// Keeps every delivered vector; clones share the same list
#[derive(Debug, Default, Clone)]
pub struct CollectingConsumer {
    vectors: Arc<Mutex<Vec<StateVector>>>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vectors(&self) -> Vec<StateVector> {
        self.vectors
            .lock()
            .map(|v| v.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.vectors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateConsumer for CollectingConsumer {
    fn deliver(&mut self, vector: &StateVector) -> Result<(), EngineError> {
        match self.vectors.lock() {
            Ok(mut v) => v.push(vector.clone()),
            Err(poisoned) => poisoned.into_inner().push(vector.clone()),
        }
        Ok(())
    }
}

/// Drops every vector
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl StateConsumer for NullConsumer {
    fn deliver(&mut self, _vector: &StateVector) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Consumer handle, debounce slot and publish counters
pub struct Publisher {
    consumer: Box<dyn StateConsumer>,
    debounce_ms: i64,
    pending: Option<Millis>,
    last_publish: Option<Millis>,
    delivered: u64,
    dropped: u64,
}

impl Publisher {
    pub fn new(consumer: Box<dyn StateConsumer>, debounce_ms: i64) -> Self {
        Self {
            consumer,
            debounce_ms,
            pending: None,
            last_publish: None,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Arm the debounce slot; returns the pending deadline
    ///
    /// The first request fixes the deadline. Requests made while it is pending
    /// fold into the same publish, so sustained activity still publishes every
    /// `debounce_ms`.
    pub fn request(&mut self, now: Millis) -> Millis {
        *self
            .pending
            .get_or_insert_with(|| now.saturating_add(self.debounce_ms))
    }

    /// Pending debounce deadline, if armed
    pub fn deadline(&self) -> Option<Millis> {
        self.pending
    }

    /// Disarm the slot if its deadline has passed; returns whether it fired
    pub fn take_due(&mut self, now: Millis) -> bool {
        match self.pending {
            Some(deadline) if deadline <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn last_publish(&self) -> Option<Millis> {
        self.last_publish
    }

    /// Vectors accepted by the consumer
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Vectors the consumer refused
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Hand `vector` to the consumer; failures are logged and counted
    pub fn deliver(&mut self, vector: &StateVector) {
        self.last_publish = Some(vector.timestamp);
        match self.consumer.deliver(vector) {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                self.dropped += 1;
                debug!(error = %e, trigger = ?vector.trigger, "state vector not delivered");
            }
        }
    }

    /// Forget debounce and publish history
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_publish = None;
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("debounce_ms", &self.debounce_ms)
            .field("pending", &self.pending)
            .field("last_publish", &self.last_publish)
            .field("delivered", &self.delivered)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}
