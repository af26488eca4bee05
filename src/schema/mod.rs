//! strain.raw_event.v1 input schema
//!
//! This module defines the wire format pushed by the capture layer and the
//! NDJSON/array parsing around it.

mod adapter;
mod raw_event;

pub use adapter::*;
pub use raw_event::*;
