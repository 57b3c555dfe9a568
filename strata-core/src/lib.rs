//! Single-node segmented commit-log storage engine: an ordered, durable
//! sequence of opaque byte records addressed by monotonically increasing
//! 64-bit offsets.
//!
//! A [`Log`] owns a directory of segments; each segment pairs an
//! append-only store file with a memory-mapped sparse index translating
//! offsets to store positions. Appends go to the active (last) segment
//! and roll a new one when it fills; reads may target any segment.

pub mod config;
pub mod error;
pub mod log;
pub mod record;

mod index;
mod segment;
mod store;

// Re-export key types for easier use
pub use config::{Config, SegmentConfig};
pub use error::{LogError, LogResult};
pub use log::{Log, LogReader};
pub use record::Record;
