//! Scheduling queues owned by the dispatcher
//!
//! This module handles:
//! - Firing delayed and repeating envelopes at their execution time
//! - Serializing motion commands per kinematic chain
//! - Spacing consecutive chain commands by their declared durations

mod chain;
mod timer;

pub use chain::{ChainQueue, ChainQueueSet, QueueName};
pub use timer::TimerQueue;
