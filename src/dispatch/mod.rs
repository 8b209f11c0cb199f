//! Request dispatching
//!
//! This module handles:
//! - The single dispatch loop and its cadence
//! - Local COMMAND and GET_METRIC requests
//! - Forwarding motion requests to the motor, directly or through a chain
//! - Cycle metrics

mod core;
pub mod handlers;
pub mod metrics;

pub use self::core::{DispatchCore, DispatcherHandle};
pub use handlers::ShutdownKind;
pub use metrics::CycleMetrics;
