//! Bert Shared Protocol Types
//!
//! This crate provides the wire types, frame codec and request lifecycle
//! shared between the dispatcher and the channel adapters that feed it.

pub mod codec;
pub mod proto;
pub mod state_machine;

use std::sync::OnceLock;
use std::time::Instant;

// Re-export commonly used types at crate root
pub use proto::*;

/// Milliseconds elapsed since the process-wide monotonic origin.
///
/// Every scheduled execution time is expressed on this basis, so it never
/// jumps when the wall clock is adjusted.
pub fn monotonic_ms() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Timing parameters for the dispatcher
pub mod timing {
    /// Re-arm interval of the timer queue's idle sentinel
    pub const IDLE_DELAY_MS: u64 = 60_000;

    /// Target period of the dispatch loop
    pub const DEFAULT_CADENCE_MS: u64 = 1_000;

    /// Smoothing factor for the cycle-time and duty-cycle averages
    pub const DEFAULT_EWMA_WEIGHT: f64 = 0.5;

    /// Capacity of the request hand-off channel into the dispatcher
    pub const REQUEST_QUEUE_CAPACITY: usize = 100;

    /// Longest the dispatcher waits on the motor subsystem for one request
    pub const MOTOR_TIMEOUT_MS: u64 = 5_000;
}

/// Well-known request property keys
pub mod keys {
    pub const COMMAND: &str = "command";
    pub const METRIC: &str = "metric";
    pub const JOINT: &str = "joint";
    pub const PROPERTY: &str = "property";
    pub const VALUE: &str = "value";
    pub const POSE: &str = "pose";
}

impl RequestType {
    /// Local requests are answered by the dispatcher without the motor subsystem
    pub fn is_local(self) -> bool {
        matches!(self, RequestType::Command | RequestType::GetMetric)
    }

    /// Motion requests are forwarded to the motor subsystem
    pub fn is_motion(self) -> bool {
        matches!(
            self,
            RequestType::GetMotorProperty | RequestType::SetMotorProperty | RequestType::SetPose
        )
    }
}

/// Builder helpers for creating messages
impl Request {
    /// Create a request of the given type with no properties
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type: request_type.into(),
            ..Default::default()
        }
    }

    /// Create a COMMAND request, e.g. `HALT`
    pub fn command(name: impl Into<String>) -> Self {
        Self::new(RequestType::Command).with_property(keys::COMMAND, name)
    }

    /// Create a GET_METRIC request, e.g. `CADENCE`
    pub fn metric(name: impl Into<String>) -> Self {
        Self::new(RequestType::GetMetric).with_property(keys::METRIC, name)
    }

    /// Add a string property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a per-joint target value
    pub fn with_joint_target(mut self, joint: impl Into<String>, value: f64) -> Self {
        self.joint_targets.insert(joint.into(), value);
        self
    }

    /// Bind the request to a named chain
    pub fn on_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    /// Declare how long the resulting action occupies its chain
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Delay first eligibility by the given interval
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Fire repeatedly at the given interval
    pub fn repeating_every_ms(mut self, interval_ms: u64) -> Self {
        self.repeat_interval_ms = interval_ms;
        self
    }

    /// Get a property value by key
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl Response {
    /// Create a successful response carrying user-presentable text
    pub fn text(request_id: u64, request_type: RequestType, text: impl Into<String>) -> Self {
        Self {
            request_id,
            request_type: request_type.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Create an error response
    pub fn error(request_id: u64, request_type: RequestType, message: impl Into<String>) -> Self {
        Self {
            request_id,
            request_type: request_type.into(),
            error: message.into(),
            ..Default::default()
        }
    }

    /// Check whether this response reports a failure
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
