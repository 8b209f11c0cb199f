//! Protobuf message definitions exchanged with channel adapters
//!
//! Declared with `prost` derive macros so no `.proto` build step is needed.

use std::collections::HashMap;

/// Kind of work a request asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    Unknown = 0,
    /// HALT / SHUTDOWN and other named commands
    Command = 1,
    /// Read one of the dispatcher's own metrics
    GetMetric = 2,
    GetMotorProperty = 3,
    SetMotorProperty = 4,
    /// Move a group of joints to target values
    SetPose = 5,
}

/// A request submitted by a channel or the internal timer
#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(enumeration = "RequestType", tag = "1")]
    pub request_type: i32,

    #[prost(map = "string, string", tag = "2")]
    pub properties: HashMap<String, String>,

    /// Per-joint target values (degrees)
    #[prost(map = "string, double", tag = "3")]
    pub joint_targets: HashMap<String, f64>,

    /// Chain that must serialize this request, e.g. `RIGHT_ARM`
    #[prost(string, optional, tag = "4")]
    pub chain: Option<String>,

    #[prost(uint64, tag = "5")]
    pub delay_ms: u64,

    /// Zero means the request fires once
    #[prost(uint64, tag = "6")]
    pub repeat_interval_ms: u64,

    /// Time the resulting action occupies its chain
    #[prost(uint64, tag = "7")]
    pub duration_ms: u64,
}

/// The answer routed back to the channel that originated a request
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    #[prost(enumeration = "RequestType", tag = "2")]
    pub request_type: i32,

    /// User-presentable answer
    #[prost(string, tag = "3")]
    pub text: String,

    /// Empty on success
    #[prost(string, tag = "4")]
    pub error: String,

    #[prost(map = "string, string", tag = "5")]
    pub properties: HashMap<String, String>,
}
