//! Request dispatcher for a small humanoid robot
//!
//! Requests arrive from channel adapters, are answered locally or forwarded
//! to the motor subsystem, and their responses are routed back to the
//! channel that sent them.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod motor;
pub mod queue;
pub mod system;

pub use config::RobotConfig;
pub use dispatch::{DispatchCore, DispatcherHandle, ShutdownKind};
pub use error::{ConfigError, DispatchError};
pub use message::MessageEnvelope;
