//! Handlers for requests the dispatcher answers itself

mod command;
mod metric;

pub use command::handle_command;
pub use metric::{answer_metric, handle_get_metric};

use super::metrics::CycleMetrics;
use crate::error::DispatchError;
use chrono::NaiveDate;

/// Fixed facts about the robot reported by GET_METRIC
#[derive(Debug, Clone)]
pub struct RobotIdentity {
    pub name: String,
    pub height_cm: u32,
    pub birth_date: NaiveDate,
}

/// Context passed to local handlers
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub identity: RobotIdentity,
    /// Snapshot taken at the start of the request
    pub metrics: CycleMetrics,
    pub today: NaiveDate,
}

/// How the dispatcher leaves its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Stop all collaborators and exit the process
    Halt,
    /// As `Halt`, then power the host off
    PowerOff,
}

/// Result of handling a local request
#[derive(Debug, Clone, PartialEq)]
pub enum LocalResult {
    /// Answered with user-presentable text
    Answered { text: String },
    /// Request could not be honoured; the error text goes back to the user
    Rejected { error: DispatchError },
    /// Deliberate shutdown; `text` is sent before collaborators stop
    Shutdown { kind: ShutdownKind, text: String },
}
