//! Message envelopes carrying requests through the dispatcher
//!
//! An envelope wraps a request with the scheduling metadata the queues
//! need: when it may fire, whether it repeats, which chain owns it, and
//! how long its action occupies that chain.

mod envelope;

pub use envelope::MessageEnvelope;

/// Source tags identifying the channel that created a request
pub mod sources {
    /// Primary command socket (tablet / phone bridge)
    pub const COMMAND: &str = "COMMAND";
    /// Interactive terminal
    pub const TERMINAL: &str = "TERMINAL";
    /// Requests generated inside the dispatcher, e.g. periodic timers
    pub const INTERNAL: &str = "INTERNAL";
}
