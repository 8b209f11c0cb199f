//! Motor subsystem interface
//!
//! The dispatcher hands motion requests to a `Motor` one at a time and
//! waits for its answer, bounded by the configured motor timeout.

mod simulated;

pub use simulated::SimulatedMotor;

use crate::message::MessageEnvelope;
use anyhow::Result;
use async_trait::async_trait;
use bert_shared::Response;

/// The external motor subsystem
#[async_trait]
pub trait Motor: Send + Sync {
    /// Carry out a motion request and return its response.
    ///
    /// An `Err` is reported to the requester verbatim in the response's
    /// error field.
    async fn process_request(&self, envelope: &MessageEnvelope) -> Result<Response>;

    /// Release the hardware on shutdown
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
