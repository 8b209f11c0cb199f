//! Response channels and channel adapters
//!
//! This module handles:
//! - Registering how a response reaches each request source
//! - Routing responses by source tag
//! - TCP adapters for the COMMAND and TERMINAL channels

mod registry;
mod tcp;

pub use registry::{ChannelRegistry, LogSender};
pub use tcp::TcpChannel;

use anyhow::Result;
use async_trait::async_trait;
use bert_shared::Response;

/// Delivers responses to one external channel
#[async_trait]
pub trait ResponseSender: Send + Sync {
    /// Deliver a response to the channel's client
    async fn send(&self, response: Response) -> Result<()>;

    /// Human-readable name for this channel
    fn name(&self) -> &str;
}

/// An external subsystem the dispatcher shuts down on HALT / SHUTDOWN
#[async_trait]
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    async fn stop(&self) -> Result<()>;
}
