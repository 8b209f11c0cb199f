//! Source-tag to response-sender registry

use super::ResponseSender;
use anyhow::Result;
use async_trait::async_trait;
use bert_shared::Response;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Maps each request source to the sender that reaches it
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn ResponseSender>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the sender for a source tag
    pub async fn register(&self, source: impl Into<String>, sender: Arc<dyn ResponseSender>) {
        let source = source.into();
        info!("Registered channel {} for source {}", sender.name(), source);
        self.channels.write().await.insert(source, sender);
    }

    /// Remove the sender for a source tag
    #[cfg(test)]
    pub(crate) async fn unregister(&self, source: &str) {
        self.channels.write().await.remove(source);
    }

    #[cfg(test)]
    pub(crate) async fn is_registered(&self, source: &str) -> bool {
        self.channels.read().await.contains_key(source)
    }

    /// Route a response to its source.
    ///
    /// Returns false when the response was dropped: no sender is
    /// registered for the source, or the sender failed. Neither is fatal.
    pub async fn route(&self, source: &str, response: Response) -> bool {
        let sender = self.channels.read().await.get(source).cloned();

        let Some(sender) = sender else {
            warn!(
                "No channel registered for source {}, dropping response to request {}",
                source, response.request_id
            );
            return false;
        };

        match sender.send(response).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver response via {}: {}", sender.name(), e);
                false
            }
        }
    }
}

/// Sender that writes responses to the log, for internally generated requests
pub struct LogSender;

#[async_trait]
impl ResponseSender for LogSender {
    async fn send(&self, response: Response) -> Result<()> {
        if response.is_error() {
            warn!("[INTERNAL] Request {} failed: {}", response.request_id, response.error);
        } else {
            info!("[INTERNAL] {}", response.text);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
