use crate::core::Message;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The external route registry.
pub trait RouteRegistry: Send + Sync {
    fn publish(&self, message: &Message) -> Result<()>;
}

/// Writes each message to the log as JSON.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogRegistry;

/// Drains the route queue into a [`RouteRegistry`].
pub struct Publisher {
    messages: mpsc::Receiver<Message>,
    registry: Arc<dyn RouteRegistry>,
}

impl RouteRegistry for LogRegistry {
    fn publish(&self, message: &Message) -> Result<()> {
        let json = serde_json::to_string(message)?;
        info!(message = %json, "Route update");
        Ok(())
    }
}

impl Publisher {
    pub fn new(messages: mpsc::Receiver<Message>, registry: Arc<dyn RouteRegistry>) -> Self {
        Self { messages, registry }
    }

    /// Publishes until shutdown or until every emitter has been dropped.
    pub async fn run(mut self, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                message = self.messages.recv() => match message {
                    Some(message) => {
                        if let Err(error) = self.registry.publish(&message) {
                            warn!(%error, instance = %message.instance_id, "Failed to publish route update");
                        }
                    }
                    None => return,
                },
            }
        }
    }
}
