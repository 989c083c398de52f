use crate::RouteMetrics;
use lrp_controller_core::{Emit, Message};
use tokio::sync::mpsc;
use tracing::warn;

/// Emits route messages into a bounded queue drained by the route publisher.
///
/// Emitting never blocks: when the queue is full the message is dropped and
/// counted. The next collector pass re-registers every live route.
#[derive(Clone, Debug)]
pub struct QueueEmitter {
    tx: mpsc::Sender<Message>,
    metrics: RouteMetrics,
}

impl QueueEmitter {
    pub fn channel(capacity: usize, metrics: RouteMetrics) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }
}

impl Emit for QueueEmitter {
    fn emit(&self, message: Message) {
        if message.routes.is_empty() {
            return;
        }
        match self.tx.try_send(message) {
            Ok(()) => self.metrics.emitted(),
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.metrics.dropped();
                warn!(instance = %message.instance_id, port = message.port, "Route queue is full; dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.metrics.dropped();
                warn!(instance = %message.instance_id, "Route publisher has stopped; dropping message");
            }
        }
    }
}
