use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{DispatchMessage, DispatchQueue, QueueError};

struct Slot {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    rx: Option<mpsc::UnboundedReceiver<DispatchMessage>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// In-process queue for tests and single-binary deployments.
///
/// Channels are created on first use. Messages published before anyone
/// subscribes are buffered. Each channel has a single consumer.
#[derive(Default)]
pub struct ChannelQueue {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ChannelQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the consumer end of `channel`. Returns `None` if it was already
    /// taken.
    pub fn subscribe(&self, channel: &str) -> Option<mpsc::UnboundedReceiver<DispatchMessage>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(channel.to_string())
            .or_insert_with(Slot::new)
            .rx
            .take()
    }
}

#[async_trait]
impl DispatchQueue for ChannelQueue {
    async fn publish(&self, channel: &str, message: &DispatchMessage) -> Result<(), QueueError> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots.entry(channel.to_string()).or_insert_with(Slot::new);
        slot.tx
            .send(message.clone())
            .map_err(|_| QueueError::Closed(channel.to_string()))
    }
}
