//! Client channel handles.

use crate::delivery::events::DeliveryEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub type ChannelId = u64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a client connection. Cheap to clone; all clones share one id.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    sender: mpsc::UnboundedSender<DeliveryEvent>,
}

impl ChannelHandle {
    pub fn new(sender: mpsc::UnboundedSender<DeliveryEvent>) -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    /// A fresh handle together with the receiver the transport reads from.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<DeliveryEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Fails once the receiving side has gone away.
    pub(crate) fn send(&self, event: DeliveryEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .map_err(|_| "receiver dropped".to_string())
    }
}
