pub mod message;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::PublishError;
pub use message::RelayMessage;

/// Single-channel, unacknowledged pub/sub relay carrying JSON text.
///
/// Messages published while nobody is subscribed are lost. There is no
/// persistence and no replay.
#[derive(Clone)]
pub struct Relay {
    tx: broadcast::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> RelaySubscription {
        RelaySubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn publish(&self, msg: &RelayMessage) -> Result<usize, PublishError> {
        let raw = msg.encode()?;
        self.publish_raw(raw)
    }

    /// Publishes pre-encoded text. Returns how many subscribers will see it.
    pub fn publish_raw(&self, raw: String) -> Result<usize, PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Unavailable);
        }

        match self.tx.send(raw) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                debug!("no relay subscribers; message dropped");
                Ok(0)
            }
        }
    }

    /// Refuses further publishes. Existing subscribers drain what is buffered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub struct RelaySubscription {
    rx: broadcast::Receiver<String>,
}

impl RelaySubscription {
    /// Next raw message, or `None` once every sender is gone.
    /// A lagging subscriber skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(raw) => return Some(raw),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "relay subscriber lagged; oldest messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        loop {
            match self.rx.try_recv() {
                Ok(raw) => return Some(raw),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "relay subscriber lagged; oldest messages lost");
                }
                Err(_) => return None,
            }
        }
    }
}
