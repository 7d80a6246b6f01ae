//! In-process change notifications

use crate::store_trait::Notifier;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Per-channel capacity; slow listeners lag instead of blocking publishers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// `Notifier` backed by one broadcast channel per channel name
#[derive(Debug)]
pub struct BroadcastNotifier {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, channel: &str, payload: &str) {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        match channels.get(channel) {
            Some(tx) => {
                if tx.send(payload.to_string()).is_err() {
                    debug!("No listeners on channel {}", channel);
                }
            }
            None => debug!("No listeners on channel {}", channel),
        }
    }

    fn listen(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}
