//! Deduplicating set-queue
//!
//! A logical set of pending resource events guarding a bounded buffer:
//!
//! ```text
//! push ──▶ [input] ──▶ push loop ──▶ [buffer] ──▶ pop loop ──▶ [output] ──▶ recv
//!                        │ skip if key pending        │ remove key after hand-off
//!                        ▼                            ▼
//!                      pending set ◀──────────────────┘
//! ```
//!
//! At most one occurrence of a key is pending at any time. When no consumer is
//! ready the pop loop applies the configured [`DropPolicy`].

use crate::error::EventError;
use crate::resource::Resource;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Capacity of the input and output channels.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 10;

/// Capacity of the buffer between the two loops.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// What the pop loop does when no consumer can take an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Log and drop the item; its key becomes pushable again
    #[default]
    Drop,
    /// Wait until a consumer takes the item
    Block,
}

impl std::str::FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown drop policy {:?}, expected drop or block", other)),
        }
    }
}

/// Channel sizes and backpressure policy.
#[derive(Debug, Clone, Copy)]
pub struct DedupQueueConfig {
    pub io_buffer: usize,
    pub buffer: usize,
    pub drop_policy: DropPolicy,
}

impl Default for DedupQueueConfig {
    fn default() -> Self {
        Self {
            io_buffer: DEFAULT_IO_BUFFER_SIZE,
            buffer: DEFAULT_BUFFER_SIZE,
            drop_policy: DropPolicy::default(),
        }
    }
}

/// Deduplicating queue of resource events.
#[derive(Debug, Clone)]
pub struct DedupQueue {
    input: flume::Sender<Resource>,
    output: flume::Receiver<Resource>,
    dropped: Arc<AtomicU64>,
    tracker: TaskTracker,
}

impl DedupQueue {
    /// Starts the push and pop loops; both stop when `stop` is cancelled.
    pub fn spawn(config: DedupQueueConfig, stop: CancellationToken) -> Self {
        let (input, input_rx) = flume::bounded(config.io_buffer);
        let (buffer_tx, buffer_rx) = flume::bounded(config.buffer);
        let (output_tx, output) = flume::bounded(config.io_buffer);
        let pending: Arc<scc::HashSet<String>> = Arc::new(scc::HashSet::new());
        let dropped = Arc::new(AtomicU64::new(0));

        let tracker = TaskTracker::new();
        tracker.spawn(push_loop(input_rx, buffer_tx, Arc::clone(&pending), stop.clone()));
        tracker.spawn(pop_loop(
            buffer_rx,
            output_tx,
            pending,
            config.drop_policy,
            Arc::clone(&dropped),
            stop,
        ));
        tracker.close();

        Self {
            input,
            output,
            dropped,
            tracker,
        }
    }

    /// Offers an event to the queue.
    pub async fn push(&self, resource: Resource) -> Result<(), EventError> {
        self.input
            .send_async(resource)
            .await
            .map_err(|_| EventError::QueueClosed)
    }

    /// Next event; `None` once the queue stopped.
    pub async fn recv(&self) -> Option<Resource> {
        self.output.recv_async().await.ok()
    }

    /// Number of events dropped under backpressure.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits for both loops to exit.
    pub async fn join(&self) {
        self.tracker.wait().await;
    }
}

async fn push_loop(
    input: flume::Receiver<Resource>,
    buffer: flume::Sender<Resource>,
    pending: Arc<scc::HashSet<String>>,
    stop: CancellationToken,
) {
    loop {
        let resource = tokio::select! {
            () = stop.cancelled() => break,
            received = input.recv_async() => match received {
                Ok(resource) => resource,
                Err(_) => break,
            },
        };
        let key = match resource.key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Unable to encode resource {}: {}", resource, e);
                continue;
            }
        };
        // Claim the key before buffering so the pop loop can always release it.
        if pending.insert(key).is_err() {
            debug!("Resource {} already pending, skipping", resource);
            continue;
        }
        tokio::select! {
            () = stop.cancelled() => break,
            sent = buffer.send_async(resource) => if sent.is_err() { break },
        }
    }
    debug!("Dedup queue push loop stopped");
}

async fn pop_loop(
    buffer: flume::Receiver<Resource>,
    output: flume::Sender<Resource>,
    pending: Arc<scc::HashSet<String>>,
    policy: DropPolicy,
    dropped: Arc<AtomicU64>,
    stop: CancellationToken,
) {
    loop {
        let resource = tokio::select! {
            () = stop.cancelled() => break,
            received = buffer.recv_async() => match received {
                Ok(resource) => resource,
                Err(_) => break,
            },
        };
        let key = resource.key().ok();
        let keep_running = match policy {
            DropPolicy::Drop => match output.try_send(resource) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(resource)) => {
                    info!("Unable to dequeue {}, dropping", resource);
                    dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            },
            DropPolicy::Block => tokio::select! {
                () = stop.cancelled() => false,
                sent = output.send_async(resource) => sent.is_ok(),
            },
        };
        if let Some(key) = key {
            pending.remove(&key);
        }
        if !keep_running {
            break;
        }
    }
    debug!("Dedup queue pop loop stopped");
}

#[cfg(test)]
#[path = "dedup_test.rs"]
mod dedup_test;
