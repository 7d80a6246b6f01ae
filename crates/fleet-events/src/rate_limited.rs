//! Rate-limited resource queue
//!
//! Lossless counterpart of the [`crate::DedupQueue`]: resources are encoded
//! to keys and pushed into a [`RateLimitingQueue`]; an out loop decodes keys
//! and hands them to consumers. When no consumer is ready the key is put back
//! after the base delay instead of being dropped; such bounces do not count
//! as requeues.
//!
//! Consumers report the outcome of their handling:
//! [`RateLimitedQueue::forget`] after success, [`RateLimitedQueue::requeue`] after failure.

use crate::backoff::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, ItemExponentialFailureRateLimiter};
use crate::dedup::DEFAULT_IO_BUFFER_SIZE;
use crate::error::EventError;
use crate::resource::Resource;
use crate::workqueue::RateLimitingQueue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Channel sizes and rate limiter bounds.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitedQueueConfig {
    pub io_buffer: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RateLimitedQueueConfig {
    fn default() -> Self {
        Self {
            io_buffer: DEFAULT_IO_BUFFER_SIZE,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Rate-limited queue of resource events.
#[derive(Debug, Clone)]
pub struct RateLimitedQueue {
    input: flume::Sender<Resource>,
    output: flume::Receiver<Resource>,
    queue: RateLimitingQueue<String>,
    tracker: TaskTracker,
}

impl RateLimitedQueue {
    /// Starts the in and out loops; `stop` shuts the queue down.
    pub fn spawn(config: RateLimitedQueueConfig, stop: CancellationToken) -> Self {
        let (input, input_rx) = flume::bounded(config.io_buffer);
        let (output_tx, output) = flume::bounded(config.io_buffer);
        let queue = RateLimitingQueue::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay,
            config.max_delay,
        ));

        let tracker = TaskTracker::new();
        tracker.spawn(in_loop(input_rx, queue.clone(), stop));
        tracker.spawn(out_loop(queue.clone(), output_tx, config.base_delay));
        tracker.close();

        Self {
            input,
            output,
            queue,
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

    /// Next event; `None` once the queue shut down and drained.
    pub async fn recv(&self) -> Option<Resource> {
        self.output.recv_async().await.ok()
    }

    /// Re-delivers `resource` after its rate-limited delay.
    pub fn requeue(&self, resource: &Resource) -> Result<(), EventError> {
        self.queue.add_rate_limited(resource.key()?);
        Ok(())
    }

    /// Resets the delay of `resource` after successful handling.
    pub fn forget(&self, resource: &Resource) -> Result<(), EventError> {
        self.queue.forget(&resource.key()?);
        Ok(())
    }

    /// Rate-limited re-deliveries of `resource` since the last `forget`.
    pub fn num_requeues(&self, resource: &Resource) -> Result<u32, EventError> {
        Ok(self.queue.num_requeues(&resource.key()?))
    }

    /// Waits for both loops and every pending delayed add.
    pub async fn join(&self) {
        self.tracker.wait().await;
        self.queue.join().await;
    }
}

async fn in_loop(input: flume::Receiver<Resource>, queue: RateLimitingQueue<String>, stop: CancellationToken) {
    loop {
        let resource = tokio::select! {
            () = stop.cancelled() => break,
            received = input.recv_async() => match received {
                Ok(resource) => resource,
                Err(_) => break,
            },
        };
        match resource.key() {
            Ok(key) => queue.add(key),
            Err(e) => warn!("Unable to encode resource {}: {}", resource, e),
        }
    }
    queue.shut_down();
    debug!("Rate-limited queue in loop stopped");
}

async fn out_loop(queue: RateLimitingQueue<String>, output: flume::Sender<Resource>, retry_delay: Duration) {
    while let Some(key) = queue.get().await {
        let resource = match Resource::from_key(&key) {
            Ok(resource) => resource,
            Err(e) => {
                warn!("Unable to decode key {}: {}", key, e);
                queue.forget(&key);
                queue.done(&key);
                continue;
            }
        };
        match output.try_send(resource) {
            Ok(()) => queue.done(&key),
            Err(flume::TrySendError::Full(resource)) => {
                debug!("No consumer ready for {}, requeueing", resource);
                queue.done(&key);
                queue.add_after(key, retry_delay);
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                queue.done(&key);
                break;
            }
        }
    }
    debug!("Rate-limited queue out loop stopped");
}
