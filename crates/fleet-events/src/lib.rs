//! Fleet event dispatch
//!
//! Turns "resource changed" notifications into reconciliation work items.
//!
//! - [`Resource`]: identity-only event value, encoded as a compact JSON key
//! - [`DedupQueue`]: set-queue that keeps at most one pending occurrence of a key
//! - [`RateLimitedQueue`]: lossless queue that re-delivers with per-key exponential delay
//! - [`RateLimitingQueue`]: the underlying generic work queue
//!
//! # Example
//!
//! ```no_run
//! use fleet_events::{DedupQueue, DedupQueueConfig, Resource, ResourceEventType};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), fleet_events::EventError> {
//! let stop = CancellationToken::new();
//! let queue = DedupQueue::spawn(DedupQueueConfig::default(), stop.clone());
//!
//! queue.push(Resource {
//!     project_id: "project-a".to_string(),
//!     id: "c-1".to_string(),
//!     event_type: ResourceEventType::UpdateStatus,
//!     ..Default::default()
//! }).await?;
//!
//! while let Some(resource) = queue.recv().await {
//!     println!("reconcile {}", resource.id);
//! }
//! stop.cancel();
//! queue.join().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod dedup;
pub mod error;
pub mod rate_limited;
pub mod resource;
pub mod workqueue;

pub use backoff::ItemExponentialFailureRateLimiter;
pub use dedup::{DedupQueue, DedupQueueConfig, DropPolicy};
pub use error::EventError;
pub use rate_limited::{RateLimitedQueue, RateLimitedQueueConfig};
pub use resource::{Handler, Resource, ResourceEventType};
pub use workqueue::RateLimitingQueue;
