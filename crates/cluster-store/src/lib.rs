//! Fleet storage
//!
//! Narrow repositories the control plane persists clusters, cluster
//! namespaces and registration tokens through, plus a change notification
//! side channel.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{ClusterKey, ClusterRepository, KubeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client, None);
//!
//! let cluster = store.get_cluster(&ClusterKey::by_name("project-a", "edge-1")).await?;
//! println!("{:?}", cluster.status);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod key;
pub mod kube_store;
pub mod notify;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::StoreError;
pub use key::ClusterKey;
pub use kube_store::KubeStore;
pub use notify::{BroadcastNotifier, DEFAULT_CHANNEL_CAPACITY};
pub use store_trait::{ClusterRepository, NamespaceRepository, Notifier, Store, TokenRepository};
#[cfg(feature = "test-util")]
pub use mock::InMemoryStore;
