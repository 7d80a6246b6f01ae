//! Fleet type definitions
//!
//! Shared types for the fleet control plane:
//! - the typed condition model attached to clusters and namespaces
//! - the status merge engine used by every status writer
//! - Kubernetes Custom Resource Definitions (`Cluster`, `ClusterNamespace`, `ClusterToken`)
//! - bootstrap entities owned by the bootstrap service (templates, agents, infra, relays)

pub mod bootstrap;
pub mod cluster;
pub mod condition;
pub mod namespace;
pub mod patch;
pub mod token;

pub use bootstrap::*;
pub use cluster::*;
pub use condition::*;
pub use namespace::*;
pub use patch::{PatchError, StatusMerge, merge_conditions};
pub use token::*;
