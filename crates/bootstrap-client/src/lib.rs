//! Bootstrap Service Client
//!
//! Client for the bootstrap service that owns agent templates, agents and
//! the CA material agents are signed with.
//!
//! # Example
//!
//! ```no_run
//! use bootstrap_client::{BootstrapClient, BootstrapClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BootstrapClient::new(
//!     "http://sentry.fleet-system:11000".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! // Templates every cluster gets a relay agent for
//! let templates = client
//!     .get_bootstrap_agent_templates("fleet.microscaler.io/defaultRelay=true")
//!     .await?;
//!
//! for template in templates {
//!     let infra = client.get_bootstrap_infra(&template.infra_ref).await?;
//!     println!("{} signs with {}", template.name, infra.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod bootstrap_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use bootstrap_trait::BootstrapClientTrait;
pub use client::BootstrapClient;
pub use error::BootstrapError;
#[cfg(feature = "test-util")]
pub use mock::MockBootstrapClient;
