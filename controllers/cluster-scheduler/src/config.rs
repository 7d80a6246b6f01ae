//! Controller configuration, read once from the environment.

use crate::error::ControllerError;
use fleet_events::DropPolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BOOTSTRAP_URL: &str = "http://sentry.fleet-system:11000";
pub const DEFAULT_CORE_RELAY_TEMPLATE: &str = "fleet-core-relay-agent";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub bootstrap_url: String,
    pub bootstrap_token: String,
    /// Bootstrap address written into relay annotations
    pub relay_bootstrap_addr: String,
    /// Namespace scope of the watchers; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Workers per queue kind
    pub workers: usize,
    pub cooldown: Duration,
    /// Deadline of one event and of one status write
    pub event_timeout: Duration,
    pub anti_entropy_interval: Duration,
    pub dedup_drop_policy: DropPolicy,
    pub ca_key_password: Option<String>,
    /// Template whose registrations check a cluster in
    pub core_relay_template: String,
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_string(),
            bootstrap_token: String::new(),
            relay_bootstrap_addr: String::new(),
            watch_namespace: None,
            workers: 3,
            cooldown: crate::reconciler::DEFAULT_COOLDOWN,
            event_timeout: Duration::from_secs(10),
            anti_entropy_interval: Duration::from_secs(60),
            dedup_drop_policy: DropPolicy::Drop,
            ca_key_password: None,
            core_relay_template: DEFAULT_CORE_RELAY_TEMPLATE.to_string(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ControllerError> {
    match lookup(name) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{} has invalid value {:?}", name, raw))),
        _ => Ok(default),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<Duration, ControllerError> {
    let value: u64 = parse(lookup, name, default)?;
    if value == 0 {
        return Err(ControllerError::InvalidConfig(format!("{} must be positive", name)));
    }
    Ok(Duration::from_secs(value))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let bootstrap_token = lookup("BOOTSTRAP_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "BOOTSTRAP_TOKEN environment variable is required".to_string(),
                )
            })?;

        let workers: usize = parse(&lookup, "CLUSTER_WORKERS", 3)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "CLUSTER_WORKERS must be positive".to_string(),
            ));
        }

        Ok(Self {
            bootstrap_url: lookup("BOOTSTRAP_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BOOTSTRAP_URL.to_string()),
            bootstrap_token,
            relay_bootstrap_addr: lookup("RELAY_BOOTSTRAP_ADDR").unwrap_or_default(),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            workers,
            cooldown: secs(&lookup, "CLUSTER_COOLDOWN_SECS", 60)?,
            event_timeout: secs(&lookup, "EVENT_TIMEOUT_SECS", 10)?,
            anti_entropy_interval: secs(&lookup, "ANTI_ENTROPY_INTERVAL_SECS", 60)?,
            dedup_drop_policy: parse(&lookup, "DEDUP_DROP_POLICY", DropPolicy::Drop)?,
            ca_key_password: lookup("CA_KEY_PASSWORD").filter(|v| !v.is_empty()),
            core_relay_template: lookup("CORE_RELAY_TEMPLATE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_CORE_RELAY_TEMPLATE.to_string()),
            metrics_addr: lookup("METRICS_ADDR")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
                .parse()
                .map_err(|_| ControllerError::InvalidConfig("METRICS_ADDR is not a socket address".to_string()))?,
        })
    }
}
