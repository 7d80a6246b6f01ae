//! Condition model
//!
//! A condition is a typed status fact (`type`, `status`, `reason`, `lastUpdated`)
//! attached to a cluster or a namespace. Each owning entity draws its condition
//! types from a closed enumeration and holds at most one condition per type.
//!
//! Condition types are persisted as their integer code, statuses as PascalCase strings:
//!
//! ```json
//! {"type": 8, "status": "Success", "reason": "bootstrap agent created", "lastUpdated": "2024-05-01T10:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reason carried by every condition of a freshly created entity.
pub const DEFAULT_CONDITION_REASON: &str = "pending";

/// Status value of a condition.
///
/// Serializes as PascalCase ("Success", "Retry", etc.) but also accepts
/// lowercase on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    /// Nothing has happened yet
    #[default]
    #[serde(alias = "notset")]
    NotSet,
    /// Action requested, waiting for a worker
    #[serde(alias = "pending")]
    Pending,
    /// Action running
    #[serde(alias = "inprogress")]
    InProgress,
    /// Action completed
    #[serde(alias = "success")]
    Success,
    /// Action failed and will not be retried
    #[serde(alias = "failed")]
    Failed,
    /// Action failed and will be retried after a cooldown
    #[serde(alias = "retry")]
    Retry,
    /// Action deliberately not executed
    #[serde(alias = "skipped")]
    Skipped,
    /// Action stopped by an operator
    #[serde(alias = "stopped")]
    Stopped,
    /// Action result no longer valid
    #[serde(alias = "expired")]
    Expired,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSet => "NotSet",
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Retry => "Retry",
            Self::Skipped => "Skipped",
            Self::Stopped => "Stopped",
            Self::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// A closed enumeration of condition types owned by one kind of entity.
pub trait ConditionType:
    Copy + Eq + std::hash::Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Every type, in default-set order.
    const ALL: &'static [Self];

    /// Persisted integer code.
    fn code(self) -> i32;

    /// Inverse of [`ConditionType::code`].
    fn from_code(code: i32) -> Option<Self>;

    /// Human readable name, used in logs.
    fn name(self) -> &'static str;
}

/// Declares a condition type enum with integer serde and schema support.
macro_rules! condition_types {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $code ),+
        }

        impl ConditionType for $name {
            const ALL: &'static [Self] = &[ $( Self::$variant ),+ ];

            fn code(self) -> i32 {
                self as i32
            }

            fn from_code(code: i32) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_i32(self.code())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let code = i32::deserialize(deserializer)?;
                Self::from_code(code).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "unknown {} code {}",
                        stringify!($name),
                        code
                    ))
                })
            }
        }

        impl JsonSchema for $name {
            fn schema_name() -> std::borrow::Cow<'static, str> {
                stringify!($name).into()
            }

            fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
                schemars::json_schema!({
                    "type": "integer",
                    "format": "int32"
                })
            }
        }
    };
}

condition_types! {
    /// Condition types of a cluster.
    pub enum ClusterConditionType {
        /// Cluster exchanged its registration token
        Register = 1,
        /// Cluster approved for use
        Approve = 2,
        /// Relay agent of the cluster connected
        CheckIn = 3,
        /// Nodes of the cluster synced
        NodeSync = 4,
        /// Namespaces of the cluster synced
        NamespaceSync = 5,
        /// Cluster ready for workloads
        Ready = 6,
        /// Auxiliary tasks of the cluster synced
        AuxiliaryTaskSync = 7,
        /// Bootstrap agent and relay config created
        BootstrapAgent = 8,
        /// Cluster deletion
        Delete = 9,
        /// Cluster health reported by its agent
        Health = 10,
    }
}

condition_types! {
    /// Condition types of a namespace placed on a cluster.
    pub enum NamespaceConditionType {
        /// Namespace assigned to the cluster
        Assigned = 0,
        /// Namespace spec converged on the cluster
        Converged = 1,
        /// Namespace ready
        Ready = 2,
        /// Namespace deletion
        Delete = 3,
    }
}

/// A typed status fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition<T> {
    /// Condition type (merge key)
    #[serde(rename = "type")]
    pub kind: T,

    /// Current status
    pub status: ConditionStatus,

    /// Human readable reason
    #[serde(default)]
    pub reason: String,

    /// Time of the last status change
    pub last_updated: DateTime<Utc>,
}

/// Condition attached to a cluster.
pub type ClusterCondition = Condition<ClusterConditionType>;

/// Condition attached to a namespace.
pub type NamespaceCondition = Condition<NamespaceConditionType>;

impl<T: ConditionType> Condition<T> {
    /// Creates a condition stamped with the current time.
    pub fn new(kind: T, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            reason: reason.into(),
            last_updated: Utc::now(),
        }
    }
}

/// Returns the factory for conditions of `kind`.
///
/// ```
/// use fleet_types::{new_condition, ClusterConditionType, ConditionStatus};
///
/// let bootstrap = new_condition(ClusterConditionType::BootstrapAgent);
/// let condition = bootstrap(ConditionStatus::Pending, "created");
/// assert_eq!(condition.reason, "created");
/// ```
pub fn new_condition<T: ConditionType>(kind: T) -> impl Fn(ConditionStatus, &str) -> Condition<T> {
    move |status, reason| Condition::new(kind, status, reason)
}

/// Full default condition set: every type `NotSet` with reason `pending`.
pub fn default_conditions<T: ConditionType>() -> Vec<Condition<T>> {
    T::ALL
        .iter()
        .map(|kind| new_condition(*kind)(ConditionStatus::NotSet, DEFAULT_CONDITION_REASON))
        .collect()
}

/// Read and replace access to an entity's condition set.
///
/// `set_condition` is the only mutation; it keeps at most one entry per type.
pub trait HasConditions {
    /// Condition type enumeration of the entity.
    type Kind: ConditionType;

    /// Condition set in persisted order.
    fn conditions(&self) -> &[Condition<Self::Kind>];

    /// Mutable condition set.
    fn conditions_mut(&mut self) -> &mut Vec<Condition<Self::Kind>>;

    /// Condition of `kind`, if present.
    fn condition(&self, kind: Self::Kind) -> Option<&Condition<Self::Kind>> {
        self.conditions().iter().find(|c| c.kind == kind)
    }

    /// Replaces the condition of the same type, or appends it when absent.
    fn set_condition(&mut self, condition: Condition<Self::Kind>) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.kind == condition.kind) {
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
    }

    /// True if the condition of `kind` currently holds `status`.
    fn is_condition(&self, kind: Self::Kind, status: ConditionStatus) -> bool {
        self.condition(kind).is_some_and(|c| c.status == status)
    }

    /// Reason of the condition of `kind`, if present.
    fn condition_reason(&self, kind: Self::Kind) -> Option<&str> {
        self.condition(kind).map(|c| c.reason.as_str())
    }

    /// True if the condition of `kind` is `Retry` and was last updated more than `cooldown` ago.
    fn is_cooled_down(&self, kind: Self::Kind, cooldown: Duration) -> bool {
        self.is_cooled_down_at(kind, cooldown, Utc::now())
    }

    /// [`HasConditions::is_cooled_down`] evaluated at `now`.
    fn is_cooled_down_at(&self, kind: Self::Kind, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match self.condition(kind) {
            Some(c) if c.status == ConditionStatus::Retry => now
                .signed_duration_since(c.last_updated)
                .to_std()
                .is_ok_and(|elapsed| elapsed > cooldown),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "condition_test.rs"]
mod condition_test;
