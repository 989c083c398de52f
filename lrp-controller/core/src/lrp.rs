use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Identifies a desired LRP. Exactly one workload exists per identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct LrpIdentifier {
    pub guid: String,
    pub version: String,
}

/// The desired state of a long-running process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Lrp {
    #[serde(flatten)]
    pub id: LrpIdentifier,
    pub process_type: String,
    pub app_name: String,
    pub app_guid: String,
    pub space_name: String,
    pub space_guid: String,
    pub org_name: String,
    pub org_guid: String,
    pub target_instances: u32,

    /// Derived from the workload's ready replicas; never applied.
    pub running_instances: u32,
    pub command: Vec<String>,
    pub image: String,
    pub private_registry: Option<PrivateRegistry>,
    pub ports: Vec<u16>,
    pub memory_mb: u64,
    pub disk_mb: u64,

    /// The serialized route list, e.g. `[{"hostname":"foo.example.com","port":8080}]`.
    pub app_uris: String,
    pub volume_mounts: Vec<VolumeMount>,
    pub env: BTreeMap<String, String>,
    pub health: Healthcheck,

    /// Opaque ordering token. Updates carrying the stored value are no-ops.
    pub last_updated: String,
    pub user_defined_annotations: BTreeMap<String, String>,

    /// The original request, stored verbatim.
    pub lrp: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrivateRegistry {
    pub server: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeMount {
    pub claim_name: String,
    pub mount_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Healthcheck {
    #[serde(rename = "type")]
    pub kind: HealthcheckKind,
    pub port: u16,
    pub endpoint: String,
    pub timeout_ms: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthcheckKind {
    Http,
    Port,
    #[default]
    None,
}

// === impl LrpIdentifier ===

impl LrpIdentifier {
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// The `GUID-Version` process guid recorded on workloads.
    pub fn process_guid(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.guid, self.version)
    }
}
