use serde::{Deserialize, Serialize};
use std::fmt;

/// The observed state of a single replica.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Instance {
    /// The replica's ordinal.
    pub index: u32,

    /// Process start time in nanoseconds since the epoch, or 0 if unknown.
    pub since: i64,
    pub state: InstanceState,
    pub placement_error: Option<PlacementError>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Running,
    Crashed,
    /// Scheduled but not yet running.
    Claimed,
    Unknown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PlacementError {
    #[serde(rename = "Insufficient resources: memory")]
    InsufficientMemory,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => "RUNNING".fmt(f),
            Self::Crashed => "CRASHED".fmt(f),
            Self::Claimed => "CLAIMED".fmt(f),
            Self::Unknown => "UNKNOWN".fmt(f),
        }
    }
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientMemory => "Insufficient resources: memory".fmt(f),
        }
    }
}
