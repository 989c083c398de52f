use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A user-declared route: a hostname served on a container port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Route {
    pub hostname: String,
    pub port: u32,
}

/// The routes to add and remove for a single instance port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Routes {
    #[serde(default)]
    pub registered_routes: Vec<String>,
    #[serde(default)]
    pub unregistered_routes: Vec<String>,
}

/// A route registry update for one instance/port pair.
///
/// The registry treats messages as set-membership updates, so emitting the same
/// message more than once is harmless.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    pub instance_id: String,
    pub name: String,
    pub address: String,
    pub port: u32,
    pub tls_port: u32,
    #[serde(flatten)]
    pub routes: Routes,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode routes: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// A sink for route messages.
///
/// Implementations must be safe to call concurrently and must not block.
pub trait Emit: Send + Sync {
    fn emit(&self, message: Message);
}

// === impl Route ===

impl Route {
    pub fn new(hostname: impl Into<String>, port: u32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Decodes a serialized route list. A blank annotation declares no routes.
    pub fn decode_set(encoded: &str) -> Result<BTreeSet<Route>, DecodeError> {
        if encoded.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        let routes = serde_json::from_str::<Vec<Route>>(encoded)?;
        Ok(routes.into_iter().collect())
    }
}

// === impl Routes ===

impl Routes {
    pub fn is_empty(&self) -> bool {
        self.registered_routes.is_empty() && self.unregistered_routes.is_empty()
    }

    /// Groups registrations and unregistrations by port.
    ///
    /// Ports are visited in ascending order and hostnames are sorted.
    pub fn group_by_port(
        registered: &BTreeSet<Route>,
        unregistered: &BTreeSet<Route>,
    ) -> BTreeMap<u32, Routes> {
        let mut groups = BTreeMap::<u32, Routes>::new();
        for route in registered {
            groups
                .entry(route.port)
                .or_default()
                .registered_routes
                .push(route.hostname.clone());
        }
        for route in unregistered {
            groups
                .entry(route.port)
                .or_default()
                .unregistered_routes
                .push(route.hostname.clone());
        }
        groups
    }
}
