use crate::{
    k8s::{labels, Pod, ResourceExt, StatefulSet},
    message, Error, RouteMetrics,
};
use ahash::AHashMap as HashMap;
use lrp_controller_core::Route;
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Tracks the last-known route-relevant state of every app workload and its
/// pods, turning watch updates into [`Change`]s for the route handlers.
pub struct Index {
    changes: mpsc::Sender<Change>,
    metrics: RouteMetrics,
    workloads: HashMap<ResourceId, Workload>,
    pods: HashMap<ResourceId, bool>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ResourceId {
    namespace: String,
    name: String,
}

/// A workload's route-relevant state as of a single watch update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub guid: String,
    /// Selects the workload's pods.
    pub selector: String,
    pub replicas: u32,
    pub routes: BTreeSet<Route>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// The declared routes changed from `old` to `workload.routes`.
    RouteSet {
        workload: Workload,
        old: BTreeSet<Route>,
    },

    /// The workload scaled down from `old` to `workload.replicas`.
    InstanceCount { workload: Workload, old: u32 },

    Deleted { workload: Workload },

    /// One of the workload's pods became ready or stopped being ready.
    Readiness {
        workload: Workload,
        pod: Box<Pod>,
        ready: bool,
    },
}

// === impl Index ===

impl Index {
    pub fn shared(changes: mpsc::Sender<Change>, metrics: RouteMetrics) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            changes,
            metrics,
            workloads: HashMap::new(),
            pods: HashMap::new(),
        }))
    }

    fn send(&self, change: Change) {
        let handler = change.handler();
        if let Err(error) = self.changes.try_send(change) {
            warn!(handler, %error, "Failed to queue route change");
            self.metrics.handler_error(handler);
        }
    }
}

impl kubert::index::IndexNamespacedResource<StatefulSet> for Index {
    fn apply(&mut self, sts: StatefulSet) {
        let Some(namespace) = sts.namespace() else {
            return;
        };
        let name = sts.name_any();
        if sts.labels().get(labels::SOURCE_TYPE).map(String::as_str) != Some(labels::APP_SOURCE_TYPE)
        {
            return;
        }
        let id = ResourceId::new(namespace, name);
        let previous = self.workloads.get(&id);

        let mut workload = Workload::from_stateful_set(&sts);
        workload.routes = match Workload::declared_routes(&sts) {
            Ok(routes) => routes,
            Err(error) => {
                warn!(%error, "Ignoring route annotation");
                previous.map(|w| w.routes.clone()).unwrap_or_default()
            }
        };

        let changes = match previous {
            None => vec![],
            Some(previous) => {
                let mut changes = Vec::with_capacity(2);
                if previous.routes != workload.routes {
                    changes.push(Change::RouteSet {
                        workload: workload.clone(),
                        old: previous.routes.clone(),
                    });
                }
                if workload.replicas < previous.replicas {
                    changes.push(Change::InstanceCount {
                        workload: workload.clone(),
                        old: previous.replicas,
                    });
                }
                changes
            }
        };

        self.workloads.insert(id, workload);
        for change in changes {
            self.send(change);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if let Some(workload) = self.workloads.remove(&id) {
            self.send(Change::Deleted { workload });
        }
    }
}

impl kubert::index::IndexNamespacedResource<Pod> for Index {
    fn apply(&mut self, pod: Pod) {
        let Some(namespace) = pod.namespace() else {
            return;
        };
        let id = ResourceId::new(namespace.clone(), pod.name_any());
        let ready = message::is_ready(&pod);
        let previous = self.pods.insert(id, ready);
        if previous.is_none() || previous == Some(ready) {
            return;
        }

        let Some(owner) = message::owner(&pod) else {
            return;
        };
        let Some(workload) = self.workloads.get(&ResourceId::new(namespace, owner)) else {
            debug!(pod = %pod.name_any(), "Readiness changed for a pod without a known workload");
            return;
        };
        let workload = workload.clone();
        self.send(Change::Readiness {
            workload,
            pod: Box::new(pod),
            ready,
        });
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.pods.remove(&ResourceId::new(namespace, name));
    }
}

// === impl Workload ===

impl Workload {
    /// Reads everything but the declared routes.
    fn from_stateful_set(sts: &StatefulSet) -> Self {
        let spec = sts.spec.as_ref();
        let selector = spec
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(labels::to_selector)
            .unwrap_or_else(|| {
                let guid = sts.labels().get(labels::GUID).cloned().unwrap_or_default();
                let version = sts.labels().get(labels::VERSION).cloned().unwrap_or_default();
                labels::identifier_selector(&guid, &version)
            });
        Self {
            namespace: sts.namespace().unwrap_or_default(),
            name: sts.name_any(),
            guid: sts.labels().get(labels::GUID).cloned().unwrap_or_default(),
            selector,
            // Unset replicas default to one on the server.
            replicas: spec
                .and_then(|s| s.replicas)
                .map(|r| u32::try_from(r).unwrap_or(0))
                .unwrap_or(1),
            routes: BTreeSet::new(),
        }
    }

    pub fn declared_routes(sts: &StatefulSet) -> Result<BTreeSet<Route>, Error> {
        let encoded = sts
            .annotations()
            .get(labels::annotations::REGISTERED_ROUTES)
            .map(String::as_str)
            .unwrap_or_default();
        Route::decode_set(encoded).map_err(|source| Error::Decode {
            name: sts.name_any(),
            source,
        })
    }
}

// === impl Change ===

impl Change {
    /// The handler label used in logs and metrics.
    pub fn handler(&self) -> &'static str {
        match self {
            Self::RouteSet { .. } => "route_set",
            Self::InstanceCount { .. } => "instance_count",
            Self::Deleted { .. } => "deletion",
            Self::Readiness { .. } => "readiness",
        }
    }
}

impl ResourceId {
    fn new(namespace: String, name: String) -> Self {
        Self { namespace, name }
    }
}
