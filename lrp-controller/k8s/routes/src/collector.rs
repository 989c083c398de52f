use crate::{
    index::Workload,
    k8s::{labels, Clients, ListParams, Objects, Pod, ResourceExt, StatefulSet},
    message, Error,
};
use ahash::AHashMap as HashMap;
use lrp_controller_core::{Message, Route, Routes};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

/// Produces a full snapshot of the routes every ready app instance should
/// have registered.
#[derive(Clone)]
pub struct Collector {
    pods: Arc<dyn Objects<Pod>>,
    stateful_sets: Arc<dyn Objects<StatefulSet>>,
}

impl Collector {
    pub fn new(clients: &Clients) -> Self {
        Self {
            pods: clients.pods.clone(),
            stateful_sets: clients.stateful_sets.clone(),
        }
    }

    /// Builds one registration message per ready pod and declared port.
    ///
    /// A listing failure aborts the pass without a partial result. Pods whose
    /// workload is unknown or carries a malformed route annotation are skipped.
    pub async fn collect(&self) -> Result<Vec<Message>, Error> {
        let params = ListParams::default().labels(&labels::app_selector());
        let pods = self
            .pods
            .list(&params)
            .await
            .map_err(|source| Error::Store {
                context: "failed to list pods",
                source,
            })?;
        let workloads = self
            .stateful_sets
            .list(&params)
            .await
            .map_err(|source| Error::Store {
                context: "failed to list statefulsets",
                source,
            })?;

        let mut routes = HashMap::<String, BTreeSet<Route>>::with_capacity(workloads.len());
        for sts in &workloads {
            match Workload::declared_routes(sts) {
                Ok(declared) => {
                    routes.insert(sts.name_any(), declared);
                }
                Err(error) => warn!(%error, "Skipping workload"),
            }
        }

        let none = BTreeSet::new();
        let mut messages = Vec::new();
        for pod in pods.iter().filter(|p| message::is_ready(p)) {
            let Some(declared) = message::owner(pod).and_then(|o| routes.get(&o)) else {
                debug!(pod = %pod.name_any(), "Skipping pod without a known workload");
                continue;
            };
            match message::for_pod(pod, &Routes::group_by_port(declared, &none)) {
                Ok(m) => messages.extend(m),
                Err(error) => debug!(%error, "Skipping pod"),
            }
        }
        Ok(messages)
    }
}
