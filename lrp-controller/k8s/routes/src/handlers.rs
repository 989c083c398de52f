use crate::{
    index::{Change, Workload},
    k8s::{ListParams, Objects, Pod},
    message, Error, RouteMetrics,
};
use lrp_controller_core::{Emit, Message, Route, Routes};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumes [`Change`]s produced by the index until shutdown.
pub struct Controller {
    handler: Handler,
    changes: mpsc::Receiver<Change>,
}

/// Turns workload changes into route registry messages.
///
/// Handlers are best-effort: failures are logged and counted, never returned
/// to the watch that produced the change.
#[derive(Clone)]
pub struct Handler {
    pods: Arc<dyn Objects<Pod>>,
    emitter: Arc<dyn Emit>,
    metrics: RouteMetrics,
}

// === impl Controller ===

impl Controller {
    pub fn new(handler: Handler, changes: mpsc::Receiver<Change>) -> Self {
        Self { handler, changes }
    }

    pub async fn run(mut self, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Route controller shutting down");
                    return;
                }
                change = self.changes.recv() => match change {
                    Some(change) => self.handler.handle(change).await,
                    None => return,
                },
            }
        }
    }
}

// === impl Handler ===

impl Handler {
    pub fn new(pods: Arc<dyn Objects<Pod>>, emitter: Arc<dyn Emit>, metrics: RouteMetrics) -> Self {
        Self {
            pods,
            emitter,
            metrics,
        }
    }

    pub async fn handle(&self, change: Change) {
        let handler = change.handler();
        let res = match change {
            Change::RouteSet { workload, old } => self.route_set_changed(&workload, &old).await,
            Change::InstanceCount { workload, old } => Ok(self.instance_count_changed(&workload, old)),
            Change::Deleted { workload } => self.deleted(&workload).await,
            Change::Readiness {
                workload,
                pod,
                ready,
            } => self.readiness_changed(&workload, &pod, ready),
        };
        match res {
            Ok(emitted) => debug!(handler, emitted, "Handled route change"),
            Err(error) => {
                warn!(handler, %error, "Route handler failed");
                self.metrics.handler_error(handler);
            }
        }
    }

    /// Registers added routes on ready pods and unregisters removed routes on
    /// every pod.
    pub async fn route_set_changed(
        &self,
        workload: &Workload,
        old: &BTreeSet<Route>,
    ) -> Result<usize, Error> {
        let added = workload.routes.difference(old).cloned().collect();
        let removed = old.difference(&workload.routes).cloned().collect();
        let groups = Routes::group_by_port(&added, &removed);
        if groups.is_empty() {
            return Ok(0);
        }

        let pods = self.pods(workload).await?;
        let mut emitted = 0;
        for pod in &pods {
            emitted += self.emit_for_pod(pod, &groups);
        }
        Ok(emitted)
    }

    /// Unregisters every declared route from the instances removed by a
    /// scale-down.
    ///
    /// Removed pods may already be gone, so their references are synthesized
    /// from the workload name and ordinal.
    pub fn instance_count_changed(&self, workload: &Workload, old: u32) -> usize {
        let groups = Routes::group_by_port(&BTreeSet::new(), &workload.routes);
        self.emit_all((workload.replicas..old).flat_map(|index| {
            let instance_id = format!("{}-{index}", workload.name);
            message::unregister(&instance_id, &workload.guid, "", &groups)
        }))
    }

    /// Unregisters every declared route from each pod still listed for a
    /// deleted workload.
    pub async fn deleted(&self, workload: &Workload) -> Result<usize, Error> {
        let groups = Routes::group_by_port(&BTreeSet::new(), &workload.routes);
        if groups.is_empty() {
            return Ok(0);
        }
        let pods = self.pods(workload).await?;
        Ok(pods
            .iter()
            .map(|pod| self.emit_for_pod(pod, &groups))
            .sum())
    }

    /// Registers a newly ready pod's routes, or unregisters them when the pod
    /// stops being ready.
    pub fn readiness_changed(
        &self,
        workload: &Workload,
        pod: &Pod,
        ready: bool,
    ) -> Result<usize, Error> {
        let none = BTreeSet::new();
        let groups = if ready {
            Routes::group_by_port(&workload.routes, &none)
        } else {
            Routes::group_by_port(&none, &workload.routes)
        };
        if groups.is_empty() {
            return Ok(0);
        }
        let messages = message::for_pod(pod, &groups)?;
        Ok(self.emit_all(messages))
    }

    async fn pods(&self, workload: &Workload) -> Result<Vec<Pod>, Error> {
        self.pods
            .list(&ListParams::default().labels(&workload.selector))
            .await
            .map_err(|source| Error::Store {
                context: "failed to list pods",
                source,
            })
    }

    fn emit_for_pod(&self, pod: &Pod, groups: &BTreeMap<u32, Routes>) -> usize {
        match message::for_pod(pod, groups) {
            Ok(messages) => self.emit_all(messages),
            Err(error) => {
                debug!(%error, "Skipping pod");
                0
            }
        }
    }

    fn emit_all(&self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut emitted = 0;
        for message in messages {
            self.emitter.emit(message);
            emitted += 1;
        }
        emitted
    }
}
