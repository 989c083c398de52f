use crate::{
    disruption_budget, instances,
    k8s::{
        self,
        labels::{self, annotations},
        Clients, Event, ListParams, Pod, ResourceExt, StatefulSet,
    },
    mapper::{self, selector_labels, Hasher, Mapper, Sha256Hasher},
    Error, Result, RetryPolicy, StoreContext,
};
use lrp_controller_core::{Instance, Lrp, LrpIdentifier};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies LRP records to the cluster and reads them back.
///
/// Every operation reads fresh state from the backing store; a `Reconciler`
/// holds no state of its own and may be shared freely across tasks.
#[derive(Clone)]
pub struct Reconciler {
    clients: Clients,
    mapper: Mapper,
    hasher: Arc<dyn Hasher>,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(clients: Clients, mapper: Mapper) -> Self {
        Self {
            clients,
            mapper,
            hasher: Arc::new(Sha256Hasher),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Creates the workload for a new LRP.
    ///
    /// Fails with [`Error::AlreadyExists`] when a workload with the same name
    /// already exists.
    pub async fn desire(&self, lrp: &Lrp) -> Result<()> {
        // Names derive from the app and space names, which may change while
        // the identifier stays the same.
        if let Some(existing) = self.find(&lrp.id, "failed to list statefulsets").await? {
            return Err(Error::AlreadyExists(k8s::Error::AlreadyExists(
                existing.name_any(),
            )));
        }

        let name = mapper::workload_name(lrp, &*self.hasher);

        if let Some(registry) = &lrp.private_registry {
            let secret = self.mapper.private_registry_secret(&name, registry);
            match self.clients.secrets.create(&secret).await {
                Err(error) if error.is_already_exists() => {
                    debug!(%name, "Registry secret already exists");
                }
                res => {
                    res.context("failed to create private registry secret")?;
                }
            }
        }

        let sts = self.mapper.to_stateful_set(lrp, &name);
        match self.clients.stateful_sets.create(&sts).await {
            Err(error) if error.is_already_exists() => return Err(Error::AlreadyExists(error)),
            res => {
                res.context("failed to create statefulset")?;
            }
        }

        disruption_budget::ensure(
            &*self.clients.disruption_budgets,
            &name,
            &selector_labels(&lrp.id),
            lrp.target_instances,
        )
        .await?;

        info!(%name, id = %lrp.id, instances = lrp.target_instances, "Desired workload");
        Ok(())
    }

    /// Applies the fields that may change after creation: the ordering token,
    /// the declared routes, and the replica count.
    ///
    /// A request carrying the stored `last_updated` token leaves the workload
    /// untouched. The disruption budget is converged either way, so a budget
    /// write that failed after the workload was replaced is repaired by the
    /// next update.
    pub async fn update(&self, lrp: &Lrp) -> Result<()> {
        self.retry
            .on_conflict("failed to update statefulset", || self.try_update(lrp))
            .await
    }

    async fn try_update(&self, lrp: &Lrp) -> Result<()> {
        let mut sts = self
            .find(&lrp.id, "failed to list statefulsets")
            .await?
            .ok_or(Error::AppNotFound)?;
        let name = sts.name_any();

        let stored = sts.annotations().get(annotations::LAST_UPDATED);
        if stored == Some(&lrp.last_updated) {
            debug!(%name, last_updated = %lrp.last_updated, "Workload is up to date");
            return disruption_budget::ensure(
                &*self.clients.disruption_budgets,
                &name,
                &selector_labels(&lrp.id),
                replicas(&sts),
            )
            .await;
        }

        let meta = sts.annotations_mut();
        meta.insert(
            annotations::LAST_UPDATED.to_string(),
            lrp.last_updated.clone(),
        );
        meta.insert(
            annotations::REGISTERED_ROUTES.to_string(),
            lrp.app_uris.clone(),
        );
        meta.insert(annotations::APP_URIS.to_string(), lrp.app_uris.clone());

        let old = replicas(&sts);
        let spec = sts.spec.get_or_insert_with(Default::default);
        spec.replicas = Some(i32::try_from(lrp.target_instances).unwrap_or(i32::MAX));

        self.clients
            .stateful_sets
            .replace(&sts)
            .await
            .context("failed to update statefulset")?;

        disruption_budget::ensure(
            &*self.clients.disruption_budgets,
            &name,
            &selector_labels(&lrp.id),
            lrp.target_instances,
        )
        .await?;

        info!(%name, id = %lrp.id, from = old, to = lrp.target_instances, "Updated workload");
        Ok(())
    }

    /// Deletes the workload and its auxiliary objects. Stopping an unknown
    /// LRP succeeds.
    pub async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        self.retry
            .on_conflict("failed to delete statefulset", || self.try_stop(id))
            .await
    }

    async fn try_stop(&self, id: &LrpIdentifier) -> Result<()> {
        let Some(sts) = self.find(id, "failed to list statefulsets").await? else {
            debug!(%id, "No workload to stop");
            return Ok(());
        };
        let name = sts.name_any();

        for secret in self.private_pull_secrets(&sts) {
            match self.clients.secrets.delete(&secret).await {
                Err(error) if error.is_not_found() => {}
                res => res.context("failed to delete secret")?,
            }
        }

        disruption_budget::delete(&*self.clients.disruption_budgets, &name).await?;

        match self.clients.stateful_sets.delete(&name).await {
            Err(error) if error.is_not_found() => {
                debug!(%name, "Workload already deleted");
            }
            res => res.context("failed to delete statefulset")?,
        }

        info!(%name, %id, "Stopped workload");
        Ok(())
    }

    /// Deletes a single replica's pod. The workload recreates it.
    pub async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        let sts = self
            .find(id, "failed to get statefulset")
            .await?
            .ok_or(Error::AppNotFound)?;
        let pod = format!("{}-{index}", sts.name_any());
        self.clients
            .pods
            .delete(&pod)
            .await
            .context("failed to delete pod")?;
        info!(%pod, %id, "Stopped instance");
        Ok(())
    }

    pub async fn get(&self, id: &LrpIdentifier) -> Result<Lrp> {
        let sts = self
            .find(id, "failed to list statefulsets")
            .await?
            .ok_or(Error::AppNotFound)?;
        Ok(mapper::to_lrp(&sts))
    }

    pub async fn list(&self) -> Result<Vec<Lrp>> {
        let params = ListParams::default().labels(&labels::app_selector());
        let workloads = self
            .clients
            .stateful_sets
            .list(&params)
            .await
            .context("failed to list statefulsets")?;
        Ok(workloads.iter().map(mapper::to_lrp).collect())
    }

    /// Reports the status of each live replica. Replicas being torn down are
    /// omitted.
    pub async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>> {
        let params = ListParams::default().labels(&labels::identifier_selector(&id.guid, &id.version));
        let pods = self
            .clients
            .pods
            .list(&params)
            .await
            .context("failed to list pods")?;

        let mut live = Vec::with_capacity(pods.len());
        for pod in &pods {
            let events = self.events(pod).await?;
            live.extend(instances::instance(pod, &events));
        }
        Ok(live)
    }

    async fn events(&self, pod: &Pod) -> Result<Vec<Event>> {
        let name = pod.name_any();
        let mut fields = format!("involvedObject.name={name}");
        if let Some(ns) = pod.namespace() {
            fields.push_str(&format!(",involvedObject.namespace={ns}"));
        }
        self.clients
            .events
            .list(&ListParams::default().fields(&fields))
            .await
            .context(format!("failed to get events for pod {name}"))
    }

    async fn find(&self, id: &LrpIdentifier, context: &str) -> Result<Option<StatefulSet>> {
        let params = ListParams::default().labels(&labels::identifier_selector(&id.guid, &id.version));
        let workloads = self
            .clients
            .stateful_sets
            .list(&params)
            .await
            .context(context)?;
        Ok(workloads.into_iter().next())
    }

    /// Image-pull secrets owned by a single workload.
    fn private_pull_secrets(&self, sts: &StatefulSet) -> Vec<String> {
        sts.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.image_pull_secrets.as_ref())
            .into_iter()
            .flatten()
            .map(|s| s.name.clone())
            .filter(|name| !name.is_empty() && name != self.mapper.registry_secret_name())
            .collect()
    }
}

/// The stored replica count. Unset replicas default to one on the server.
fn replicas(sts: &StatefulSet) -> u32 {
    sts.spec
        .as_ref()
        .and_then(|s| s.replicas)
        .map(|r| u32::try_from(r).unwrap_or(0))
        .unwrap_or(1)
}
