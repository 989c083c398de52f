use crate::{Event, Pod, PodDisruptionBudget, Secret, StatefulSet};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, sync::Arc};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Backing store failures, classified by how callers must react to them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency violation; the caller should re-read and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Api(kube::Error),
}

/// Object CRUD for a single resource kind within a namespace.
#[async_trait::async_trait]
pub trait Objects<K>: Send + Sync {
    async fn list(&self, params: &ListParams) -> Result<Vec<K>>;

    async fn create(&self, object: &K) -> Result<K>;

    /// Replaces an existing object. The object's resource version guards the write.
    async fn replace(&self, object: &K) -> Result<K>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Handles for every kind the controller reads or writes, scoped to one namespace.
#[derive(Clone)]
pub struct Clients {
    pub stateful_sets: Arc<dyn Objects<StatefulSet>>,
    pub pods: Arc<dyn Objects<Pod>>,
    pub secrets: Arc<dyn Objects<Secret>>,
    pub disruption_budgets: Arc<dyn Objects<PodDisruptionBudget>>,
    pub events: Arc<dyn Objects<Event>>,
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(rsp) if rsp.code == 404 => Self::NotFound(rsp.message),
            kube::Error::Api(rsp) if rsp.reason == "AlreadyExists" => {
                Self::AlreadyExists(rsp.message)
            }
            kube::Error::Api(rsp) if rsp.code == 409 => Self::Conflict(rsp.message),
            error => Self::Api(error),
        }
    }
}

// === impl Clients ===

impl Clients {
    pub fn namespaced(client: kube::Client, ns: &str) -> Self {
        Self {
            stateful_sets: Arc::new(Api::<StatefulSet>::namespaced(client.clone(), ns)),
            pods: Arc::new(Api::<Pod>::namespaced(client.clone(), ns)),
            secrets: Arc::new(Api::<Secret>::namespaced(client.clone(), ns)),
            disruption_budgets: Arc::new(Api::<PodDisruptionBudget>::namespaced(
                client.clone(),
                ns,
            )),
            events: Arc::new(Api::<Event>::namespaced(client, ns)),
        }
    }
}

#[async_trait::async_trait]
impl<K> Objects<K> for Api<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn list(&self, params: &ListParams) -> Result<Vec<K>> {
        let list = Api::list(self, params).await?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K> {
        Ok(Api::create(self, &PostParams::default(), object).await?)
    }

    async fn replace(&self, object: &K) -> Result<K> {
        let name = object.name_any();
        Ok(Api::replace(self, &name, &PostParams::default(), object).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        Api::delete(self, name, &DeleteParams::background()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(Error::from(api_error(404, "NotFound")).is_not_found());
        assert!(Error::from(api_error(409, "Conflict")).is_conflict());
        assert!(Error::from(api_error(409, "AlreadyExists")).is_already_exists());
        assert!(matches!(
            Error::from(api_error(500, "InternalError")),
            Error::Api(_)
        ));
    }
}
