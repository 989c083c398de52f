//! An in-memory backing store for tests.
//!
//! Each kind is held by a [`FakeObjects`], which honors label and field
//! selectors, enforces create/replace/delete existence rules, detects stale
//! resource versions, and replays scripted failures per operation.

use crate::{
    Clients, Error, Event, Objects, Pod, PodDisruptionBudget, Result, Secret, StatefulSet,
};
use kube::{api::ListParams, error::ErrorResponse, Resource, ResourceExt};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Create,
    Replace,
    Delete,
}

/// Resolves field-selector paths against an object.
pub trait Fields {
    fn field(&self, path: &str) -> Option<String>;
}

pub struct FakeObjects<K> {
    state: Mutex<State<K>>,
}

struct State<K> {
    objects: Vec<K>,
    failures: HashMap<Op, VecDeque<Error>>,
    calls: HashMap<Op, usize>,
    created: Vec<K>,
    replaced: Vec<K>,
    deleted: Vec<String>,
    list_params: Vec<ListParams>,
    next_version: u64,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    pub stateful_sets: Arc<FakeObjects<StatefulSet>>,
    pub pods: Arc<FakeObjects<Pod>>,
    pub secrets: Arc<FakeObjects<Secret>>,
    pub disruption_budgets: Arc<FakeObjects<PodDisruptionBudget>>,
    pub events: Arc<FakeObjects<Event>>,
}

pub fn conflict() -> Error {
    Error::Conflict("the object has been modified; please apply your changes".to_string())
}

pub fn upstream(message: &str) -> Error {
    Error::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

// === impl FakeCluster ===

impl FakeCluster {
    pub fn clients(&self) -> Clients {
        Clients {
            stateful_sets: self.stateful_sets.clone(),
            pods: self.pods.clone(),
            secrets: self.secrets.clone(),
            disruption_budgets: self.disruption_budgets.clone(),
            events: self.events.clone(),
        }
    }
}

// === impl FakeObjects ===

impl<K> Default for FakeObjects<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: Vec::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                created: Vec::new(),
                replaced: Vec::new(),
                deleted: Vec::new(),
                list_params: Vec::new(),
                next_version: 1,
            }),
        }
    }
}

impl<K> FakeObjects<K>
where
    K: Resource + Clone,
{
    /// Stores an object as-is, bypassing scripted failures and call accounting.
    pub fn insert(&self, mut object: K) {
        let mut state = self.state.lock();
        if object.meta().resource_version.is_none() {
            object.meta_mut().resource_version = Some(state.bump());
        }
        let name = object.name_any();
        state.objects.retain(|o| o.name_any() != name);
        state.objects.push(object);
    }

    pub fn get(&self, name: &str) -> Option<K> {
        self.state
            .lock()
            .objects
            .iter()
            .find(|o| o.name_any() == name)
            .cloned()
    }

    pub fn objects(&self) -> Vec<K> {
        self.state.lock().objects.clone()
    }

    /// Queues an error returned by the next call of `op`.
    pub fn fail_next(&self, op: Op, error: Error) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fails every call of `op` with errors produced by `error`.
    pub fn fail_always(&self, op: Op, error: impl Fn() -> Error) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..64 {
            queue.push_back(error());
        }
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn created(&self) -> Vec<K> {
        self.state.lock().created.clone()
    }

    pub fn replaced(&self) -> Vec<K> {
        self.state.lock().replaced.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn list_params(&self) -> Vec<ListParams> {
        self.state.lock().list_params.clone()
    }
}

impl<K> State<K> {
    fn bump(&mut self) -> String {
        let version = self.next_version;
        self.next_version += 1;
        version.to_string()
    }

    fn call(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl<K> Objects<K> for FakeObjects<K>
where
    K: Resource + Fields + Clone + Send + Sync + 'static,
{
    async fn list(&self, params: &ListParams) -> Result<Vec<K>> {
        let mut state = self.state.lock();
        state.list_params.push(params.clone());
        state.call(Op::List)?;
        let labels = params.label_selector.as_deref().unwrap_or_default();
        let fields = params.field_selector.as_deref().unwrap_or_default();
        Ok(state
            .objects
            .iter()
            .filter(|o| match o.meta().labels.as_ref() {
                Some(map) => crate::labels::matches(labels, map),
                None => crate::labels::matches(labels, &Default::default()),
            })
            .filter(|o| matches_fields(*o, fields))
            .cloned()
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K> {
        let mut state = self.state.lock();
        state.call(Op::Create)?;
        let name = object.name_any();
        if state.objects.iter().any(|o| o.name_any() == name) {
            return Err(Error::AlreadyExists(name));
        }
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(state.bump());
        state.created.push(object.clone());
        state.objects.push(object.clone());
        Ok(object)
    }

    async fn replace(&self, object: &K) -> Result<K> {
        let mut state = self.state.lock();
        state.replaced.push(object.clone());
        state.call(Op::Replace)?;
        let name = object.name_any();
        let version = object.meta().resource_version.clone();
        let position = state
            .objects
            .iter()
            .position(|o| o.name_any() == name)
            .ok_or_else(|| Error::NotFound(name.clone()))?;
        if version.is_some() && state.objects[position].meta().resource_version != version {
            return Err(Error::Conflict(name));
        }
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(state.bump());
        state.objects[position] = object.clone();
        Ok(object)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.deleted.push(name.to_string());
        state.call(Op::Delete)?;
        let before = state.objects.len();
        state.objects.retain(|o| o.name_any() != name);
        if state.objects.len() == before {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(())
    }
}

fn matches_fields<K: Fields>(object: &K, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((path, value)) => object.field(path).as_deref() == Some(value),
            None => false,
        })
}

macro_rules! metadata_fields {
    ($($kind:ty),+) => {
        $(
            impl Fields for $kind {
                fn field(&self, path: &str) -> Option<String> {
                    match path {
                        "metadata.name" => self.metadata.name.clone(),
                        "metadata.namespace" => self.metadata.namespace.clone(),
                        _ => None,
                    }
                }
            }
        )+
    };
}

metadata_fields!(StatefulSet, Pod, Secret, PodDisruptionBudget);

impl Fields for Event {
    fn field(&self, path: &str) -> Option<String> {
        match path {
            "involvedObject.name" => self.involved_object.name.clone(),
            "involvedObject.namespace" => self.involved_object.namespace.clone(),
            "involvedObject.kind" => self.involved_object.kind.clone(),
            "reason" => self.reason.clone(),
            _ => None,
        }
    }
}
