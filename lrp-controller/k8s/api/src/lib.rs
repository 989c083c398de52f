#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use self::store::{Clients, Error, Objects, Result};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus},
        core::v1::{
            Container, ContainerPort, ContainerState, ContainerStatus, EnvVar, Event, Pod,
            PodCondition, PodSpec, PodStatus, PodTemplateSpec, Secret,
        },
        policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement, OwnerReference, Time},
        util::intstr::IntOrString,
    },
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Resource, ResourceExt},
    runtime::watcher,
    Client,
};
