#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod disruption_budget;
mod instances;
pub mod mapper;
mod reconciler;
mod retry;

#[cfg(test)]
mod tests;

pub use self::{
    disruption_budget::MIN_REPLICAS_FOR_BUDGET,
    mapper::{Hasher, Mapper, Sha256Hasher},
    reconciler::Reconciler,
    retry::RetryPolicy,
};
use lrp_controller_k8s_api as k8s;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No workload matches the identifier.
    #[error("app does not exist")]
    AppNotFound,

    /// A workload already exists for the identifier.
    #[error(transparent)]
    AlreadyExists(k8s::Error),

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: k8s::Error,
    },

    #[error("{context}: still conflicting after {attempts} attempts")]
    Retries {
        context: &'static str,
        attempts: usize,
    },
}

/// Attaches an operation-identifying prefix to backing store errors.
pub(crate) trait StoreContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl Error {
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_conflict())
    }
}

impl<T> StoreContext<T> for k8s::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Store {
            context: context.into(),
            source,
        })
    }
}
