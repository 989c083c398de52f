#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod collector;
mod emitter;
mod handlers;
mod index;
mod message;
mod metrics;


pub use self::{
    collector::Collector,
    emitter::QueueEmitter,
    handlers::{Controller, Handler},
    index::{Change, Index, SharedIndex, Workload},
    metrics::RouteMetrics,
};
use lrp_controller_core::DecodeError;
use lrp_controller_k8s_api as k8s;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid route annotation on {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error("pod {0} has no address")]
    MissingAddress(String),

    #[error("pod {0} has no routes to emit")]
    NoRoutes(String),

    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: k8s::Error,
    },
}
