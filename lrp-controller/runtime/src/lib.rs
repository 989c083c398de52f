#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use lrp_controller_core as core;
pub use lrp_controller_k8s_api as k8s;
pub use lrp_controller_k8s_routes as routes;
pub use lrp_controller_k8s_workload as workload;

mod api;
mod args;
mod publisher;
mod scheduler;

pub use self::{
    api::LrpApi,
    args::Args,
    publisher::{LogRegistry, Publisher, RouteRegistry},
    scheduler::Scheduler,
};
