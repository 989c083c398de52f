#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod instance;
pub mod lrp;
pub mod route;

pub use self::{
    instance::{Instance, InstanceState, PlacementError},
    lrp::{Healthcheck, HealthcheckKind, Lrp, LrpIdentifier, PrivateRegistry, VolumeMount},
    route::{DecodeError, Emit, Message, Route, Routes},
};
