use crate::{
    k8s::{labels, Pod, ResourceExt},
    Error,
};
use lrp_controller_core::{Message, Routes};
use std::collections::BTreeMap;

pub(crate) fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// The registry name for a pod's instances: its process GUID label.
pub(crate) fn pod_guid(pod: &Pod) -> String {
    pod.labels().get(labels::GUID).cloned().unwrap_or_default()
}

/// Builds one message per port for a live pod.
///
/// Registrations are withheld unless the pod is ready; unregistrations are
/// always carried. Ports left with nothing to send are omitted.
pub(crate) fn for_pod(pod: &Pod, routes: &BTreeMap<u32, Routes>) -> Result<Vec<Message>, Error> {
    let instance_id = pod.name_any();
    let address = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| Error::MissingAddress(instance_id.clone()))?;
    let ready = is_ready(pod);
    let name = pod_guid(pod);

    let messages = routes
        .iter()
        .map(|(port, routes)| Message {
            instance_id: instance_id.clone(),
            name: name.clone(),
            address: address.clone(),
            port: *port,
            tls_port: 0,
            routes: Routes {
                registered_routes: if ready {
                    routes.registered_routes.clone()
                } else {
                    vec![]
                },
                unregistered_routes: routes.unregistered_routes.clone(),
            },
        })
        .filter(|m| !m.routes.is_empty())
        .collect::<Vec<_>>();

    if messages.is_empty() {
        return Err(Error::NoRoutes(instance_id));
    }
    Ok(messages)
}

/// Builds unregister-only messages for an instance that can no longer be
/// observed.
///
/// An empty `address` marks an instance synthesized from a workload ordinal
/// rather than read from a live pod. Such messages are still emitted;
/// [`for_pod`] only rejects live pods that have no address yet.
pub(crate) fn unregister(
    instance_id: &str,
    name: &str,
    address: &str,
    routes: &BTreeMap<u32, Routes>,
) -> Vec<Message> {
    routes
        .iter()
        .filter(|(_, r)| !r.unregistered_routes.is_empty())
        .map(|(port, r)| Message {
            instance_id: instance_id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            port: *port,
            tls_port: 0,
            routes: Routes {
                registered_routes: vec![],
                unregistered_routes: r.unregistered_routes.clone(),
            },
        })
        .collect()
}

/// The name of the stateful set that owns `pod`, if any.
pub(crate) fn owner(pod: &Pod) -> Option<String> {
    pod.owner_references()
        .iter()
        .find(|o| o.kind == "StatefulSet")
        .map(|o| o.name.clone())
}
