//! Derives per-replica status from pods and their events.

use crate::k8s::{ContainerStatus, Event, Pod, ResourceExt, Time};
use lrp_controller_core::{Instance, InstanceState, PlacementError};

/// An event with this reason means the pod is being torn down.
const KILLING_REASON: &str = "Killing";

/// Scheduling failures, with and without a cluster autoscaler present.
const SCHEDULING_FAILURE_REASONS: &[&str] = &["FailedScheduling", "NotTriggerScaleUp"];
const INSUFFICIENT_MEMORY: &str = "Insufficient memory";

/// Builds an instance for `pod`, or `None` when its events show it is being
/// killed.
pub(crate) fn instance(pod: &Pod, events: &[Event]) -> Option<Instance> {
    if events
        .iter()
        .any(|e| e.reason.as_deref() == Some(KILLING_REASON))
    {
        return None;
    }

    Some(Instance {
        index: index(&pod.name_any()),
        since: since(pod),
        state: state(pod),
        placement_error: placement_error(events),
    })
}

fn index(name: &str) -> u32 {
    name.rsplit_once('-')
        .and_then(|(_, ordinal)| ordinal.parse().ok())
        .unwrap_or(0)
}

fn since(pod: &Pod) -> i64 {
    pod.status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .map(nanos)
        .unwrap_or(0)
}

fn nanos(time: &Time) -> i64 {
    time.0.timestamp_nanos_opt().unwrap_or(0)
}

fn state(pod: &Pod) -> InstanceState {
    let Some(status) = pod.status.as_ref() else {
        return InstanceState::Unknown;
    };
    let containers = status.container_statuses.as_deref().unwrap_or_default();
    if status.phase.as_deref() == Some("Unknown") {
        return InstanceState::Unknown;
    }
    if status.phase.as_deref() == Some("Failed") || containers.iter().any(crashed) {
        return InstanceState::Crashed;
    }
    if !containers.is_empty() && containers.iter().all(|c| c.ready) {
        return InstanceState::Running;
    }
    if status.phase.as_deref() == Some("Pending") || !containers.is_empty() {
        return InstanceState::Claimed;
    }
    InstanceState::Unknown
}

fn crashed(status: &ContainerStatus) -> bool {
    let Some(state) = status.state.as_ref() else {
        return false;
    };
    state.terminated.is_some()
        || state
            .waiting
            .as_ref()
            .and_then(|w| w.reason.as_deref())
            .is_some_and(|r| r == "CrashLoopBackOff")
}

fn placement_error(events: &[Event]) -> Option<PlacementError> {
    events
        .iter()
        .any(|e| {
            e.reason
                .as_deref()
                .is_some_and(|r| SCHEDULING_FAILURE_REASONS.contains(&r))
                && e.message
                    .as_deref()
                    .is_some_and(|m| m.contains(INSUFFICIENT_MEMORY))
        })
        .then_some(PlacementError::InsufficientMemory)
}
