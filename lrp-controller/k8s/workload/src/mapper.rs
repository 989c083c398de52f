//! Translation between LRP records and stateful sets.

use crate::k8s::{
    api::core::v1::{
        Affinity, EnvVarSource, HTTPGetAction, LocalObjectReference, ObjectFieldSelector,
        PersistentVolumeClaimVolumeSource, PodAffinityTerm, PodAntiAffinity, PodSecurityContext,
        Probe, ResourceRequirements, SeccompProfile, SecurityContext, TCPSocketAction, Volume,
        WeightedPodAffinityTerm,
    },
    labels::{self, annotations, Map},
    Container, ContainerPort, EnvVar, IntOrString, LabelSelector, LabelSelectorRequirement,
    ObjectMeta, PodSpec, PodTemplateSpec, Quantity, ResourceExt, Secret, StatefulSet,
    StatefulSetSpec,
};
use base64::Engine as _;
use lrp_controller_core::{
    Healthcheck, HealthcheckKind, Lrp, LrpIdentifier, PrivateRegistry, VolumeMount,
};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::LazyLock};

pub const CONTAINER_NAME: &str = "opi";
pub const REGISTRY_SECRET_SUFFIX: &str = "registry-credentials";
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

const RUN_AS_USER: i64 = 2000;
const ANTI_AFFINITY_WEIGHT: i32 = 100;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const LIVENESS_FAILURE_THRESHOLD: i32 = 4;
const READINESS_FAILURE_THRESHOLD: i32 = 1;

const NAME_MAX_LEN: usize = 40;
const SUFFIX_LEN: usize = 10;

static VALID_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+([-.][a-z0-9]+)*$").expect("name pattern must compile")
});

/// Produces the suffix that makes workload names unique per identifier.
pub trait Hasher: Send + Sync {
    fn hash(&self, input: &str) -> String;
}

/// Hex-encoded SHA-256, truncated to ten characters.
#[derive(Copy, Clone, Debug, Default)]
pub struct Sha256Hasher;

/// Stateless LRP <-> StatefulSet mapping, parameterized by cluster-wide settings.
#[derive(Clone, Debug, Default)]
pub struct Mapper {
    registry_secret_name: String,
    rootfs_version: String,
}

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

// === impl Sha256Hasher ===

impl Hasher for Sha256Hasher {
    fn hash(&self, input: &str) -> String {
        let mut digest = hex::encode(Sha256::digest(input.as_bytes()));
        digest.truncate(SUFFIX_LEN);
        digest
    }
}

// === impl Mapper ===

impl Mapper {
    pub fn new(registry_secret_name: impl Into<String>, rootfs_version: impl Into<String>) -> Self {
        Self {
            registry_secret_name: registry_secret_name.into(),
            rootfs_version: rootfs_version.into(),
        }
    }

    /// The image-pull secret shared by every workload.
    pub fn registry_secret_name(&self) -> &str {
        &self.registry_secret_name
    }

    pub fn to_stateful_set(&self, lrp: &Lrp, name: &str) -> StatefulSet {
        let selector = selector_labels(&lrp.id);

        let mut object_labels = selector.clone();
        object_labels.insert(labels::APP_GUID.to_string(), lrp.app_guid.clone());
        object_labels.insert(labels::PROCESS_TYPE.to_string(), lrp.process_type.clone());
        object_labels.insert(labels::ROOTFS_VERSION.to_string(), self.rootfs_version.clone());

        let managed = managed_annotations(lrp);
        let mut template_annotations = lrp.user_defined_annotations.clone();
        template_annotations.extend(managed.clone());

        let mut image_pull_secrets = Vec::new();
        if !self.registry_secret_name.is_empty() {
            image_pull_secrets.push(LocalObjectReference {
                name: self.registry_secret_name.clone(),
            });
        }
        if lrp.private_registry.is_some() {
            image_pull_secrets.push(LocalObjectReference {
                name: private_registry_secret_name(name),
            });
        }

        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(object_labels.clone()),
                annotations: Some(managed),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(to_i32(lrp.target_instances)),
                pod_management_policy: Some("Parallel".to_string()),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(object_labels),
                        annotations: Some(template_annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container(lrp)],
                        image_pull_secrets: Some(image_pull_secrets),
                        security_context: Some(PodSecurityContext {
                            run_as_non_root: Some(true),
                            run_as_user: Some(RUN_AS_USER),
                            seccomp_profile: Some(SeccompProfile {
                                type_: "RuntimeDefault".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        affinity: Some(anti_affinity(&selector)),
                        volumes: volumes(&lrp.volume_mounts),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Builds the per-workload pull secret for a private registry.
    pub fn private_registry_secret(&self, workload: &str, registry: &PrivateRegistry) -> Secret {
        let credentials = format!("{}:{}", registry.username, registry.password);
        let config = DockerConfig {
            auths: std::iter::once((
                registry.server.as_str(),
                DockerAuth {
                    username: &registry.username,
                    password: &registry.password,
                    auth: base64::engine::general_purpose::STANDARD.encode(credentials),
                },
            ))
            .collect(),
        };
        // Serializing string-keyed maps and plain structs cannot fail.
        let config = serde_json::to_string(&config).unwrap_or_default();

        Secret {
            metadata: ObjectMeta {
                name: Some(private_registry_secret_name(workload)),
                ..Default::default()
            },
            type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
            string_data: Some(std::iter::once((DOCKER_CONFIG_JSON_KEY.to_string(), config)).collect()),
            ..Default::default()
        }
    }
}

/// Recovers the LRP record from a stateful set.
///
/// Private registry credentials are not recoverable and are always `None`.
pub fn to_lrp(sts: &StatefulSet) -> Lrp {
    let sts_labels = sts.labels();
    let sts_annotations = sts.annotations();
    let label = |key: &str| sts_labels.get(key).cloned().unwrap_or_default();
    let annotation = |key: &str| sts_annotations.get(key).cloned().unwrap_or_default();

    let spec = sts.spec.as_ref();
    let template = spec.map(|s| &s.template);
    let container = template
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| {
            s.containers
                .iter()
                .find(|c| c.name == CONTAINER_NAME)
                .or_else(|| s.containers.first())
        });

    let version = sts_annotations
        .get(annotations::VERSION)
        .or_else(|| sts_labels.get(labels::VERSION))
        .cloned()
        .unwrap_or_default();

    let user_defined_annotations = template
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref())
        .map(|a| {
            a.iter()
                .filter(|(k, _)| !annotations::MANAGED.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut lrp = Lrp {
        id: LrpIdentifier::new(label(labels::GUID), version),
        process_type: label(labels::PROCESS_TYPE),
        app_name: annotation(annotations::APP_NAME),
        app_guid: annotation(annotations::APP_ID),
        space_name: annotation(annotations::SPACE_NAME),
        space_guid: annotation(annotations::SPACE_GUID),
        org_name: annotation(annotations::ORG_NAME),
        org_guid: annotation(annotations::ORG_GUID),
        target_instances: spec.and_then(|s| s.replicas).map(to_u32).unwrap_or(0),
        running_instances: sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .map(to_u32)
            .unwrap_or(0),
        app_uris: annotation(annotations::APP_URIS),
        last_updated: annotation(annotations::LAST_UPDATED),
        user_defined_annotations,
        lrp: annotation(annotations::ORIGINAL_REQUEST),
        ..Default::default()
    };

    if let Some(container) = container {
        lrp.image = container.image.clone().unwrap_or_default();
        lrp.command = container.command.clone().unwrap_or_default();
        lrp.ports = container
            .ports
            .iter()
            .flatten()
            .filter_map(|p| u16::try_from(p.container_port).ok())
            .collect();
        if let Some(resources) = &container.resources {
            lrp.memory_mb = resources
                .requests
                .as_ref()
                .and_then(|r| r.get("memory"))
                .map(megabytes)
                .unwrap_or(0);
            lrp.disk_mb = resources
                .limits
                .as_ref()
                .and_then(|l| l.get("ephemeral-storage"))
                .map(megabytes)
                .unwrap_or(0);
        }
        lrp.env = container
            .env
            .iter()
            .flatten()
            .filter_map(|e| Some((e.name.clone(), e.value.clone()?)))
            .collect();
        lrp.volume_mounts = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| VolumeMount {
                claim_name: m.name.clone(),
                mount_path: m.mount_path.clone(),
            })
            .collect();
        lrp.health = container
            .readiness_probe
            .as_ref()
            .map(healthcheck)
            .unwrap_or_default();
    }

    lrp
}

/// Names the workload for an LRP: a sanitized `app-space` prefix (or the raw
/// GUID) and a hashed suffix.
pub fn workload_name(lrp: &Lrp, hasher: &dyn Hasher) -> String {
    let prefix = sanitize(&format!("{}-{}", lrp.app_name, lrp.space_name))
        .unwrap_or_else(|| lrp.id.guid.chars().take(NAME_MAX_LEN).collect());
    let suffix = hasher.hash(&lrp.id.process_guid());
    format!("{prefix}-{suffix}")
}

pub fn private_registry_secret_name(workload: &str) -> String {
    format!("{workload}-{REGISTRY_SECRET_SUFFIX}")
}

/// The `{guid, version, source_type}` labels selecting a workload's pods.
pub fn selector_labels(id: &LrpIdentifier) -> Map {
    [
        (labels::GUID, id.guid.as_str()),
        (labels::VERSION, id.version.as_str()),
        (labels::SOURCE_TYPE, labels::APP_SOURCE_TYPE),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn sanitize(name: &str) -> Option<String> {
    let name = name.to_lowercase().replace('_', "-");
    if !VALID_NAME.is_match(&name) {
        return None;
    }
    let truncated: String = name.chars().take(NAME_MAX_LEN).collect();
    Some(truncated.trim_end_matches(['-', '.']).to_string())
}

fn managed_annotations(lrp: &Lrp) -> Map {
    [
        (annotations::PROCESS_GUID, lrp.id.process_guid()),
        (annotations::VERSION, lrp.id.version.clone()),
        (annotations::APP_URIS, lrp.app_uris.clone()),
        (annotations::REGISTERED_ROUTES, lrp.app_uris.clone()),
        (annotations::APP_NAME, lrp.app_name.clone()),
        (annotations::APP_ID, lrp.app_guid.clone()),
        (annotations::ORIGINAL_REQUEST, lrp.lrp.clone()),
        (annotations::SPACE_NAME, lrp.space_name.clone()),
        (annotations::SPACE_GUID, lrp.space_guid.clone()),
        (annotations::ORG_NAME, lrp.org_name.clone()),
        (annotations::ORG_GUID, lrp.org_guid.clone()),
        (annotations::LAST_UPDATED, lrp.last_updated.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn container(lrp: &Lrp) -> Container {
    let mut env = lrp
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect::<Vec<_>>();
    env.extend([
        field_ref("POD_NAME", "metadata.name"),
        field_ref("CF_INSTANCE_IP", "status.podIP"),
        field_ref("CF_INSTANCE_INTERNAL_IP", "status.podIP"),
    ]);

    let volume_mounts = lrp
        .volume_mounts
        .iter()
        .map(|m| crate::k8s::api::core::v1::VolumeMount {
            name: m.claim_name.clone(),
            mount_path: m.mount_path.clone(),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(lrp.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(lrp.command.clone()),
        env: Some(env),
        ports: Some(
            lrp.ports
                .iter()
                .map(|p| ContainerPort {
                    container_port: i32::from(*p),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: Some(ResourceRequirements {
            requests: Some(
                std::iter::once((
                    "memory".to_string(),
                    Quantity(format!("{}M", lrp.memory_mb)),
                ))
                .collect(),
            ),
            limits: Some(
                std::iter::once((
                    "ephemeral-storage".to_string(),
                    Quantity(format!("{}M", lrp.disk_mb)),
                ))
                .collect(),
            ),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        liveness_probe: probe(&lrp.health, LIVENESS_FAILURE_THRESHOLD),
        readiness_probe: probe(&lrp.health, READINESS_FAILURE_THRESHOLD),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    }
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

fn probe(health: &Healthcheck, failure_threshold: i32) -> Option<Probe> {
    let port = IntOrString::Int(i32::from(health.port));
    let mut probe = Probe {
        timeout_seconds: Some(timeout_seconds(health.timeout_ms)),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    };
    match health.kind {
        HealthcheckKind::None => return None,
        HealthcheckKind::Http => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(health.endpoint.clone()),
                port,
                ..Default::default()
            })
        }
        HealthcheckKind::Port => {
            probe.tcp_socket = Some(TCPSocketAction {
                port,
                ..Default::default()
            })
        }
    }
    Some(probe)
}

fn healthcheck(probe: &Probe) -> Healthcheck {
    let port = |p: &IntOrString| match p {
        IntOrString::Int(p) => u16::try_from(*p).unwrap_or(0),
        IntOrString::String(_) => 0,
    };
    let timeout_ms = probe
        .timeout_seconds
        .and_then(|s| u32::try_from(s).ok())
        .map(|s| s.saturating_mul(1000))
        .unwrap_or(0);
    if let Some(get) = &probe.http_get {
        return Healthcheck {
            kind: HealthcheckKind::Http,
            port: port(&get.port),
            endpoint: get.path.clone().unwrap_or_default(),
            timeout_ms,
        };
    }
    if let Some(tcp) = &probe.tcp_socket {
        return Healthcheck {
            kind: HealthcheckKind::Port,
            port: port(&tcp.port),
            endpoint: String::new(),
            timeout_ms,
        };
    }
    Healthcheck::default()
}

fn timeout_seconds(timeout_ms: u32) -> i32 {
    let secs = timeout_ms.div_ceil(1000).max(1);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

fn anti_affinity(selector: &Map) -> Affinity {
    let match_expressions = selector
        .iter()
        .map(|(key, value)| LabelSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: ANTI_AFFINITY_WEIGHT,
                    pod_affinity_term: PodAffinityTerm {
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(match_expressions),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volumes(mounts: &[VolumeMount]) -> Option<Vec<Volume>> {
    if mounts.is_empty() {
        return None;
    }
    Some(
        mounts
            .iter()
            .map(|m| Volume {
                name: m.claim_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: m.claim_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
    )
}

/// Reads a quantity as decimal megabytes.
fn megabytes(quantity: &Quantity) -> u64 {
    const UNITS: &[(&str, f64)] = &[
        ("Ki", 1024.0 / 1e6),
        ("Mi", 1_048_576.0 / 1e6),
        ("Gi", 1_073_741_824.0 / 1e6),
        ("k", 1e-3),
        ("M", 1.0),
        ("G", 1e3),
    ];
    let q = quantity.0.trim();
    let (number, scale) = UNITS
        .iter()
        .find_map(|(suffix, scale)| Some((q.strip_suffix(suffix)?, *scale)))
        .unwrap_or((q, 1e-6));
    number
        .parse::<f64>()
        .map(|n| (n * scale).round() as u64)
        .unwrap_or(0)
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}
