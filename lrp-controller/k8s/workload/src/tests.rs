use crate::{
    k8s::{
        api::core::v1::ObjectReference,
        fake::{self, FakeCluster, Op},
        labels::{self, annotations},
        ContainerStatus, Event, IntOrString, ObjectMeta, Pod, PodStatus, ResourceExt, Time,
    },
    Error, Hasher, Mapper, Reconciler, RetryPolicy,
};
use lrp_controller_core::{InstanceState, Lrp, LrpIdentifier, PlacementError, PrivateRegistry};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Fixed;

impl Hasher for Fixed {
    fn hash(&self, _: &str) -> String {
        "random".to_string()
    }
}

const NAME: &str = "baldur-space-foo-random";

fn id() -> LrpIdentifier {
    LrpIdentifier::new("guid_1234", "version_1234")
}

fn lrp(instances: u32, last_updated: &str) -> Lrp {
    Lrp {
        id: id(),
        app_name: "baldur".to_string(),
        space_name: "space-foo".to_string(),
        image: "busybox".to_string(),
        ports: vec![8080],
        target_instances: instances,
        app_uris: r#"[{"hostname":"foo.example.com","port":8080}]"#.to_string(),
        last_updated: last_updated.to_string(),
        ..Default::default()
    }
}

fn reconciler(cluster: &FakeCluster) -> Reconciler {
    Reconciler::new(cluster.clients(), Mapper::new("registry-secret", "cflinuxfs3"))
        .with_hasher(Arc::new(Fixed))
}

fn replicas(cluster: &FakeCluster) -> Option<i32> {
    cluster
        .stateful_sets
        .get(NAME)
        .and_then(|sts| sts.spec)
        .and_then(|spec| spec.replicas)
}

fn has_budget(cluster: &FakeCluster) -> bool {
    cluster.disruption_budgets.get(NAME).is_some()
}

fn pod(name: &str, ready: bool) -> Pod {
    let id = id();
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("apps".to_string()),
            labels: Some(crate::mapper::selector_labels(&id)),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
            container_statuses: ready.then(|| {
                vec![ContainerStatus {
                    name: "opi".to_string(),
                    ready: true,
                    ..Default::default()
                }]
            }),
            start_time: Some(Time(
                chrono::DateTime::from_timestamp(123, 0).expect("valid timestamp"),
            )),
            ..Default::default()
        }),
    }
}

fn event(pod: &str, reason: &str, message: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{pod}.{reason}")),
            namespace: Some("apps".to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(pod.to_string()),
            namespace: Some("apps".to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn budget_follows_the_instance_threshold() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);

    reconciler.desire(&lrp(1, "1")).await.expect("desire");
    assert!(!has_budget(&cluster));

    reconciler.update(&lrp(2, "2")).await.expect("scale up");
    let pdb = cluster.disruption_budgets.get(NAME).expect("budget");
    let spec = pdb.spec.expect("spec");
    assert_eq!(spec.min_available, Some(IntOrString::Int(1)));
    assert_eq!(
        spec.selector.and_then(|s| s.match_labels),
        Some(crate::mapper::selector_labels(&id()))
    );

    reconciler.update(&lrp(1, "3")).await.expect("scale down");
    assert!(!has_budget(&cluster));
    assert_eq!(replicas(&cluster), Some(1));
}

#[tokio::test]
async fn desire_creates_a_budget_for_replicated_workloads() {
    let cluster = FakeCluster::default();
    reconciler(&cluster)
        .desire(&lrp(3, "1"))
        .await
        .expect("desire");
    assert!(has_budget(&cluster));
    assert_eq!(replicas(&cluster), Some(3));
}

#[tokio::test]
async fn desire_surfaces_existing_workloads() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    let error = reconciler
        .desire(&lrp(1, "1"))
        .await
        .expect_err("second desire must fail");
    assert!(matches!(error, Error::AlreadyExists(_)), "{error}");
    assert_eq!(cluster.stateful_sets.objects().len(), 1);
}

#[tokio::test]
async fn desire_rejects_a_renamed_lrp_with_the_same_identifier() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    let renamed = Lrp {
        app_name: "other".to_string(),
        private_registry: Some(PrivateRegistry {
            server: "host".to_string(),
            username: "user".to_string(),
            password: "password".to_string(),
        }),
        ..lrp(1, "1")
    };
    let error = reconciler
        .desire(&renamed)
        .await
        .expect_err("same identifier must fail");
    assert!(matches!(error, Error::AlreadyExists(_)), "{error}");
    assert_eq!(
        cluster
            .stateful_sets
            .objects()
            .iter()
            .map(|sts| sts.name_any())
            .collect::<Vec<_>>(),
        [NAME]
    );
    assert_eq!(cluster.secrets.calls(Op::Create), 0);
}

#[tokio::test]
async fn desire_creates_registry_secrets_first() {
    let cluster = FakeCluster::default();
    let lrp = Lrp {
        private_registry: Some(PrivateRegistry {
            server: "host".to_string(),
            username: "user".to_string(),
            password: "password".to_string(),
        }),
        ..lrp(1, "1")
    };

    cluster
        .secrets
        .fail_next(Op::Create, fake::upstream("boom"));
    let error = reconciler(&cluster)
        .desire(&lrp)
        .await
        .expect_err("secret failure must abort");
    assert!(error
        .to_string()
        .starts_with("failed to create private registry secret"));
    assert_eq!(cluster.stateful_sets.calls(Op::Create), 0);

    reconciler(&cluster).desire(&lrp).await.expect("desire");
    assert!(cluster
        .secrets
        .get("baldur-space-foo-random-registry-credentials")
        .is_some());
}

#[tokio::test]
async fn update_with_the_stored_token_is_a_noop() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    reconciler.update(&lrp(5, "1")).await.expect("update");
    assert_eq!(replicas(&cluster), Some(1));
    assert_eq!(cluster.stateful_sets.calls(Op::Replace), 0);

    let changed = Lrp {
        app_uris: r#"[{"hostname":"bar.example.com","port":9090}]"#.to_string(),
        ..lrp(5, "2")
    };
    reconciler.update(&changed).await.expect("update");
    let sts = cluster.stateful_sets.get(NAME).expect("workload");
    assert_eq!(sts.spec.as_ref().and_then(|s| s.replicas), Some(5));
    assert_eq!(sts.annotations()[annotations::LAST_UPDATED], "2");
    assert_eq!(
        sts.annotations()[annotations::REGISTERED_ROUTES],
        changed.app_uris
    );
}

#[tokio::test]
async fn update_ensures_the_budget_whatever_the_stored_count() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);

    cluster
        .disruption_budgets
        .fail_next(Op::Create, fake::upstream("boom"));
    reconciler
        .desire(&lrp(3, "1"))
        .await
        .expect_err("budget failure must surface");
    assert_eq!(replicas(&cluster), Some(3));
    assert!(!has_budget(&cluster));

    reconciler.update(&lrp(2, "2")).await.expect("scale down");
    assert!(has_budget(&cluster));
    assert_eq!(replicas(&cluster), Some(2));
}

#[tokio::test]
async fn update_repairs_a_budget_lost_after_the_workload_was_replaced() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster
        .disruption_budgets
        .fail_next(Op::Create, fake::upstream("boom"));
    let error = reconciler
        .update(&lrp(3, "2"))
        .await
        .expect_err("budget failure must surface");
    assert!(error
        .to_string()
        .starts_with("failed to create pod disruption budget"));
    assert_eq!(replicas(&cluster), Some(3));

    // The stored token already matches, so only the budget is written.
    reconciler.update(&lrp(3, "2")).await.expect("retry");
    assert!(has_budget(&cluster));
    assert_eq!(cluster.stateful_sets.calls(Op::Replace), 1);

    reconciler.update(&lrp(2, "3")).await.expect("scale down");
    assert!(has_budget(&cluster));
    assert_eq!(replicas(&cluster), Some(2));
}

#[tokio::test]
async fn update_of_an_unknown_app_fails() {
    let cluster = FakeCluster::default();
    let error = reconciler(&cluster)
        .update(&lrp(1, "1"))
        .await
        .expect_err("must fail");
    assert!(matches!(error, Error::AppNotFound));
    assert_eq!(error.to_string(), "app does not exist");
}

#[tokio::test]
async fn update_retries_conflicts() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster.stateful_sets.fail_next(Op::Replace, fake::conflict());
    reconciler.update(&lrp(2, "2")).await.expect("update");
    assert_eq!(cluster.stateful_sets.replaced().len(), 2);
    assert_eq!(replicas(&cluster), Some(2));
}

#[tokio::test]
async fn update_gives_up_after_the_retry_budget() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster).with_retry(RetryPolicy {
        attempts: 4,
        backoff: tokio::time::Duration::ZERO,
    });
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster
        .stateful_sets
        .fail_always(Op::Replace, fake::conflict);
    let error = reconciler
        .update(&lrp(2, "2"))
        .await
        .expect_err("must fail");
    assert!(matches!(error, Error::Retries { attempts: 4, .. }));
    assert_eq!(cluster.stateful_sets.replaced().len(), 4);
}

#[tokio::test]
async fn update_wraps_store_failures() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster
        .stateful_sets
        .fail_next(Op::Replace, fake::upstream("boom"));
    let error = reconciler
        .update(&lrp(2, "2"))
        .await
        .expect_err("must fail");
    assert!(error.to_string().starts_with("failed to update statefulset"));

    cluster
        .stateful_sets
        .fail_next(Op::List, fake::upstream("boom"));
    let error = reconciler
        .update(&lrp(2, "2"))
        .await
        .expect_err("must fail");
    assert!(error.to_string().starts_with("failed to list statefulsets"));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(3, "1")).await.expect("desire");

    reconciler.stop(&id()).await.expect("first stop");
    reconciler.stop(&id()).await.expect("second stop");
    assert!(cluster.stateful_sets.objects().is_empty());
    assert!(!has_budget(&cluster));
}

#[tokio::test]
async fn stop_deletes_private_registry_secrets_only() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    let lrp = Lrp {
        private_registry: Some(PrivateRegistry {
            server: "host".to_string(),
            username: "user".to_string(),
            password: "password".to_string(),
        }),
        ..lrp(1, "1")
    };
    reconciler.desire(&lrp).await.expect("desire");

    reconciler.stop(&id()).await.expect("stop");
    assert_eq!(
        cluster.secrets.deleted(),
        ["baldur-space-foo-random-registry-credentials"]
    );
}

#[tokio::test]
async fn stop_retries_conflicts() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster.stateful_sets.fail_next(Op::Delete, fake::conflict());
    reconciler.stop(&id()).await.expect("stop");
    assert_eq!(cluster.stateful_sets.deleted(), [NAME, NAME]);
    assert!(cluster.stateful_sets.objects().is_empty());
}

#[tokio::test]
async fn stop_wraps_delete_failures() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(1, "1")).await.expect("desire");

    cluster
        .stateful_sets
        .fail_next(Op::Delete, fake::upstream("boom"));
    let error = reconciler.stop(&id()).await.expect_err("must fail");
    assert!(error.to_string().starts_with("failed to delete statefulset"));
}

#[tokio::test]
async fn stop_instance_deletes_the_ordinal_pod() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    reconciler.desire(&lrp(2, "1")).await.expect("desire");
    cluster.pods.insert(pod(&format!("{NAME}-1"), true));

    reconciler.stop_instance(&id(), 1).await.expect("stop instance");
    assert_eq!(cluster.pods.deleted(), [format!("{NAME}-1")]);
}

#[tokio::test]
async fn stop_instance_errors() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);

    let error = reconciler
        .stop_instance(&id(), 1)
        .await
        .expect_err("must fail");
    assert_eq!(error.to_string(), "app does not exist");

    cluster
        .stateful_sets
        .fail_next(Op::List, fake::upstream("boom"));
    let error = reconciler
        .stop_instance(&id(), 1)
        .await
        .expect_err("must fail");
    assert!(error.to_string().starts_with("failed to get statefulset"));

    reconciler.desire(&lrp(2, "1")).await.expect("desire");
    let error = reconciler
        .stop_instance(&id(), 1)
        .await
        .expect_err("missing pod must fail");
    assert!(error.to_string().starts_with("failed to delete pod"));
}

#[tokio::test]
async fn get_and_list_map_workloads_back() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    let error = reconciler.get(&id()).await.expect_err("must fail");
    assert!(matches!(error, Error::AppNotFound));

    let desired = lrp(2, "1");
    reconciler.desire(&desired).await.expect("desire");

    let lrp = reconciler.get(&id()).await.expect("get");
    assert_eq!(lrp.id, id());
    assert_eq!(lrp.target_instances, 2);
    assert_eq!(lrp.app_uris, desired.app_uris);
    assert_eq!(lrp.last_updated, "1");

    let all = reconciler.list().await.expect("list");
    assert_eq!(all, vec![lrp]);
    assert_eq!(
        cluster
            .stateful_sets
            .list_params()
            .last()
            .and_then(|p| p.label_selector.clone()),
        Some(labels::app_selector())
    );
}

#[tokio::test]
async fn instances_report_placement_errors_and_skip_killed_pods() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    cluster.pods.insert(pod(&format!("{NAME}-0"), true));
    cluster.pods.insert(pod(&format!("{NAME}-1"), false));
    cluster.pods.insert(pod(&format!("{NAME}-2"), true));
    cluster.events.insert(event(
        &format!("{NAME}-1"),
        "FailedScheduling",
        "0/3 nodes are available: 3 Insufficient memory.",
    ));
    cluster.events.insert(event(
        &format!("{NAME}-2"),
        "Killing",
        "Stopping container opi",
    ));

    let instances = reconciler.get_instances(&id()).await.expect("instances");
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].index, 0);
    assert_eq!(instances[0].state, InstanceState::Running);
    assert_eq!(instances[0].since, 123_000_000_000);
    assert_eq!(instances[0].placement_error, None);
    assert_eq!(instances[1].index, 1);
    assert_eq!(
        instances[1].placement_error,
        Some(PlacementError::InsufficientMemory)
    );

    let params = cluster.pods.list_params();
    assert_eq!(
        params[0].label_selector.as_deref(),
        Some("cloudfoundry.org/guid=guid_1234,cloudfoundry.org/version=version_1234")
    );
}

#[tokio::test]
async fn instance_listing_failures_are_fatal() {
    let cluster = FakeCluster::default();
    let reconciler = reconciler(&cluster);
    cluster.pods.insert(pod(&format!("{NAME}-0"), true));

    cluster.pods.fail_next(Op::List, fake::upstream("boom"));
    let error = reconciler
        .get_instances(&id())
        .await
        .expect_err("must fail");
    assert!(error.to_string().starts_with("failed to list pods"));

    cluster.events.fail_next(Op::List, fake::upstream("boom"));
    let error = reconciler
        .get_instances(&id())
        .await
        .expect_err("must fail");
    assert!(error
        .to_string()
        .starts_with(&format!("failed to get events for pod {NAME}-0")));
}
