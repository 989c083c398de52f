use crate::{
    api::LrpApi,
    k8s::{self, labels, Clients},
    publisher::{LogRegistry, Publisher},
    routes::{Collector, Controller, Handler, Index, QueueEmitter, RouteMetrics},
    scheduler::Scheduler,
    workload::{Mapper, Reconciler, RetryPolicy},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "lrp", about = "Reconciles long-running processes onto Kubernetes workloads")]
pub struct Args {
    #[clap(long, default_value = "lrp=info,warn", env = "LRP_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the LRP API server.
    #[clap(long)]
    api_disabled: bool,

    /// The namespace workloads are created in.
    #[clap(long, env = "LRP_CONTROLLER_NAMESPACE")]
    namespace: String,

    /// A shared image-pull secret attached to every workload.
    #[clap(long, default_value = "")]
    registry_secret_name: String,

    #[clap(long, default_value = "")]
    rootfs_version: String,

    /// How often the full route set is re-emitted.
    #[clap(long, default_value = "30")]
    route_emit_interval_secs: u64,

    #[clap(long, default_value = "1024")]
    route_queue_size: usize,

    /// The number of attempts made for updates and stops that keep conflicting.
    #[clap(long, default_value = "16")]
    conflict_retries: usize,

    #[clap(long, default_value = "0")]
    conflict_backoff_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            api_disabled,
            namespace,
            registry_secret_name,
            rootfs_version,
            route_emit_interval_secs,
            route_queue_size,
            conflict_retries,
            conflict_backoff_ms,
        } = self;

        if conflict_retries == 0 {
            bail!("--conflict-retries must be at least 1");
        }

        let server = if api_disabled { None } else { Some(server) };

        let mut prom = <Registry>::default();
        let route_metrics = RouteMetrics::register(prom.sub_registry_with_prefix("lrp"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let clients = Clients::namespaced(runtime.client(), &namespace);
        let reconciler = Reconciler::new(
            clients.clone(),
            Mapper::new(registry_secret_name, rootfs_version),
        )
        .with_retry(RetryPolicy {
            attempts: conflict_retries,
            backoff: Duration::from_millis(conflict_backoff_ms),
        });

        // Route messages flow from the handlers and the scheduler through a
        // bounded queue to the registry publisher.
        let (emitter, messages) = QueueEmitter::channel(route_queue_size, route_metrics.clone());
        let emitter = Arc::new(emitter);
        let (changes_tx, changes_rx) = mpsc::channel(route_queue_size);
        let index = Index::shared(changes_tx, route_metrics.clone());

        // Spawn resource watches.

        let stateful_sets = runtime.watch_namespaced::<k8s::StatefulSet>(
            namespace.clone(),
            watcher::Config::default().labels(&labels::app_selector()),
        );
        tokio::spawn(
            kubert::index::namespaced(index.clone(), stateful_sets)
                .instrument(info_span!("statefulsets")),
        );

        let pods = runtime.watch_namespaced::<k8s::Pod>(
            namespace.clone(),
            watcher::Config::default().labels(&labels::app_selector()),
        );
        tokio::spawn(kubert::index::namespaced(index, pods).instrument(info_span!("pods")));

        let handler = Handler::new(clients.pods.clone(), emitter.clone(), route_metrics.clone());
        tokio::spawn(
            Controller::new(handler, changes_rx)
                .run(runtime.shutdown_handle())
                .instrument(info_span!("routes")),
        );

        let scheduler = Scheduler::new(
            Collector::new(&clients),
            emitter,
            route_metrics,
            Duration::from_secs(route_emit_interval_secs),
        );
        tokio::spawn(
            scheduler
                .run(runtime.shutdown_handle())
                .instrument(info_span!("collector")),
        );

        tokio::spawn(
            Publisher::new(messages, Arc::new(LogRegistry))
                .run(runtime.shutdown_handle())
                .instrument(info_span!("publisher")),
        );

        // Run the API server.
        let reconciler = Arc::new(reconciler);
        let runtime = runtime.spawn_server(move || LrpApi::new(reconciler.clone()));

        info!(%namespace, "Controller started");

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

