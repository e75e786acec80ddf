//! The generic benchmark lifecycle controller.
//!
//! One controller instance runs per benchmark kind; kind-specific behavior is
//! dispatched through the [`Benchmark`](crate::benchmark::Benchmark) trait.
//! Reconciles never block on benchmark completion: long waits are expressed
//! as requeues and the controller is re-woken by watch events on the gang job,
//! the discovery config map and the benchmark pods.
use std::{sync::Arc, time::Duration};

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Patch, PatchParams},
    client::Client,
    core::NamespaceResourceScope,
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Resource, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info, warn};

use crate::benchmark::{
    discovery, priority,
    scrape::{self, ScrapeError},
    Benchmark, BenchmarkPhase, BenchmarkStatus,
};
use crate::context::{Clock, Context, UtcClock};
use crate::labels::MANAGED_BY_LABEL_SELECTOR;
use crate::resources::apply_child;
use crate::volcano;

/// The finalizer guarding cluster-scoped cleanup.
///
/// The priority class cannot carry an owner reference to the namespaced
/// benchmark, so its deletion is driven from here.
pub const FINALIZER: &str = "perftest.stackhpc.com/finalizer";

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// App error
    #[error("App error: {source}")]
    App {
        /// The underlying error
        #[from]
        source: anyhow::Error,
    },
    /// Kube error
    #[error("Kube error: {source}")]
    Kube {
        /// The underlying error
        #[from]
        source: kube::Error,
    },
}

type ReconcileError = kube::runtime::finalizer::Error<Error>;

fn api_for<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Handle errors during reconciliation.
fn on_error<B: Benchmark>(
    benchmark: Arc<B>,
    error: &ReconcileError,
    cx: Arc<Context<impl Clock>>,
) -> Action {
    let key = backoff_key::<B>(&benchmark);
    let delay = cx.backoff.next_delay(&key);
    warn!(?error, ?delay, "reconcile failed, requeueing");
    Action::requeue(delay)
}

fn backoff_key<B: Benchmark>(benchmark: &B) -> String {
    format!(
        "{}/{}/{}",
        B::KIND,
        benchmark.namespace().unwrap_or_default(),
        benchmark.name_any()
    )
}

/// Start a controller for one benchmark kind, optionally scoped to a namespace.
pub async fn run<B: Benchmark>(cx: Arc<Context<UtcClock>>, namespace: Option<String>) {
    let client = cx.k_client.clone();
    let benchmarks: Api<B> = api_for(client.clone(), namespace.as_deref());
    let jobs: Api<volcano::Job> = api_for(client.clone(), namespace.as_deref());
    let config_maps: Api<ConfigMap> = api_for(client.clone(), namespace.as_deref());
    let pods: Api<Pod> = api_for(client.clone(), namespace.as_deref());
    let settings = cx.settings.clone();

    Controller::new(benchmarks, watcher::Config::default())
        .owns(
            jobs,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .owns(
            config_maps,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .watches(
            pods,
            watcher::Config::default()
                .labels(&format!("{}={}", settings.kind_label(), B::KIND)),
            move |pod| pod_to_benchmark::<B>(&settings, pod),
        )
        .run(reconcile, on_error, cx)
        .for_each(|result| async move {
            match result {
                Ok((benchmark, _)) => {
                    debug!(benchmark = benchmark.name, "reconcile success")
                }
                Err(err) => error!(?err, "reconcile error"),
            }
        })
        .await;
}

// Map a pod event to the benchmark it belongs to via the identity labels.
fn pod_to_benchmark<B: Benchmark>(
    settings: &crate::settings::Settings,
    pod: Pod,
) -> Option<ObjectRef<B>> {
    let labels = pod.metadata.labels?;
    let name = labels.get(&settings.name_label())?;
    let namespace = labels.get(&settings.namespace_label())?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Perform a reconcile pass for one benchmark.
async fn reconcile<B: Benchmark>(
    benchmark: Arc<B>,
    cx: Arc<Context<impl Clock>>,
) -> Result<Action, ReconcileError> {
    let meter = global::meter("kube-perftest");
    let runs = meter
        .u64_counter("benchmark_reconcile_count")
        .with_description("Number of benchmark reconciles")
        .init();

    let ns = benchmark.namespace().unwrap_or_default();
    let benchmarks: Api<B> = Api::namespaced(cx.k_client.clone(), &ns);
    let result = finalizer(&benchmarks, FINALIZER, benchmark.clone(), |event| async {
        match event {
            Finalizer::Apply(benchmark) => reconcile_apply(benchmark, cx.clone()).await,
            Finalizer::Cleanup(benchmark) => reconcile_cleanup(benchmark, cx.clone()).await,
        }
    })
    .await;

    let outcome = if result.is_ok() {
        cx.backoff.reset(&backoff_key::<B>(&benchmark));
        "ok"
    } else {
        "err"
    };
    runs.add(
        1,
        &[
            KeyValue::new("kind", B::KIND),
            KeyValue::new("result", outcome),
        ],
    );
    result
}

// Mark the status failed with a human-readable reason. Terminal, no retry.
fn fail<B: Benchmark>(
    status: &mut BenchmarkStatus<B::BenchResult>,
    now: Time,
    reason: String,
) -> Action {
    warn!(kind = B::KIND, %reason, "benchmark failed");
    status.phase = BenchmarkPhase::Failed;
    status.failure_reason = Some(reason);
    status.finished_at = Some(now);
    Action::await_change()
}

async fn reconcile_apply<B: Benchmark>(
    benchmark: Arc<B>,
    cx: Arc<Context<impl Clock>>,
) -> Result<Action, Error> {
    let id = benchmark.identity();
    debug!(kind = B::KIND, benchmark = id.name, "reconcile");

    let mut status = benchmark.status().cloned().unwrap_or_default();
    // Terminal statuses are immutable, nothing left to do
    if status.phase.is_terminal() {
        return Ok(Action::await_change());
    }

    let action = match status.phase {
        BenchmarkPhase::Pending => {
            // The priority class must exist before any child job is admitted
            let class_name = priority::ensure(cx.as_ref(), &id).await?;
            status.priority_class_name = Some(class_name);
            if status.started_at.is_none() {
                status.started_at = Some(Time(cx.clock.now()));
            }
            status.phase = BenchmarkPhase::Preparing;
            Action::requeue(Duration::from_secs(1))
        }
        BenchmarkPhase::Preparing => {
            if let Some(class_name) = status.priority_class_name.clone() {
                match benchmark.render(&cx.settings, &class_name) {
                    Ok(children) => {
                        let orefs = benchmark
                            .controller_owner_ref(&())
                            .map(|oref| vec![oref])
                            .unwrap_or_default();
                        let api_timeout = Duration::from_secs(cx.settings.api_timeout_secs);
                        for child in children {
                            let name = child.name().unwrap_or_default().to_owned();
                            tokio::time::timeout(
                                api_timeout,
                                apply_child(cx.as_ref(), id.namespace, orefs.clone(), child),
                            )
                            .await
                            .map_err(|_| anyhow::anyhow!("timed out applying {name}"))??;
                        }
                        status.phase = BenchmarkPhase::Running;
                        Action::requeue(Duration::from_secs(1))
                    }
                    Err(err) => fail::<B>(
                        &mut status,
                        Time(cx.clock.now()),
                        format!("invalid spec: {err}"),
                    ),
                }
            } else {
                // The priority class allocation was lost, redo it
                status.phase = BenchmarkPhase::Pending;
                Action::requeue(Duration::from_secs(1))
            }
        }
        BenchmarkPhase::Running => {
            discovery::update_hosts(cx.as_ref(), &id).await?;
            let jobs: Api<volcano::Job> = Api::namespaced(cx.k_client.clone(), id.namespace);
            let job = jobs.get_opt(id.name).await?;
            match job.as_ref().and_then(|job| job.phase()) {
                Some(volcano::phase::COMPLETED) => {
                    status.phase = BenchmarkPhase::Summarising;
                    Action::requeue(Duration::from_secs(1))
                }
                Some(
                    volcano::phase::FAILED | volcano::phase::ABORTED | volcano::phase::TERMINATED,
                ) => {
                    let reason = job
                        .as_ref()
                        .and_then(|job| job.state_message())
                        .unwrap_or_else(|| "no reason reported".to_owned());
                    fail::<B>(
                        &mut status,
                        Time(cx.clock.now()),
                        format!("job failed: {reason}"),
                    )
                }
                _ => Action::requeue(Duration::from_secs(10)),
            }
        }
        BenchmarkPhase::Summarising => {
            match scrape::result_component_logs(cx.as_ref(), &id, B::RESULT_COMPONENT).await {
                Ok(log) => match B::parse(&log) {
                    Ok((bench_result, summary)) => {
                        info!(kind = B::KIND, benchmark = id.name, %summary, "benchmark succeeded");
                        status.result = Some(bench_result);
                        status.summary = Some(summary);
                        status.phase = BenchmarkPhase::Succeeded;
                        status.finished_at = Some(Time(cx.clock.now()));
                        Action::await_change()
                    }
                    Err(err) => fail::<B>(
                        &mut status,
                        Time(cx.clock.now()),
                        format!("parse-error: {err}"),
                    ),
                },
                Err(ScrapeError::Incomplete(reason)) => {
                    debug!(reason, "results not ready yet");
                    Action::requeue(Duration::from_secs(5))
                }
                Err(ScrapeError::Timeout) => {
                    return Err(anyhow::anyhow!("timed out fetching pod logs").into())
                }
                Err(ScrapeError::Kube(err)) => return Err(err.into()),
            }
        }
        BenchmarkPhase::Terminating | BenchmarkPhase::Succeeded | BenchmarkPhase::Failed => {
            Action::await_change()
        }
    };

    // Persist the status when it changed; skipping the no-op write keeps
    // repeated reconciles mutation-free
    if benchmark.status() != Some(&status) {
        let benchmarks: Api<B> = Api::namespaced(cx.k_client.clone(), id.namespace);
        benchmarks
            .patch_status(
                id.name,
                &PatchParams::default(),
                &Patch::Merge(serde_json::json!({ "status": status })),
            )
            .await?;
    }
    Ok(action)
}

async fn reconcile_cleanup<B: Benchmark>(
    benchmark: Arc<B>,
    cx: Arc<Context<impl Clock>>,
) -> Result<Action, Error> {
    let id = benchmark.identity();
    info!(kind = B::KIND, benchmark = id.name, "cleaning up benchmark");

    // Mark the benchmark terminating unless it already finished
    if let Some(status) = benchmark.status() {
        if !status.phase.is_terminal() && status.phase != BenchmarkPhase::Terminating {
            let mut status = status.clone();
            status.phase = BenchmarkPhase::Terminating;
            let benchmarks: Api<B> = Api::namespaced(cx.k_client.clone(), id.namespace);
            benchmarks
                .patch_status(
                    id.name,
                    &PatchParams::default(),
                    &Patch::Merge(serde_json::json!({ "status": status })),
                )
                .await?;
        }
    }

    // Children disappear through owner GC; the cluster-scoped priority class
    // has to be deleted explicitly
    let class_name = benchmark
        .status()
        .and_then(|status| status.priority_class_name.clone())
        .unwrap_or_else(|| priority::class_name(&cx.settings.resource_prefix, &id));
    priority::delete(cx.as_ref(), &class_name).await?;
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::iperf::{IPerf, IPerfSpec};
    use crate::testing::{self, Request};
    use serde_json::json;

    const STATUS_PATH: &str =
        "PATCH /apis/perftest.stackhpc.com/v1alpha1/namespaces/default/iperfs/bench/status";

    fn benchmark(status: Option<serde_json::Value>) -> IPerf {
        let mut iperf = IPerf::new(
            "bench",
            IPerfSpec {
                duration: 5,
                streams: 4,
                ..Default::default()
            },
        );
        iperf.metadata.namespace = Some("default".to_owned());
        iperf.metadata.uid = Some("uid-1".to_owned());
        iperf.metadata.finalizers = Some(vec![FINALIZER.to_owned()]);
        if let Some(status) = status {
            iperf.status = Some(serde_json::from_value(status).unwrap());
        }
        iperf
    }

    fn patched(benchmark: &IPerf) -> serde_json::Value {
        serde_json::to_value(benchmark).unwrap()
    }

    #[tokio::test]
    async fn pending_allocates_priority_and_moves_to_preparing() {
        let benchmark = benchmark(None);
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /apis/scheduling.k8s.io/v1/priorityclasses",
                    json!({"kind": "PriorityClassList", "apiVersion": "scheduling.k8s.io/v1", "metadata": {}, "items": []}),
                ),
                (STATUS_PATH, patched(&benchmark)),
            ]),
        );
        let action = reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));

        let requests = requests.lock().unwrap();
        let create = requests
            .iter()
            .find(|r| r.method == "POST")
            .expect("creates the priority class");
        assert_eq!(create.body["value"], -1);
        let status: &Request = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .expect("persists the status");
        assert_eq!(status.body["status"]["phase"], "Preparing");
        assert_eq!(
            status.body["status"]["priorityClassName"],
            "kube-perftest-default-bench"
        );
        assert!(status.body["status"]["startedAt"].is_string());
    }

    #[tokio::test]
    async fn preparing_applies_children_and_moves_to_running() {
        let benchmark = benchmark(Some(json!({
            "phase": "Preparing",
            "priorityClassName": "kube-perftest-default-bench",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![(STATUS_PATH, patched(&benchmark))]),
        );
        reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        let applied: Vec<&str> = requests
            .iter()
            .filter(|r| r.method == "PATCH" && !r.path.ends_with("/status"))
            .map(|r| r.path.as_str())
            .collect();
        // One service, one discovery config map, one gang job
        assert_eq!(
            applied,
            vec![
                "/api/v1/namespaces/default/configmaps/bench-discovery",
                "/api/v1/namespaces/default/services/bench",
                "/apis/batch.volcano.sh/v1alpha1/namespaces/default/jobs/bench",
            ]
        );
        let status = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .unwrap();
        assert_eq!(status.body["status"]["phase"], "Running");
    }

    #[tokio::test]
    async fn invalid_spec_fails_terminally() {
        let mut invalid = benchmark(Some(json!({
            "phase": "Preparing",
            "priorityClassName": "kube-perftest-default-bench",
        })));
        invalid.spec.common.host_network = true;
        invalid.spec.common.network_name = Some("default/macvlan".to_owned());
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![(STATUS_PATH, patched(&invalid))]),
        );
        reconcile_apply(Arc::new(invalid), cx).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        let status = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .unwrap();
        assert_eq!(status.body["status"]["phase"], "Failed");
        assert!(status.body["status"]["failureReason"]
            .as_str()
            .unwrap()
            .starts_with("invalid spec:"));
    }

    #[tokio::test]
    async fn running_waits_until_the_job_completes() {
        let benchmark = benchmark(Some(json!({
            "phase": "Running",
            "priorityClassName": "kube-perftest-default-bench",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /api/v1/namespaces/default/configmaps/bench-discovery",
                    json!({
                        "apiVersion": "v1",
                        "kind": "ConfigMap",
                        "metadata": {"name": "bench-discovery", "namespace": "default"},
                        "data": {"hosts": "", "all-hosts": "bench-server-0.bench\nbench-client-0.bench"},
                    }),
                ),
                (
                    "GET /api/v1/namespaces/default/pods",
                    json!({"kind": "PodList", "apiVersion": "v1", "metadata": {}, "items": []}),
                ),
                (
                    "GET /apis/batch.volcano.sh/v1alpha1/namespaces/default/jobs/bench",
                    json!({
                        "apiVersion": "batch.volcano.sh/v1alpha1",
                        "kind": "Job",
                        "metadata": {"name": "bench", "namespace": "default"},
                        "spec": {"tasks": []},
                        "status": {"state": {"phase": "Running"}},
                    }),
                ),
            ]),
        );
        let action = reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        // Reconciling without any external change makes no mutations at all
        let requests = requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.method == "GET"));
    }

    #[tokio::test]
    async fn job_failure_is_terminal_with_reason() {
        let benchmark = benchmark(Some(json!({
            "phase": "Running",
            "priorityClassName": "kube-perftest-default-bench",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /api/v1/namespaces/default/pods",
                    json!({"kind": "PodList", "apiVersion": "v1", "metadata": {}, "items": []}),
                ),
                (
                    "GET /apis/batch.volcano.sh/v1alpha1/namespaces/default/jobs/bench",
                    json!({
                        "apiVersion": "batch.volcano.sh/v1alpha1",
                        "kind": "Job",
                        "metadata": {"name": "bench", "namespace": "default"},
                        "spec": {"tasks": []},
                        "status": {"state": {"phase": "Failed", "reason": "BackoffLimitExceeded"}},
                    }),
                ),
                (STATUS_PATH, patched(&benchmark)),
            ]),
        );
        reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        let status = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .unwrap();
        assert_eq!(status.body["status"]["phase"], "Failed");
        assert_eq!(
            status.body["status"]["failureReason"],
            "job failed: BackoffLimitExceeded"
        );
    }

    #[tokio::test]
    async fn summarising_parses_the_client_log() {
        let benchmark = benchmark(Some(json!({
            "phase": "Summarising",
            "priorityClassName": "kube-perftest-default-bench",
            "startedAt": "2024-01-01T00:00:00Z",
        })));
        let log = "\
[ ID] Interval       Transfer     Bandwidth\n\
[  1] 0.00-5.00 sec  120000 KBytes  245000 Kbits/sec\n\
[  2] 0.00-5.00 sec  120000 KBytes  245000 Kbits/sec\n\
[  3] 0.00-5.00 sec  120000 KBytes  245000 Kbits/sec\n\
[  4] 0.00-5.00 sec  120000 KBytes  245000 Kbits/sec\n\
[SUM] 0.00-5.00 sec  480000 KBytes  980000 Kbits/sec\n";
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /api/v1/namespaces/default/pods",
                    json!({"kind": "PodList", "apiVersion": "v1", "metadata": {}, "items": [{
                        "apiVersion": "v1",
                        "kind": "Pod",
                        "metadata": {"name": "bench-client-0", "namespace": "default"},
                        "status": {"phase": "Succeeded"},
                    }]}),
                ),
                (
                    "GET /api/v1/namespaces/default/pods/bench-client-0/log",
                    serde_json::Value::String(log.to_owned()),
                ),
                (STATUS_PATH, patched(&benchmark)),
            ]),
        );
        let action = reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();
        assert_eq!(action, Action::await_change());

        let requests = requests.lock().unwrap();
        let status = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .unwrap();
        assert_eq!(status.body["status"]["phase"], "Succeeded");
        assert_eq!(
            status.body["status"]["result"]["bandwidthGbps"],
            "0.98"
        );
        assert!(status.body["status"]["finishedAt"].is_string());
    }

    #[tokio::test]
    async fn missing_summary_line_is_a_parse_error() {
        let benchmark = benchmark(Some(json!({
            "phase": "Summarising",
            "priorityClassName": "kube-perftest-default-bench",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /api/v1/namespaces/default/pods",
                    json!({"kind": "PodList", "apiVersion": "v1", "metadata": {}, "items": [{
                        "apiVersion": "v1",
                        "kind": "Pod",
                        "metadata": {"name": "bench-client-0", "namespace": "default"},
                        "status": {"phase": "Succeeded"},
                    }]}),
                ),
                (
                    "GET /api/v1/namespaces/default/pods/bench-client-0/log",
                    serde_json::Value::String("iperf exited before printing results\n".to_owned()),
                ),
                (STATUS_PATH, patched(&benchmark)),
            ]),
        );
        reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        let status = requests
            .iter()
            .find(|r| r.path.ends_with("/status"))
            .unwrap();
        assert_eq!(status.body["status"]["phase"], "Failed");
        assert!(status.body["status"]["failureReason"]
            .as_str()
            .unwrap()
            .starts_with("parse-error:"));
    }

    #[tokio::test]
    async fn terminal_statuses_are_immutable() {
        let benchmark = benchmark(Some(json!({
            "phase": "Succeeded",
            "priorityClassName": "kube-perftest-default-bench",
            "summary": "0.98 Gbits/sec",
            "finishedAt": "2024-01-01T00:00:00Z",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(handle, testing::routes(vec![]));
        let action = reconcile_apply(Arc::new(benchmark), cx).await.unwrap();
        server.abort();
        assert_eq!(action, Action::await_change());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_deletes_the_priority_class() {
        let benchmark = benchmark(Some(json!({
            "phase": "Succeeded",
            "priorityClassName": "kube-perftest-default-bench",
            "finishedAt": "2024-01-01T00:00:00Z",
        })));
        let (cx, handle) = testing::arc_test_context();
        let (requests, server) = testing::spawn_mock_api(handle, testing::routes(vec![]));
        reconcile_cleanup(Arc::new(benchmark), cx).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        let delete = requests
            .iter()
            .find(|r| r.method == "DELETE")
            .expect("deletes the priority class");
        assert_eq!(
            delete.path,
            "/apis/scheduling.k8s.io/v1/priorityclasses/kube-perftest-default-bench"
        );
        // A finished benchmark's terminal status is left untouched
        assert!(requests.iter().all(|r| !r.path.ends_with("/status")));
    }
}
