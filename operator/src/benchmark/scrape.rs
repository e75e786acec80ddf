//! Pod log scraping for result extraction.
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{ListParams, LogParams},
    Api, ResourceExt,
};
use tracing::debug;

use crate::benchmark::BenchmarkIdentity;
use crate::context::{Clock, Context};
use crate::labels::{component_labels, selector};

/// Errors produced while scraping benchmark logs.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// The result pods have not all completed yet; scrape again later.
    #[error("pod results incomplete: {0}")]
    Incomplete(String),
    /// The log fetch did not finish within the configured timeout.
    #[error("timed out fetching pod logs")]
    Timeout,
    /// The API server rejected a request.
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Fetch the logs of every pod of the benchmark's result component.
///
/// All matching pods must have succeeded; the logs are concatenated in pod
/// name order so the stream seen by the parser is deterministic when several
/// pods match.
pub async fn result_component_logs(
    cx: &Context<impl Clock>,
    id: &BenchmarkIdentity<'_>,
    component: &str,
) -> Result<String, ScrapeError> {
    let pods: Api<Pod> = Api::namespaced(cx.k_client.clone(), id.namespace);
    let labels = component_labels(&cx.settings, id.kind, id.namespace, id.name, component);
    let pod_list = pods
        .list(&ListParams::default().labels(&selector(&labels)))
        .await?;

    let mut items = pod_list.items;
    if items.is_empty() {
        return Err(ScrapeError::Incomplete(format!(
            "no pods found for component {component}"
        )));
    }
    items.sort_by_key(|pod| pod.name_any());

    for pod in &items {
        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .unwrap_or("Unknown");
        if phase != "Succeeded" {
            return Err(ScrapeError::Incomplete(format!(
                "pod {} is {}",
                pod.name_any(),
                phase
            )));
        }
    }

    let timeout = Duration::from_secs(cx.settings.log_timeout_secs);
    let mut log = String::new();
    for pod in &items {
        debug!(pod = pod.name_any(), "fetching result log");
        let text = tokio::time::timeout(timeout, pods.logs(&pod.name_any(), &LogParams::default()))
            .await
            .map_err(|_| ScrapeError::Timeout)??;
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&text);
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn id<'a>() -> BenchmarkIdentity<'a> {
        BenchmarkIdentity {
            kind: "IPerf",
            namespace: "default",
            name: "bench",
        }
    }

    fn pod(name: &str, phase: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "default" },
            "status": { "phase": phase },
        })
    }

    fn pod_list(items: Vec<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {},
            "items": items,
        })
    }

    #[tokio::test]
    async fn incomplete_until_pods_succeed() {
        let (cx, handle) = testing::test_context();
        let (_requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![(
                "GET /api/v1/namespaces/default/pods",
                pod_list(vec![pod("bench-client-0", "Running")]),
            )]),
        );
        let err = result_component_logs(&cx, &id(), "client")
            .await
            .unwrap_err();
        server.abort();
        assert!(matches!(err, ScrapeError::Incomplete(_)));
        assert!(err.to_string().contains("bench-client-0 is Running"));
    }

    #[tokio::test]
    async fn no_pods_is_incomplete() {
        let (cx, handle) = testing::test_context();
        let (_requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![(
                "GET /api/v1/namespaces/default/pods",
                pod_list(vec![]),
            )]),
        );
        let err = result_component_logs(&cx, &id(), "client")
            .await
            .unwrap_err();
        server.abort();
        assert!(matches!(err, ScrapeError::Incomplete(_)));
    }

    #[tokio::test]
    async fn concatenates_logs_in_pod_name_order() {
        let (cx, handle) = testing::test_context();
        let (_requests, server) = testing::spawn_mock_api(
            handle,
            testing::routes(vec![
                (
                    "GET /api/v1/namespaces/default/pods",
                    pod_list(vec![
                        pod("bench-client-1", "Succeeded"),
                        pod("bench-client-0", "Succeeded"),
                    ]),
                ),
                (
                    "GET /api/v1/namespaces/default/pods/bench-client-0/log",
                    serde_json::Value::String("first\n".to_owned()),
                ),
                (
                    "GET /api/v1/namespaces/default/pods/bench-client-1/log",
                    serde_json::Value::String("second\n".to_owned()),
                ),
            ]),
        );
        let log = result_component_logs(&cx, &id(), "client").await.unwrap();
        server.abort();
        assert_eq!(log, "first\nsecond\n");
    }
}
