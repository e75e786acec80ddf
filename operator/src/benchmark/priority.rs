//! Priority class allocation for benchmarks.
//!
//! Each benchmark gets its own cluster-scoped priority class. Values are
//! allocated downwards from the top of the configured window: every new
//! benchmark receives a value strictly below every class allocated before it,
//! so the external scheduler admits queued benchmarks in submission order.
//! Allocation is serialised through the context's priority lock, the only
//! shared mutable state in the operator.
use anyhow::anyhow;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    core::ObjectMeta,
    Api,
};
use tracing::{debug, info};

use crate::benchmark::BenchmarkIdentity;
use crate::context::{Clock, Context};
use crate::labels::{identity_labels, managed_labels_extend};

/// The name of the priority class for a benchmark.
pub fn class_name(resource_prefix: &str, id: &BenchmarkIdentity<'_>) -> String {
    format!("{}{}-{}", resource_prefix, id.namespace, id.name)
}

/// Ensure a priority class exists for the benchmark and return its name.
///
/// Idempotent: when the class already exists its name is returned unchanged,
/// so restarts never re-allocate a value.
pub async fn ensure(
    cx: &Context<impl Clock>,
    id: &BenchmarkIdentity<'_>,
) -> Result<String, super::controller::Error> {
    let classes: Api<PriorityClass> = Api::all(cx.k_client.clone());
    let name = class_name(&cx.settings.resource_prefix, id);

    // Hold the lock across the scan and the create so two benchmarks can
    // never observe the same lowest value.
    let _guard = cx.priority_lock.lock().await;

    if classes.get_opt(&name).await?.is_some() {
        debug!(name, "priority class exists");
        return Ok(name);
    }

    // Scan the existing benchmark classes for the lowest allocated value
    let existing = classes
        .list(&ListParams::default().labels(&cx.settings.kind_label()))
        .await?;
    let mut value = cx.settings.priority_window.max;
    for class in existing.items {
        value = value.min(class.value - 1);
    }
    if value < cx.settings.priority_window.min {
        return Err(anyhow!(
            "priority window exhausted, lowest allocatable value is {}",
            cx.settings.priority_window.min
        )
        .into());
    }

    let class = PriorityClass {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: managed_labels_extend(Some(identity_labels(
                &cx.settings,
                id.kind,
                id.namespace,
                id.name,
            ))),
            ..Default::default()
        },
        value,
        global_default: Some(false),
        preemption_policy: Some("PreemptLowerPriority".to_owned()),
        ..Default::default()
    };
    match classes.create(&PostParams::default(), &class).await {
        Ok(_) => {
            info!(name, value, "created priority class");
            Ok(name)
        }
        // Lost a race with a previous incarnation of ourselves
        Err(kube::Error::Api(err)) if err.reason == "AlreadyExists" => Ok(name),
        Err(err) => Err(err.into()),
    }
}

/// Delete the priority class for a benchmark. Missing classes are fine.
pub async fn delete(cx: &Context<impl Clock>, name: &str) -> Result<(), kube::Error> {
    let classes: Api<PriorityClass> = Api::all(cx.k_client.clone());
    match classes.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.reason == "NotFound" => Ok(()),
        Err(err) => Err(err),
    }
}
